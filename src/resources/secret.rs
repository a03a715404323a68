use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use rand::Rng;

use crate::crd::ManagedDatabase;
use crate::resources::common::{PASSWORD_KEY, standard_labels};

/// Generate a secure random password
pub fn generate_password(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

/// Generate the admin credentials Secret
///
/// Only created when absent; an existing secret (user-supplied or from an
/// earlier incarnation of the database) is never regenerated.
pub fn generate_admin_secret(db: &ManagedDatabase) -> Secret {
    let password = generate_password(32);

    let string_data = BTreeMap::from([
        ("POSTGRES_USER".to_string(), "postgres".to_string()),
        (PASSWORD_KEY.to_string(), password),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(db.secret_name()),
            namespace: db.namespace(),
            labels: Some(standard_labels(&db.name_any())),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(string_data),
        ..Default::default()
    }
}
