//! Resume-safety gate between a new ManagedDatabase and a paused one
//!
//! A create request whose name matches a DormantDatabase is only accepted as
//! a resume when both describe the same database. The comparison runs on a
//! canonical form of the spec so one-shot and defaulted fields do not count.

use kube::ResourceExt;
use tracing::debug;

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::events::reasons;
use crate::controller::status::StatusReporter;
use crate::crd::{DormantDatabase, InitSpec, ManagedDatabase, ManagedDatabaseSpec, SecretRef, default_secret_name};
use crate::resources::common::{ANNOTATION_INIT_SPEC, KIND, LABEL_DATABASE_KIND};

pub const SPEC_MISMATCH: &str = "spec mismatches with OriginSpec in DormantDatabases";
pub const INIT_SPEC_MISMATCH: &str = "InitSpec mismatches with DormantDatabase annotation";

/// Steady-state identity of a database spec.
///
/// `init` is cleared because restore is one-shot, and an absent database
/// secret is replaced by its default name.
pub fn normalize_spec(name: &str, spec: &ManagedDatabaseSpec) -> ManagedDatabaseSpec {
    let mut canonical = spec.clone();
    canonical.init = None;
    if canonical.database_secret.is_none() {
        canonical.database_secret = Some(SecretRef {
            secret_name: default_secret_name(name),
        });
    }
    canonical
}

/// Decide whether `candidate` is a resume of `dormant`.
///
/// `Ok(false)` when there is no dormant record. A record that exists but
/// disagrees with the candidate is a validation error, never a soft miss.
pub fn match_dormant(candidate: &ManagedDatabase, dormant: Option<&DormantDatabase>) -> Result<bool> {
    let Some(dormant) = dormant else {
        return Ok(false);
    };
    let name = candidate.name_any();

    if dormant.labels().get(LABEL_DATABASE_KIND).map(String::as_str) != Some(KIND) {
        return Err(Error::ValidationError(format!(
            r#"Invalid {}: "{}". Exists DormantDatabase "{}" of different Kind"#,
            KIND,
            name,
            dormant.name_any()
        )));
    }

    if let Some(raw) = dormant
        .annotations()
        .get(ANNOTATION_INIT_SPEC)
        .filter(|raw| !raw.is_empty())
    {
        let recorded: InitSpec = serde_json::from_str(raw).map_err(|e| {
            Error::ValidationError(format!("invalid {} annotation: {}", ANNOTATION_INIT_SPEC, e))
        })?;
        if let Some(requested) = &candidate.spec.init
            && *requested != recorded
        {
            return Err(Error::ValidationError(INIT_SPEC_MISMATCH.to_string()));
        }
    }

    let origin = &dormant.spec.origin;
    let mut recorded = normalize_spec(&origin.metadata.name, &origin.spec);
    // An origin carrying init cannot be resumed and never matches
    recorded.init = origin.spec.init.clone();
    if recorded != normalize_spec(&name, &candidate.spec) {
        return Err(Error::ValidationError(SPEC_MISMATCH.to_string()));
    }

    Ok(true)
}

/// Look up the dormant record of `candidate` and match against it, recording
/// a warning event on lookup failure or mismatch.
///
/// A dormant record that is already being deleted is being consumed by a
/// resume and counts as absent.
pub async fn matches(ctx: &Context, candidate: &ManagedDatabase) -> Result<bool> {
    let reporter = StatusReporter::new(ctx);
    let namespace = candidate.namespace().unwrap_or_default();
    let name = candidate.name_any();

    let dormant = match ctx.store.get_dormant(&namespace, &name).await {
        Ok(found) => found.filter(|d| d.metadata.deletion_timestamp.is_none()),
        Err(e) => {
            reporter
                .warning(
                    candidate,
                    reasons::FAILED_TO_GET,
                    &format!(r#"Fail to get DormantDatabase: "{}". Reason: {}"#, name, e),
                )
                .await;
            return Err(e);
        }
    };

    match match_dormant(candidate, dormant.as_ref()) {
        Ok(matched) => {
            debug!(namespace, name, matched, "Dormant match checked");
            Ok(matched)
        }
        Err(e) => {
            reporter
                .warning(candidate, reasons::FAILED_TO_CREATE, &e.to_string())
                .await;
            Err(e)
        }
    }
}
