pub mod apply;
pub mod backup_schedule;
pub mod common;
pub mod infrastructure;
pub mod monitor;
pub mod rbac;
pub mod restore;
pub mod secret;
pub mod service;
pub mod statefulset;
pub mod store;

pub use common::{
    API_VERSION, FIELD_MANAGER, KIND, LabelSelectorSet, selector_labels, standard_labels,
};
