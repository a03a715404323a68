mod dormant_database;
mod managed_database;
mod snapshot;

pub use dormant_database::*;
pub use managed_database::*;
pub use snapshot::*;
