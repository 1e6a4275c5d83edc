pub mod models {
    pub mod open_meteo;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod models;
}
pub mod error;
pub mod schema;
pub mod services {
    pub mod dates;
    pub mod merge;
    pub mod migrate;
    pub mod reconcile;
    pub mod reports;
    pub mod resolve;
    pub mod sync;
}

#[cfg(test)]
mod test_support;

pub use crate::error::SyncError;
pub use crate::services::sync::{LocationReport, SyncSummary, Synchronizer};
