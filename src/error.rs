use crate::client::HttpError;
use crate::services::dates::DateRangeError;
use crate::services::migrate::SchemaError;
use crate::services::resolve::ResolveError;

/// Every way a sync, or one location of it, can fail.
///
/// Date range and schema errors abort the whole batch; the rest are recorded
/// against the location that hit them.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    InvalidRange(#[from] DateRangeError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("fetching archive data for `{location}` failed: {source}")]
    Fetch {
        location: String,
        #[source]
        source: HttpError,
    },
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("storage error: {0}")]
    Storage(#[from] diesel::result::Error),
    #[error("batch aborted before `{0}` was scheduled")]
    Aborted(String),
}

impl SyncError {
    /// Stable tag naming the failure kind, for result listings.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::InvalidRange(DateRangeError::InvalidDateFormat { .. }) => "InvalidDateFormat",
            SyncError::InvalidRange(DateRangeError::DateTooRecent { .. }) => "DateTooRecent",
            SyncError::InvalidRange(DateRangeError::RangeOrder { .. }) => "RangeOrderError",
            SyncError::Resolve(ResolveError::LocationNotFound(_)) => "LocationNotFound",
            SyncError::Resolve(ResolveError::TimezoneNotFound { .. }) => "TimezoneNotFound",
            SyncError::Resolve(ResolveError::LookupFailed { .. }) => "LookupFailed",
            SyncError::Fetch { source, .. } if source.is_timeout() => "FetchTimeout",
            SyncError::Fetch { .. } => "FetchFailed",
            SyncError::Schema(_) => "SchemaError",
            SyncError::Storage(_) => "StorageError",
            SyncError::Aborted(_) => "Aborted",
        }
    }

    /// Whether the error stops the whole batch rather than one location.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::InvalidRange(_) | SyncError::Schema(_))
    }
}
