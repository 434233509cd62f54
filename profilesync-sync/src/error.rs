//! Error types for the sync layer.

use profilesync_model::StoreError;
use profilesync_types::ProfileId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Reasons a proposed value cannot be merged. A value that merges but
/// changes nothing is not an error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MergeError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("source '{source_name}' may not write field '{field}'")]
    SourceNotPermitted { field: String, source_name: String },

    #[error("profile {0} is partially loaded and cannot be written")]
    PartialProfile(ProfileId),

    #[error("invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Value(#[from] profilesync_types::Error),

    /// A loader hook failed.
    #[error("loader '{loader}' failed: {message}")]
    Loader { loader: String, message: String },

    #[error("loader '{loader}' timed out during {operation}")]
    Timeout { loader: String, operation: &'static str },

    /// Saving a profile failed; the last field attempted is kept for the log.
    #[error("failed to save profile {profile} at field '{field}' = '{value}': {error}")]
    Save {
        profile: ProfileId,
        field: String,
        value: String,
        #[source]
        error: StoreError,
    },
}

impl SyncError {
    /// Shorthand for a loader failure.
    pub fn loader(loader: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Loader {
            loader: loader.into(),
            message: message.into(),
        }
    }
}
