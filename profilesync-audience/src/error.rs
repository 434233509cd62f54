use thiserror::Error;

/// A rule text that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("audience '{audience}' at offset {offset}: {message}")]
pub struct CompileError {
    pub audience: String,
    /// Character offset into the rule text.
    pub offset: usize,
    pub message: String,
}

impl CompileError {
    pub(crate) fn new(audience: &str, offset: usize, message: impl Into<String>) -> Self {
        Self {
            audience: audience.to_string(),
            offset,
            message: message.into(),
        }
    }
}

/// Errors reported by an audience store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudienceStoreError {
    #[error("audience not found: {0}")]
    NotFound(String),

    #[error("audience already exists: {0}")]
    AlreadyExists(String),

    /// Another compilation job is running.
    #[error("an audience compilation is already in progress")]
    CompilationInProgress,

    #[error("audience store error: {0}")]
    Backend(String),
}

/// One audience the reconciler could not bring up to date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileFailure {
    pub audience: String,
    pub error: AudienceStoreError,
}

/// Failure of a reconciliation sweep.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The live audiences could not be listed; nothing was changed.
    #[error("failed to list live audiences: {0}")]
    Listing(#[source] AudienceStoreError),

    /// Some audiences failed; the rest of the sweep completed and is
    /// described by `report`.
    #[error("{} audience(s) failed to reconcile: {}", .failures.len(), summary(.failures))]
    Partial {
        failures: Vec<ReconcileFailure>,
        report: crate::ReconcileReport,
    },
}

fn summary(failures: &[ReconcileFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.audience, f.error))
        .collect::<Vec<_>>()
        .join(", ")
}
