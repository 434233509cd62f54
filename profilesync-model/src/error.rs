use thiserror::Error;

/// Errors raised while building or loading a field registry.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid field registry: {0}")]
    InvalidRegistry(String),

    #[error("registry document error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Types(#[from] profilesync_types::Error),
}

pub type ModelResult<T> = Result<T, ModelError>;
