//! Core type definitions for ProfileSync.
//!
//! This crate defines the fundamental, source-agnostic types used throughout
//! the synchronization core:
//! - Profile, field and source identifiers
//! - The typed [`FieldValue`] carried by every profile field, and the
//!   string codec used for flattened search snapshots
//!
//! Everything that knows about merge policy, provenance or audiences lives
//! in the crates layered on top of this one.

mod ids;
mod value;

pub use ids::{FieldName, ProfileId, SourceName};
pub use value::{FieldValue, ValueType};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("cannot read {input:?} as {value_type}")]
    InvalidValue { value_type: ValueType, input: String },
}
