//! Profile model for ProfileSync.
//!
//! Defines the types every other ProfileSync crate depends on:
//! - [`FieldDescriptor`]: one synchronized field, its permitted sources and
//!   their priorities, its history policy and the audiences it feeds
//! - [`FieldRegistry`]: the validated, immutable set of descriptors for one
//!   profile type, built in code or loaded from TOML
//! - [`Profile`]: one identity's field values, provenance and change set
//! - [`ProfileStore`] / [`SearchIndex`]: the ports to the backing stores

mod error;
mod ports;
mod profile;
mod registry;
mod schema;

pub use error::{ModelError, ModelResult};
pub use ports::{ProfileStore, SearchIndex, SearchRow, StoreError, StoreResult, StoredValue};
pub use profile::{LoadTier, Profile};
pub use registry::{DEFAULT_HASH_LOG_KEY, DEFAULT_ID_KEY, FieldRegistry, FieldRegistryBuilder};
pub use schema::{
    AudienceTrigger, BooleanOperator, ComparisonOperator, DEFAULT_LOG_FIELD, FieldDescriptor, LogPolicy,
    SourceRule,
};
