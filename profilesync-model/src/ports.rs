//! Ports to the backing stores.
//!
//! The sync engine reaches the authoritative profile store and the search
//! snapshot only through these traits. Reference adapters live in
//! `profilesync-storage`.

use async_trait::async_trait;
use profilesync_types::{FieldValue, ProfileId};
use std::collections::HashMap;
use thiserror::Error;

/// Errors reported by a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("profile not found: {0}")]
    NotFound(ProfileId),

    #[error("profile already exists: {0}")]
    AlreadyExists(ProfileId),

    #[error("field '{key}' rejected: {reason}")]
    Rejected { key: String, reason: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A field as held by the authoritative store, with the store-side
/// attributes that affect how it may be written.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoredValue {
    pub value: FieldValue,
    pub multi_valued: bool,
    pub required: bool,
}

/// The authoritative, writable profile store.
///
/// Writes made with [`set_field`](Self::set_field) become visible once
/// [`commit`](Self::commit) succeeds.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn profile_exists(&self, id: &ProfileId) -> StoreResult<bool>;

    async fn create_profile(&self, id: &ProfileId) -> StoreResult<()>;

    /// Reads one field. `Ok(None)` means the store has no such key for the
    /// profile.
    async fn get_field(&self, id: &ProfileId, key: &str) -> StoreResult<Option<StoredValue>>;

    async fn set_field(&self, id: &ProfileId, key: &str, value: FieldValue) -> StoreResult<()>;

    async fn commit(&self, id: &ProfileId) -> StoreResult<()>;

    async fn list_profiles(&self) -> StoreResult<Vec<ProfileId>>;
}

/// One flattened search result: managed property name to string value.
pub type SearchRow = HashMap<String, String>;

/// A read-only, possibly stale, flattened view of every profile.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn snapshot(&self) -> StoreResult<Vec<SearchRow>>;
}
