//! Port to the live audience store.

use crate::error::AudienceStoreError;
use crate::spec::RuleToken;
use async_trait::async_trait;
use profilesync_model::BooleanOperator;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a live audience; survives renames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AudienceId(Uuid);

impl AudienceId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for AudienceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AudienceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An audience as it exists in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveAudience {
    pub id: AudienceId,
    pub name: String,
    pub description: String,
    pub operator: BooleanOperator,
    pub rules: Vec<RuleToken>,
}

impl LiveAudience {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: AudienceId::new(),
            name: name.into(),
            description: description.into(),
            operator: BooleanOperator::And,
            rules: Vec::new(),
        }
    }
}

/// The store that owns live audiences and computes their membership.
#[async_trait]
pub trait AudienceStore: Send + Sync {
    async fn list(&self) -> Result<Vec<LiveAudience>, AudienceStoreError>;

    /// Creates an empty audience.
    async fn create(&self, name: &str, description: &str) -> Result<LiveAudience, AudienceStoreError>;

    async fn rename(&self, id: AudienceId, name: &str) -> Result<(), AudienceStoreError>;

    /// Persists description, operator and rules.
    async fn commit(&self, audience: &LiveAudience) -> Result<(), AudienceStoreError>;

    async fn remove(&self, name: &str) -> Result<(), AudienceStoreError>;

    /// Recomputes membership. Fails with
    /// [`AudienceStoreError::CompilationInProgress`] while another job runs.
    async fn compile(&self, name: &str) -> Result<(), AudienceStoreError>;

    /// Stops whichever compilation job is running.
    async fn stop_compilation(&self) -> Result<(), AudienceStoreError>;
}
