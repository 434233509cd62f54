use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the orchestrator and merge engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Profiles processed concurrently during a sweep.
    pub max_parallelism: usize,
    /// Deadline for one loader call (bulk load or one profile update), in ms.
    pub loader_timeout_ms: u64,
    /// Recorded as the updating user in source logs.
    pub updating_user: String,
    /// Identity column of the search snapshot, overriding the registry's.
    pub id_key: Option<String>,
}

impl SyncConfig {
    #[must_use]
    pub fn loader_timeout(&self) -> Duration {
        Duration::from_millis(self.loader_timeout_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 8,
            loader_timeout_ms: 60_000,
            updating_user: "profilesync".to_string(),
            id_key: None,
        }
    }
}
