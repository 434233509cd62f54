//! Per-(source, profile) recency of real-time updates.

use profilesync_types::{ProfileId, SourceName};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// When each loader last attempted a real-time update of each profile.
///
/// Reads take a shared lock and may race with a concurrent `mark`; a stale
/// read only means one extra update attempt.
#[derive(Debug, Default)]
pub struct RecencyMap {
    attempts: RwLock<HashMap<String, Instant>>,
}

fn key(source: &SourceName, profile: &ProfileId) -> String {
    format!("{source}|{}", profile.index_key())
}

impl RecencyMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when `source` touched `profile` less than `expiry` ago.
    pub async fn is_fresh(&self, source: &SourceName, profile: &ProfileId, expiry: Duration) -> bool {
        self.attempts
            .read()
            .await
            .get(&key(source, profile))
            .is_some_and(|at| at.elapsed() < expiry)
    }

    /// Records an attempt now.
    pub async fn mark(&self, source: &SourceName, profile: &ProfileId) {
        self.attempts.write().await.insert(key(source, profile), Instant::now());
    }

    /// Forgets every attempt.
    pub async fn clear(&self) {
        self.attempts.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.attempts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.attempts.read().await.is_empty()
    }
}
