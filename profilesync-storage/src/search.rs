use async_trait::async_trait;
use profilesync_model::{SearchIndex, SearchRow, StoreResult};
use std::sync::{Mutex, PoisonError};

/// A [`SearchIndex`] serving rows set by the caller.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    rows: Mutex<Vec<SearchRow>>,
}

impl MemorySearchIndex {
    #[must_use]
    pub fn new(rows: Vec<SearchRow>) -> Self {
        Self { rows: Mutex::new(rows) }
    }

    /// Adds a row built from `(managed property, value)` pairs.
    pub fn push(&self, pairs: &[(&str, &str)]) {
        let row = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).push(row);
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn snapshot(&self) -> StoreResult<Vec<SearchRow>> {
        Ok(self.rows.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }
}
