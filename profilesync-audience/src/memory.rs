//! In-process audience store.

use crate::error::AudienceStoreError;
use crate::store::{AudienceId, AudienceStore, LiveAudience};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct State {
    audiences: BTreeMap<AudienceId, LiveAudience>,
    mutations: u64,
    compiled: Vec<String>,
    /// Compile calls that still report a running job.
    busy_compiles: usize,
    stops: usize,
    failing: HashSet<String>,
}

/// Audience store held in memory. Used by tests and by dry runs of the
/// command-line tool, which load and save its contents as JSON.
#[derive(Debug, Default)]
pub struct MemoryAudienceStore {
    state: Mutex<State>,
}

impl MemoryAudienceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_audiences(audiences: Vec<LiveAudience>) -> Self {
        let store = Self::new();
        store.state().audiences = audiences.into_iter().map(|a| (a.id, a)).collect();
        store
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let audiences: Vec<LiveAudience> = serde_json::from_str(json)?;
        Ok(Self::with_audiences(audiences))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.audiences())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current audiences, sorted by name.
    #[must_use]
    pub fn audiences(&self) -> Vec<LiveAudience> {
        let mut list: Vec<LiveAudience> = self.state().audiences.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<LiveAudience> {
        self.state().audiences.values().find(|a| a.name == name).cloned()
    }

    /// Number of create/rename/commit/remove calls that succeeded.
    #[must_use]
    pub fn mutation_count(&self) -> u64 {
        self.state().mutations
    }

    /// Names compiled so far, in order.
    #[must_use]
    pub fn compiled(&self) -> Vec<String> {
        self.state().compiled.clone()
    }

    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.state().stops
    }

    /// Makes the next `calls` compile requests fail as if another job were
    /// running, until `stop_compilation` is called.
    pub fn simulate_running_job(&self, calls: usize) {
        self.state().busy_compiles = calls;
    }

    /// Makes every mutation of `name` fail with a backend error.
    pub fn fail_on(&self, name: &str) {
        self.state().failing.insert(name.to_string());
    }

    fn check(state: &State, name: &str) -> Result<(), AudienceStoreError> {
        if state.failing.contains(name) {
            return Err(AudienceStoreError::Backend(format!("injected failure for '{name}'")));
        }
        Ok(())
    }
}

#[async_trait]
impl AudienceStore for MemoryAudienceStore {
    async fn list(&self) -> Result<Vec<LiveAudience>, AudienceStoreError> {
        Ok(self.state().audiences.values().cloned().collect())
    }

    async fn create(&self, name: &str, description: &str) -> Result<LiveAudience, AudienceStoreError> {
        let mut state = self.state();
        Self::check(&state, name)?;
        if state.audiences.values().any(|a| a.name == name) {
            return Err(AudienceStoreError::AlreadyExists(name.to_string()));
        }
        let audience = LiveAudience::new(name, description);
        state.audiences.insert(audience.id, audience.clone());
        state.mutations += 1;
        Ok(audience)
    }

    async fn rename(&self, id: AudienceId, name: &str) -> Result<(), AudienceStoreError> {
        let mut state = self.state();
        Self::check(&state, name)?;
        if state.audiences.values().any(|a| a.name == name && a.id != id) {
            return Err(AudienceStoreError::AlreadyExists(name.to_string()));
        }
        let current = state
            .audiences
            .get(&id)
            .map(|a| a.name.clone())
            .ok_or_else(|| AudienceStoreError::NotFound(id.to_string()))?;
        Self::check(&state, &current)?;
        if let Some(audience) = state.audiences.get_mut(&id) {
            audience.name = name.to_string();
        }
        state.mutations += 1;
        Ok(())
    }

    async fn commit(&self, audience: &LiveAudience) -> Result<(), AudienceStoreError> {
        let mut state = self.state();
        Self::check(&state, &audience.name)?;
        let stored = state
            .audiences
            .get_mut(&audience.id)
            .ok_or_else(|| AudienceStoreError::NotFound(audience.name.clone()))?;
        *stored = audience.clone();
        state.mutations += 1;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), AudienceStoreError> {
        let mut state = self.state();
        Self::check(&state, name)?;
        let id = state
            .audiences
            .values()
            .find(|a| a.name == name)
            .map(|a| a.id)
            .ok_or_else(|| AudienceStoreError::NotFound(name.to_string()))?;
        state.audiences.remove(&id);
        state.mutations += 1;
        Ok(())
    }

    async fn compile(&self, name: &str) -> Result<(), AudienceStoreError> {
        let mut state = self.state();
        if state.busy_compiles > 0 {
            state.busy_compiles -= 1;
            return Err(AudienceStoreError::CompilationInProgress);
        }
        Self::check(&state, name)?;
        if !state.audiences.values().any(|a| a.name == name) {
            return Err(AudienceStoreError::NotFound(name.to_string()));
        }
        state.compiled.push(name.to_string());
        Ok(())
    }

    async fn stop_compilation(&self) -> Result<(), AudienceStoreError> {
        let mut state = self.state();
        state.busy_compiles = 0;
        state.stops += 1;
        Ok(())
    }
}
