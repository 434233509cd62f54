use async_trait::async_trait;
use profilesync_model::{ProfileStore, StoreError, StoreResult, StoredValue};
use profilesync_types::{FieldValue, ProfileId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, Default)]
struct Attributes {
    multi_valued: bool,
    required: bool,
}

#[derive(Debug, Default)]
struct State {
    profiles: BTreeMap<ProfileId, HashMap<String, FieldValue>>,
    staged: HashMap<ProfileId, Vec<(String, FieldValue)>>,
    attributes: HashMap<String, Attributes>,
    rejected: HashSet<String>,
    commits: usize,
}

/// In-memory [`ProfileStore`].
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    state: Mutex<State>,
}

impl MemoryProfileStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declares store-side attributes for a field key.
    #[must_use]
    pub fn with_attributes(self, key: &str, multi_valued: bool, required: bool) -> Self {
        self.state()
            .attributes
            .insert(key.to_string(), Attributes { multi_valued, required });
        self
    }

    /// Seeds a committed profile.
    pub fn insert(&self, id: &ProfileId, fields: impl IntoIterator<Item = (String, FieldValue)>) {
        self.state()
            .profiles
            .entry(id.clone())
            .or_default()
            .extend(fields);
    }

    /// Makes every write to `key` fail with [`StoreError::Rejected`].
    pub fn reject(&self, key: &str) {
        self.state().rejected.insert(key.to_string());
    }

    /// Committed value of a field.
    #[must_use]
    pub fn value(&self, id: &ProfileId, key: &str) -> Option<FieldValue> {
        self.state().profiles.get(id).and_then(|fields| fields.get(key)).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &ProfileId) -> bool {
        self.state().profiles.contains_key(id)
    }

    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.state().commits
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().profiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().profiles.is_empty()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn profile_exists(&self, id: &ProfileId) -> StoreResult<bool> {
        Ok(self.state().profiles.contains_key(id))
    }

    async fn create_profile(&self, id: &ProfileId) -> StoreResult<()> {
        let mut state = self.state();
        if state.profiles.contains_key(id) {
            return Err(StoreError::AlreadyExists(id.clone()));
        }
        state.profiles.insert(id.clone(), HashMap::new());
        Ok(())
    }

    async fn get_field(&self, id: &ProfileId, key: &str) -> StoreResult<Option<StoredValue>> {
        let state = self.state();
        let fields = state.profiles.get(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let attributes = state.attributes.get(key).copied();
        let value = fields.get(key).cloned();
        if value.is_none() && attributes.is_none() {
            return Ok(None);
        }
        let attributes = attributes.unwrap_or_default();
        Ok(Some(StoredValue {
            value: value.unwrap_or_default(),
            multi_valued: attributes.multi_valued,
            required: attributes.required,
        }))
    }

    async fn set_field(&self, id: &ProfileId, key: &str, value: FieldValue) -> StoreResult<()> {
        let mut state = self.state();
        if !state.profiles.contains_key(id) {
            return Err(StoreError::NotFound(id.clone()));
        }
        if state.rejected.contains(key) {
            return Err(StoreError::Rejected {
                key: key.to_string(),
                reason: "write rejected by store".to_string(),
            });
        }
        state.staged.entry(id.clone()).or_default().push((key.to_string(), value));
        Ok(())
    }

    async fn commit(&self, id: &ProfileId) -> StoreResult<()> {
        let mut state = self.state();
        let staged = state.staged.remove(id).unwrap_or_default();
        let fields = state.profiles.get_mut(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        fields.extend(staged);
        state.commits += 1;
        Ok(())
    }

    async fn list_profiles(&self) -> StoreResult<Vec<ProfileId>> {
        Ok(self.state().profiles.keys().cloned().collect())
    }
}
