//! Loading, promoting and saving profiles through the store ports.

use crate::error::{SyncError, SyncResult};
use profilesync_model::{FieldRegistry, LoadTier, Profile, ProfileStore, SearchRow, StoreError, StoredValue};
use profilesync_provenance::{HashLog, SourceLog};
use profilesync_types::{FieldValue, ProfileId, ValueType};
use std::sync::Arc;
use tracing::{debug, warn};

/// Maps profiles to and from the backing stores using the field registry.
pub struct ProfileRepository {
    store: Arc<dyn ProfileStore>,
    registry: Arc<FieldRegistry>,
    id_key: String,
}

impl ProfileRepository {
    pub fn new(store: Arc<dyn ProfileStore>, registry: Arc<FieldRegistry>) -> Self {
        let id_key = registry.id_key().to_string();
        Self { store, registry, id_key }
    }

    /// Reads partial profiles' identity from `key` instead of the
    /// registry's identity column.
    #[must_use]
    pub fn with_id_key(mut self, key: impl Into<String>) -> Self {
        self.id_key = key.into();
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ProfileStore> {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<FieldRegistry> {
        &self.registry
    }

    /// Loads a writable profile. A profile missing from the store loads
    /// empty and is created on first save.
    pub async fn load_full(&self, id: &ProfileId) -> SyncResult<Profile> {
        let mut profile = Profile::new(id.clone(), LoadTier::Full);
        if !self.store.profile_exists(id).await? {
            debug!(profile = %id, "profile not in store, starting empty");
            return Ok(profile);
        }

        for descriptor in self.registry.fields() {
            let Some(stored) = self.store.get_field(id, &descriptor.storage_key).await? else {
                continue;
            };
            match stored.value.coerce(descriptor.value_type) {
                Ok(value) => profile.load_value(descriptor.name.clone(), value),
                Err(e) => warn!(profile = %id, field = %descriptor.name, error = %e, "unreadable stored value ignored"),
            }
        }
        for log_field in self.registry.log_fields() {
            if let Some(text) = self.read_text(id, log_field.as_str()).await? {
                profile.load_log(log_field, SourceLog::decode(&text));
            }
        }
        if let Some(text) = self.read_text(id, self.registry.hash_log_key()).await? {
            profile.load_hash_log(HashLog::decode(&text));
        }
        Ok(profile)
    }

    async fn read_text(&self, id: &ProfileId, key: &str) -> SyncResult<Option<String>> {
        let stored = self.store.get_field(id, key).await?;
        Ok(stored.map(|s| s.value.to_comparable()).filter(|t| !t.is_empty()))
    }

    /// Builds a read-only profile from a search snapshot row. Rows without
    /// an identity are skipped with a warning.
    pub fn load_partial(&self, row: &SearchRow) -> Option<Profile> {
        let Some(id) = row.get(&self.id_key).and_then(|raw| ProfileId::parse(raw).ok()) else {
            warn!(id_key = %self.id_key, "search row without identity skipped");
            return None;
        };
        let mut profile = Profile::new(id, LoadTier::Partial);
        for descriptor in self.registry.fields() {
            let Some(raw) = descriptor.index_key.as_deref().and_then(|key| row.get(key)) else {
                continue;
            };
            match FieldValue::parse_as(descriptor.value_type, raw) {
                Ok(value) => profile.load_value(descriptor.name.clone(), value),
                Err(e) => warn!(profile = %profile.id(), field = %descriptor.name, error = %e, "unreadable indexed value ignored"),
            }
        }
        Some(profile)
    }

    /// Loads every profile the store lists, fully.
    pub async fn load_all(&self) -> SyncResult<Vec<Profile>> {
        let ids = self.store.list_profiles().await?;
        let mut profiles = Vec::with_capacity(ids.len());
        for id in &ids {
            profiles.push(self.load_full(id).await?);
        }
        Ok(profiles)
    }

    /// Upgrades a partial profile to a full one, keeping pending changes.
    /// Full profiles are left alone.
    pub async fn promote(&self, profile: &mut Profile) -> SyncResult<()> {
        if profile.is_full() {
            return Ok(());
        }
        let full = self.load_full(profile.id()).await?;
        profile.promote_from(full);
        debug!(profile = %profile.id(), "profile promoted to full");
        Ok(())
    }

    /// Writes changed fields, source logs and the hash log, then commits.
    /// Returns `false` when there was nothing to save. On failure the
    /// profile keeps its change set.
    pub async fn save(&self, profile: &mut Profile) -> SyncResult<bool> {
        if !profile.has_changes() {
            return Ok(false);
        }
        if !profile.is_full() {
            return Err(crate::MergeError::PartialProfile(profile.id().clone()).into());
        }
        let id = profile.id().clone();
        let mut last = (String::new(), String::new());
        match self.write_changes(profile, &mut last).await {
            Ok(()) => {
                profile.clear_changes();
                debug!(profile = %id, "profile saved");
                Ok(true)
            }
            Err(error) => {
                warn!(profile = %id, field = %last.0, value = %last.1, error = %error, "profile save failed");
                Err(SyncError::Save {
                    profile: id,
                    field: last.0,
                    value: last.1,
                    error,
                })
            }
        }
    }

    async fn write_changes(&self, profile: &Profile, last: &mut (String, String)) -> Result<(), StoreError> {
        let id = profile.id();
        if !self.store.profile_exists(id).await? {
            self.store.create_profile(id).await?;
        }

        for descriptor in self.registry.fields() {
            if !profile.is_changed(descriptor.name.as_str()) {
                continue;
            }
            let value = profile.value(descriptor.name.as_str());
            let key = &descriptor.storage_key;
            *last = (key.clone(), value.to_comparable());
            let attributes = self.store.get_field(id, key).await?.unwrap_or_default();
            let Some(value) = prepare(value, descriptor.value_type, &attributes) else {
                debug!(profile = %id, field = %key, "empty value not written to required field");
                continue;
            };
            self.store.set_field(id, key, value).await?;
        }

        for (log_field, log) in profile.logs() {
            if !profile.is_changed(log_field.as_str()) {
                continue;
            }
            let encoded = log.encode();
            if encoded.truncated {
                warn!(profile = %id, field = %log_field, "source log truncated on save");
            }
            *last = (log_field.to_string(), encoded.text.clone());
            self.store.set_field(id, log_field.as_str(), FieldValue::Text(encoded.text)).await?;
        }

        if profile.hash_log_changed() {
            let key = self.registry.hash_log_key();
            let text = profile.hash_log().encode();
            *last = (key.to_string(), text.clone());
            self.store.set_field(id, key, FieldValue::Text(text)).await?;
        }

        self.store.commit(id).await
    }
}

/// Shapes a value for the store: empty values never overwrite required
/// fields, and lists are flattened for single-valued fields.
fn prepare(value: FieldValue, value_type: ValueType, attributes: &StoredValue) -> Option<FieldValue> {
    if value.is_empty() && attributes.required {
        return None;
    }
    match value {
        FieldValue::List(_) if value_type == ValueType::List && !attributes.multi_valued => {
            Some(FieldValue::Text(value.to_comparable()))
        }
        other => Some(other),
    }
}
