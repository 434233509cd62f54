//! In-memory profile.

use profilesync_provenance::{HashLog, SourceLog, SourceLogEntry};
use profilesync_types::{FieldName, FieldValue, ProfileId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// How much of a profile is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadTier {
    /// Built from a search snapshot; read-only.
    Partial,
    /// Built from the authoritative store; writable.
    Full,
}

/// One identity's synchronized fields, their provenance and the set of
/// fields changed since the last save.
///
/// Fields are keyed by logical field name; source logs by their own
/// storage key (several fields usually share one log).
#[derive(Debug, Clone)]
pub struct Profile {
    id: ProfileId,
    tier: LoadTier,
    fields: HashMap<FieldName, FieldValue>,
    logs: BTreeMap<FieldName, SourceLog>,
    hash_log: HashLog,
    hash_log_changed: bool,
    changed: BTreeSet<FieldName>,
    change_count: u64,
}

impl Profile {
    #[must_use]
    pub fn new(id: ProfileId, tier: LoadTier) -> Self {
        Self {
            id,
            tier,
            fields: HashMap::new(),
            logs: BTreeMap::new(),
            hash_log: HashLog::new(),
            hash_log_changed: false,
            changed: BTreeSet::new(),
            change_count: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &ProfileId {
        &self.id
    }

    #[must_use]
    pub fn tier(&self) -> LoadTier {
        self.tier
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.tier == LoadTier::Full
    }

    /// Current value of a field; absent fields are `None`.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Current value of a field, treating absent as empty.
    #[must_use]
    pub fn value(&self, field: &str) -> FieldValue {
        self.fields.get(field).cloned().unwrap_or_default()
    }

    pub fn values(&self) -> impl Iterator<Item = (&FieldName, &FieldValue)> {
        self.fields.iter()
    }

    /// Writes a field and marks it changed.
    pub fn set(&mut self, field: &FieldName, value: FieldValue) {
        self.fields.insert(field.clone(), value);
        self.mark_changed(field);
    }

    /// Marks a field (or log storage key) as changed.
    pub fn mark_changed(&mut self, field: &FieldName) {
        self.changed.insert(field.clone());
        self.change_count += 1;
    }

    /// Source log stored under `log_field`, if loaded.
    #[must_use]
    pub fn log(&self, log_field: &str) -> Option<&SourceLog> {
        self.logs.get(log_field)
    }

    /// Source log stored under `log_field`, created empty if missing.
    /// Callers mark the log field changed themselves.
    pub fn log_mut(&mut self, log_field: &FieldName) -> &mut SourceLog {
        self.logs.entry(log_field.clone()).or_default()
    }

    pub fn logs(&self) -> impl Iterator<Item = (&FieldName, &SourceLog)> {
        self.logs.iter()
    }

    /// Provenance of `field` in the log stored under `log_field`.
    #[must_use]
    pub fn provenance(&self, log_field: &str, field: &str) -> Option<&SourceLogEntry> {
        self.logs.get(log_field).and_then(|log| log.get(field))
    }

    #[must_use]
    pub fn hash_log(&self) -> &HashLog {
        &self.hash_log
    }

    pub fn hash_log_mut(&mut self) -> &mut HashLog {
        &mut self.hash_log
    }

    pub fn mark_hash_log_changed(&mut self) {
        self.hash_log_changed = true;
        self.change_count += 1;
    }

    #[must_use]
    pub fn hash_log_changed(&self) -> bool {
        self.hash_log_changed
    }

    /// Fields and log keys changed since the last save.
    #[must_use]
    pub fn changed_fields(&self) -> &BTreeSet<FieldName> {
        &self.changed
    }

    #[must_use]
    pub fn is_changed(&self, field: &str) -> bool {
        self.changed.contains(field)
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty() || self.hash_log_changed
    }

    /// Monotonic counter bumped by every change; compare before and after
    /// a step to learn whether it changed anything.
    #[must_use]
    pub fn change_count(&self) -> u64 {
        self.change_count
    }

    /// Forgets the change set after a successful save.
    pub fn clear_changes(&mut self) {
        self.changed.clear();
        self.hash_log_changed = false;
    }

    // ── Loading ─────────────────────────────────────────────────

    /// Sets a field as read from a store, without change tracking.
    pub fn load_value(&mut self, field: FieldName, value: FieldValue) {
        self.fields.insert(field, value);
    }

    /// Sets a source log as read from a store, without change tracking.
    pub fn load_log(&mut self, log_field: FieldName, log: SourceLog) {
        self.logs.insert(log_field, log);
    }

    /// Sets the hash log as read from a store, without change tracking.
    pub fn load_hash_log(&mut self, hash_log: HashLog) {
        self.hash_log = hash_log;
    }

    /// Replaces the loaded state with `full`, keeping this profile's
    /// pending changes on top. Used to promote a partial profile.
    pub fn promote_from(&mut self, full: Profile) {
        let pending: Vec<(FieldName, FieldValue)> = self
            .changed
            .iter()
            .filter_map(|f| self.fields.get(f).map(|v| (f.clone(), v.clone())))
            .collect();
        self.fields = full.fields;
        self.logs = full.logs;
        self.hash_log = full.hash_log;
        for (field, value) in pending {
            self.fields.insert(field, value);
        }
        self.tier = LoadTier::Full;
    }
}
