//! The per-profile source log.

use crate::codec::{self, EncodedLog};
use crate::entry::{Captured, SourceLogEntry, Stamp};
use profilesync_types::{FieldName, SourceName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// Provenance of every field sharing one log storage key, keyed by field
/// name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLog {
    entries: BTreeMap<FieldName, SourceLogEntry>,
}

impl SourceLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&SourceLogEntry> {
        self.entries.get(field)
    }

    /// Current owner of a field, if the field has ever been written.
    #[must_use]
    pub fn source_of(&self, field: &str) -> Option<&SourceName> {
        self.entries.get(field).map(|e| &e.source)
    }

    /// Replaces the entry for its field.
    pub fn insert(&mut self, entry: SourceLogEntry) {
        self.entries.insert(entry.field.clone(), entry);
    }

    /// Records a new owner for `field`. The previous owner, if any, is
    /// archived into history together with `previous`; the history never
    /// exceeds `history_length`.
    pub fn record(&mut self, field: &FieldName, stamp: Stamp, previous: Captured, history_length: usize) -> &SourceLogEntry {
        match self.entries.entry(field.clone()) {
            Entry::Occupied(o) => {
                let entry = o.into_mut();
                entry.supersede(stamp, previous, history_length);
                entry
            }
            Entry::Vacant(v) => v.insert(SourceLogEntry::new(field.clone(), stamp)),
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &SourceLogEntry> {
        self.entries.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encodes the log into its bounded text form.
    #[must_use]
    pub fn encode(&self) -> EncodedLog {
        codec::encode(self)
    }

    /// Parses a stored log. Never fails; unreadable lines are skipped.
    #[must_use]
    pub fn decode(text: &str) -> Self {
        codec::decode(text)
    }
}

impl FromIterator<SourceLogEntry> for SourceLog {
    fn from_iter<I: IntoIterator<Item = SourceLogEntry>>(iter: I) -> Self {
        let mut log = Self::new();
        for entry in iter {
            log.insert(entry);
        }
        log
    }
}
