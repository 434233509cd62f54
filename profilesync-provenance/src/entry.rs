//! Provenance entries.

use chrono::{DateTime, Utc};
use profilesync_types::{FieldName, SourceName};
use serde::{Deserialize, Serialize};

/// Who wrote a field, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stamp {
    pub source: SourceName,
    /// Absent when the field's log policy does not store dates, and on
    /// records written by the oldest log layout.
    pub updated_at: Option<DateTime<Utc>>,
    /// Empty when the log policy does not store users.
    pub user: String,
}

impl Stamp {
    #[must_use]
    pub fn new(source: impl Into<SourceName>, updated_at: Option<DateTime<Utc>>, user: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            updated_at,
            user: user.into(),
        }
    }
}

/// Value details archived with a history entry, as allowed by the log
/// policy of the field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub value: Option<String>,
    pub hash: Option<String>,
}

/// One previous owner of a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub source: SourceName,
    pub updated_at: Option<DateTime<Utc>>,
    pub user: String,
    pub value: Option<String>,
    pub hash: Option<String>,
}

/// Provenance of one field: its current owner and a bounded history,
/// oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLogEntry {
    pub field: FieldName,
    pub source: SourceName,
    pub updated_at: Option<DateTime<Utc>>,
    pub user: String,
    pub history: Vec<HistoryEntry>,
}

impl SourceLogEntry {
    /// Creates an entry with no history.
    #[must_use]
    pub fn new(field: impl Into<FieldName>, stamp: Stamp) -> Self {
        Self {
            field: field.into(),
            source: stamp.source,
            updated_at: stamp.updated_at,
            user: stamp.user,
            history: Vec::new(),
        }
    }

    /// Returns the current owner as a stamp.
    #[must_use]
    pub fn stamp(&self) -> Stamp {
        Stamp {
            source: self.source.clone(),
            updated_at: self.updated_at,
            user: self.user.clone(),
        }
    }

    /// Moves the current owner into history and takes `stamp` as the new
    /// owner. History is trimmed from the oldest end to `history_length`.
    pub fn supersede(&mut self, stamp: Stamp, previous: Captured, history_length: usize) {
        let archived = HistoryEntry {
            source: std::mem::replace(&mut self.source, stamp.source),
            updated_at: std::mem::replace(&mut self.updated_at, stamp.updated_at),
            user: std::mem::replace(&mut self.user, stamp.user),
            value: previous.value,
            hash: previous.hash,
        };
        self.history.push(archived);
        truncate_oldest(&mut self.history, history_length);
    }

    /// The last `n` history entries, oldest first.
    #[must_use]
    pub fn recent_history(&self, n: usize) -> &[HistoryEntry] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }
}

pub(crate) fn truncate_oldest<T>(items: &mut Vec<T>, limit: usize) {
    if items.len() > limit {
        let excess = items.len() - limit;
        items.drain(..excess);
    }
}
