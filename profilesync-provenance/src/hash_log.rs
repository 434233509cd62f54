//! Last proposed-value hash per (field, source).
//!
//! Sources flagged to raise their priority when their value changes are
//! compared against the hash of what they proposed last time, not against
//! the field's current value. Stored as one `field|source|hash` line per
//! record.

use crate::codec::{escape, unescape};
use profilesync_types::{FieldName, SourceName};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashLog {
    hashes: BTreeMap<(FieldName, SourceName), String>,
}

impl HashLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, field: &FieldName, source: &SourceName) -> Option<&str> {
        self.hashes.get(&(field.clone(), source.clone())).map(String::as_str)
    }

    /// Records a hash; returns true if it differs from the stored one.
    /// `None` clears the record.
    pub fn set(&mut self, field: &FieldName, source: &SourceName, hash: Option<String>) -> bool {
        let key = (field.clone(), source.clone());
        match hash {
            Some(h) => {
                if self.hashes.get(&key) == Some(&h) {
                    return false;
                }
                self.hashes.insert(key, h);
                true
            }
            None => self.hashes.remove(&key).is_some(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    #[must_use]
    pub fn encode(&self) -> String {
        self.hashes
            .iter()
            .map(|((field, source), hash)| {
                format!("{}|{}|{}", escape(field.as_str()), escape(source.as_str()), escape(hash))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Parses stored hashes, skipping malformed lines.
    #[must_use]
    pub fn decode(text: &str) -> Self {
        let mut log = Self::new();
        for line in text.lines() {
            if line.contains('<') {
                continue;
            }
            let cols: Vec<&str> = line.trim_end_matches('\r').split('|').collect();
            if let [field, source, hash] = cols.as_slice() {
                if field.is_empty() || hash.is_empty() {
                    continue;
                }
                log.hashes.insert(
                    (FieldName::new(unescape(field)), SourceName::new(unescape(source))),
                    unescape(hash),
                );
            }
        }
        log
    }
}
