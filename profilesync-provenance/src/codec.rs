//! Text form of a [`SourceLog`].
//!
//! One line per field. The current layout is
//!
//! ```text
//! field|source|date|user|5|h.source|h.date|h.user|h.value|h.hash|...
//! ```
//!
//! where `5` is the number of columns per history entry. Two older layouts
//! are still read:
//!
//! ```text
//! field|source|date|user|h.source|h.date|h.user|...   (history without values)
//! field:source                                        (owner only)
//! ```
//!
//! Free-text columns are escaped (`\\`, `\p` for `|`, `\n`, `\r`, `\l` for
//! `<`) so no value can split a line or a column. Lines that contain a raw
//! `<` are leftovers from markup-wrapped storage and are skipped.

use crate::entry::{HistoryEntry, SourceLogEntry, Stamp};
use crate::log::SourceLog;
use chrono::{DateTime, NaiveDateTime, Utc};
use profilesync_types::{FieldName, SourceName};
use tracing::{debug, warn};

/// Maximum length of an encoded log, in characters.
pub const MAX_ENCODED_LEN: usize = 2000;

/// Most history entries per field ever written.
pub const MAX_ENCODED_HISTORY: usize = 10;

const HISTORY_COLUMNS: &str = "5";
const HISTORY_WIDTH: usize = 5;
const LEGACY_HISTORY_WIDTH: usize = 3;
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Result of encoding a log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedLog {
    pub text: String,
    /// History entries per field that fit under the cap.
    pub history_kept: usize,
    /// True when even the history-free form exceeded the cap and the text
    /// was cut.
    pub truncated: bool,
}

/// Encodes with the default caps.
#[must_use]
pub fn encode(log: &SourceLog) -> EncodedLog {
    encode_with(log, MAX_ENCODED_HISTORY, MAX_ENCODED_LEN)
}

/// Encodes keeping at most `max_history` recent history entries per field,
/// shrinking the history until the text is shorter than `max_len`
/// characters. If the history-free text is still too long it is cut to
/// `max_len` characters.
#[must_use]
pub fn encode_with(log: &SourceLog, max_history: usize, max_len: usize) -> EncodedLog {
    let deepest = log.entries().map(|e| e.history.len()).max().unwrap_or(0).min(max_history);

    for kept in (0..=deepest).rev() {
        let text = render(log, kept);
        if text.chars().count() < max_len {
            return EncodedLog {
                text,
                history_kept: kept,
                truncated: false,
            };
        }
    }

    let full = render(log, 0);
    warn!(
        fields = log.len(),
        length = full.chars().count(),
        cap = max_len,
        "source log exceeds cap without history, truncating"
    );
    EncodedLog {
        text: full.chars().take(max_len).collect(),
        history_kept: 0,
        truncated: true,
    }
}

fn render(log: &SourceLog, kept: usize) -> String {
    let mut lines = Vec::with_capacity(log.len());
    for entry in log.entries() {
        let mut cols = vec![
            escape(entry.field.as_str()),
            escape(entry.source.as_str()),
            format_date(entry.updated_at),
            escape(&entry.user),
            HISTORY_COLUMNS.to_string(),
        ];
        for h in entry.recent_history(kept) {
            cols.push(escape(h.source.as_str()));
            cols.push(format_date(h.updated_at));
            cols.push(escape(&h.user));
            cols.push(h.value.as_deref().map(escape).unwrap_or_default());
            cols.push(h.hash.as_deref().map(escape).unwrap_or_default());
        }
        lines.push(cols.join("|"));
    }
    lines.join("\n")
}

/// Parses any of the three layouts. Never fails.
#[must_use]
pub fn decode(text: &str) -> SourceLog {
    let mut log = SourceLog::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() || line.contains('<') {
            continue;
        }
        let parsed = if line.contains('|') {
            parse_columns(line)
        } else {
            parse_owner_only(line)
        };
        match parsed {
            Some(entry) => log.insert(entry),
            None => debug!(line, "skipping unreadable source log line"),
        }
    }
    log
}

fn parse_owner_only(line: &str) -> Option<SourceLogEntry> {
    let (field, source) = line.split_once(':')?;
    let field = unescape(field.trim());
    if field.is_empty() {
        return None;
    }
    Some(SourceLogEntry::new(
        FieldName::new(field),
        Stamp::new(SourceName::new(unescape(source.trim())), None, ""),
    ))
}

fn parse_columns(line: &str) -> Option<SourceLogEntry> {
    let cols: Vec<&str> = line.split('|').collect();
    let field = unescape(cols[0]);
    if field.is_empty() || cols.len() < 2 {
        return None;
    }
    let column = |i: usize| cols.get(i).copied().unwrap_or_default();

    let mut entry = SourceLogEntry::new(
        FieldName::new(field),
        Stamp::new(SourceName::new(unescape(cols[1])), parse_date(column(2)), unescape(column(3))),
    );

    let current = cols.get(4) == Some(&HISTORY_COLUMNS);
    let (start, width) = if current {
        (5, HISTORY_WIDTH)
    } else {
        (4, LEGACY_HISTORY_WIDTH)
    };

    if cols.len() > start {
        for chunk in cols[start..].chunks_exact(width) {
            entry.history.push(HistoryEntry {
                source: SourceName::new(unescape(chunk[0])),
                updated_at: parse_date(chunk[1]),
                user: unescape(chunk[2]),
                value: chunk.get(3).and_then(|v| non_empty(unescape(v))),
                hash: chunk.get(4).and_then(|h| non_empty(unescape(h))),
            });
        }
    }
    Some(entry)
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

fn format_date(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format(DATE_FORMAT).to_string()).unwrap_or_default()
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(s, DATE_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M"))
        .ok()
        .map(|d| d.and_utc())
}

pub(crate) fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '|' => out.push_str("\\p"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '<' => out.push_str("\\l"),
            _ => out.push(c),
        }
    }
    out
}

pub(crate) fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('p') => out.push('|'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('l') => out.push('<'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            // a cut-off escape at the end of a truncated log
            None => {}
        }
    }
    out
}
