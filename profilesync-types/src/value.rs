//! Typed field values and their string codec.
//!
//! Change detection in the merge engine compares values by their
//! stringified form, so [`FieldValue::to_comparable`] is the canonical
//! rendering and must stay stable across releases.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator used when a list value is flattened into one string.
pub const LIST_SEPARATOR: char = ';';

/// The declared type of a synchronized field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Text,
    Bool,
    Number,
    Date,
    List,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::Date => "date",
            Self::List => "list",
        };
        f.write_str(s)
    }
}

/// The value of one profile field.
///
/// `Empty` and `Text("")` are both "empty" for merge purposes; see
/// [`FieldValue::is_empty`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    #[default]
    Empty,
    Text(String),
    Bool(bool),
    Number(f64),
    Date(DateTime<Utc>),
    List(Vec<String>),
}

impl FieldValue {
    /// Returns true for absent values, empty strings and empty lists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(s) => s.is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Bool(_) | Self::Number(_) | Self::Date(_) => false,
        }
    }

    /// Canonical string form used for change detection and hashing.
    #[must_use]
    pub fn to_comparable(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::Date(d) => d.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            Self::List(items) => items.join(&LIST_SEPARATOR.to_string()),
        }
    }

    /// Returns the text content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean content, if this is a boolean value.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the list items, if this is a list value.
    #[must_use]
    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Reads a flattened string (search snapshot, legacy store column) as
    /// the given type. Empty input is always [`FieldValue::Empty`].
    pub fn parse_as(value_type: ValueType, input: &str) -> crate::Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::Empty);
        }
        let invalid = || crate::Error::InvalidValue {
            value_type,
            input: input.to_string(),
        };
        match value_type {
            ValueType::Text => Ok(Self::Text(input.to_string())),
            ValueType::Bool => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Self::Bool(true)),
                "false" | "0" | "no" => Ok(Self::Bool(false)),
                _ => Err(invalid()),
            },
            ValueType::Number => trimmed.parse::<f64>().map(Self::Number).map_err(|_| invalid()),
            ValueType::Date => parse_date(trimmed).map(Self::Date).ok_or_else(invalid),
            ValueType::List => Ok(Self::List(
                trimmed
                    .split(LIST_SEPARATOR)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
        }
    }

    /// Converts a value read from a store into the declared type. Values
    /// that already match are returned unchanged; text is re-parsed.
    pub fn coerce(self, value_type: ValueType) -> crate::Result<Self> {
        match (&self, value_type) {
            (Self::Empty, _)
            | (Self::Text(_), ValueType::Text)
            | (Self::Bool(_), ValueType::Bool)
            | (Self::Number(_), ValueType::Number)
            | (Self::Date(_), ValueType::Date)
            | (Self::List(_), ValueType::List) => Ok(self),
            (Self::Text(s), _) => Self::parse_as(value_type, s),
            (_, ValueType::Text) => Ok(Self::Text(self.to_comparable())),
            (_, ValueType::List) => Ok(Self::List(vec![self.to_comparable()])),
            _ => Err(crate::Error::InvalidValue {
                value_type,
                input: self.to_comparable(),
            }),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_comparable())
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn parse_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(d) = DateTime::parse_from_rfc3339(s) {
        return Some(d.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(d) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(d.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Empty, Into::into)
    }
}
