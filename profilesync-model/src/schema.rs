use profilesync_types::{FieldName, SourceName, ValueType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage key of the source log when a field does not name its own.
pub const DEFAULT_LOG_FIELD: &str = "SourceLog";

/// One source permitted to write a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRule {
    pub source: SourceName,
    /// Lower is better.
    pub priority: u32,
    /// Whether an empty value from this source may clear the field.
    #[serde(default)]
    pub use_if_empty: bool,
    /// Whether a change in this source's own value lets it overwrite a
    /// better source.
    #[serde(default)]
    pub raise_priority_if_changed: bool,
}

impl SourceRule {
    pub fn new(source: impl Into<SourceName>, priority: u32) -> Self {
        Self {
            source: source.into(),
            priority,
            use_if_empty: false,
            raise_priority_if_changed: false,
        }
    }

    #[must_use]
    pub fn use_if_empty(mut self) -> Self {
        self.use_if_empty = true;
        self
    }

    #[must_use]
    pub fn raise_priority_if_changed(mut self) -> Self {
        self.raise_priority_if_changed = true;
        self
    }
}

/// What is remembered when a field changes owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogPolicy {
    pub history_length: usize,
    pub store_value: bool,
    pub store_hash: bool,
    pub store_user: bool,
    pub store_date: bool,
    /// Storage key of the source log this field's provenance lives in.
    pub log_field: FieldName,
}

impl Default for LogPolicy {
    fn default() -> Self {
        Self {
            history_length: 5,
            store_value: false,
            store_hash: false,
            store_user: true,
            store_date: true,
            log_field: FieldName::new(DEFAULT_LOG_FIELD),
        }
    }
}

/// Comparison used by an audience rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOperator {
    #[default]
    #[serde(alias = "=")]
    Equals,
    #[serde(alias = "<>")]
    NotEquals,
    Contains,
}

impl ComparisonOperator {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::NotEquals => "<>",
            Self::Contains => "Contains",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// How an audience's rules combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BooleanOperator {
    #[default]
    And,
    Or,
}

impl fmt::Display for BooleanOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => f.write_str("AND"),
            Self::Or => f.write_str("OR"),
        }
    }
}

/// An audience whose membership depends on a field.
///
/// A change to the field queues the audience for recompilation when no
/// filter is set, when the field is boolean, or when the old or new value
/// contains the filter. Triggers with a filter also describe the audience
/// rule `storage_key <comparison> filter`, see the audience crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceTrigger {
    pub audience: String,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub comparison: ComparisonOperator,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub operator: BooleanOperator,
}

impl AudienceTrigger {
    pub fn new(audience: impl Into<String>) -> Self {
        Self {
            audience: audience.into(),
            filter: None,
            comparison: ComparisonOperator::Equals,
            description: None,
            operator: BooleanOperator::And,
        }
    }

    #[must_use]
    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn not_equal(mut self) -> Self {
        self.comparison = ComparisonOperator::NotEquals;
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn any_of(mut self) -> Self {
        self.operator = BooleanOperator::Or;
        self
    }
}

/// Metadata of one synchronized field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: FieldName,
    /// Key in the authoritative store. Defaults to the field name.
    #[serde(default)]
    pub storage_key: String,
    /// Managed property in the search snapshot. Fields without one are
    /// absent from partially loaded profiles.
    #[serde(default)]
    pub index_key: Option<String>,
    #[serde(default = "default_value_type")]
    pub value_type: ValueType,
    /// Permitted sources in declaration order.
    pub sources: Vec<SourceRule>,
    #[serde(default)]
    pub log: LogPolicy,
    #[serde(default)]
    pub audiences: Vec<AudienceTrigger>,
}

fn default_value_type() -> ValueType {
    ValueType::Text
}

impl FieldDescriptor {
    pub fn new(name: impl Into<FieldName>, value_type: ValueType) -> Self {
        let name = name.into();
        Self {
            storage_key: name.as_str().to_string(),
            name,
            index_key: None,
            value_type,
            sources: Vec::new(),
            log: LogPolicy::default(),
            audiences: Vec::new(),
        }
    }

    /// Shorthand for a text field.
    pub fn text(name: &str) -> Self {
        Self::new(name, ValueType::Text)
    }

    /// Shorthand for a boolean field.
    pub fn bool(name: &str) -> Self {
        Self::new(name, ValueType::Bool)
    }

    /// Shorthand for a numeric field.
    pub fn number(name: &str) -> Self {
        Self::new(name, ValueType::Number)
    }

    /// Shorthand for a date field.
    pub fn date(name: &str) -> Self {
        Self::new(name, ValueType::Date)
    }

    /// Shorthand for a multi-valued field.
    pub fn list(name: &str) -> Self {
        Self::new(name, ValueType::List)
    }

    #[must_use]
    pub fn stored_as(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    #[must_use]
    pub fn indexed_as(mut self, key: impl Into<String>) -> Self {
        self.index_key = Some(key.into());
        self
    }

    #[must_use]
    pub fn source(mut self, rule: SourceRule) -> Self {
        self.sources.push(rule);
        self
    }

    #[must_use]
    pub fn log(mut self, policy: LogPolicy) -> Self {
        self.log = policy;
        self
    }

    #[must_use]
    pub fn audience(mut self, trigger: AudienceTrigger) -> Self {
        self.audiences.push(trigger);
        self
    }

    /// The rule for `source`, if it may write this field.
    #[must_use]
    pub fn rule_for(&self, source: &str) -> Option<&SourceRule> {
        self.sources.iter().find(|r| r.source == source)
    }

    /// Rank of a source: its priority, then its declaration position.
    /// Lower ranks win.
    #[must_use]
    pub fn rank(&self, source: &str) -> Option<(u32, usize)> {
        self.sources
            .iter()
            .position(|r| r.source == source)
            .map(|i| (self.sources[i].priority, i))
    }

    /// Whether `current` strictly outranks `proposed`. A source the field
    /// does not list never outranks anyone.
    #[must_use]
    pub fn outranks(&self, current: &str, proposed: &str) -> bool {
        match (self.rank(current), self.rank(proposed)) {
            (Some(c), Some(p)) => c < p,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}
