//! Declared audiences.

use profilesync_model::{BooleanOperator, ComparisonOperator};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One `field <op> value` comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub field: String,
    pub op: ComparisonOperator,
    pub value: String,
}

impl Rule {
    pub fn new(field: impl Into<String>, op: ComparisonOperator, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' {} '{}'", quote(&self.field), self.op, quote(&self.value))
    }
}

fn quote(s: &str) -> String {
    s.replace('\'', "''")
}

/// Element of the linear rule form stored by audience stores:
/// comparisons interleaved with connectors and parentheses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleToken {
    Comparison(Rule),
    Open,
    Close,
    And,
    Or,
}

impl RuleToken {
    pub(crate) fn connector(op: BooleanOperator) -> Self {
        match op {
            BooleanOperator::And => Self::And,
            BooleanOperator::Or => Self::Or,
        }
    }
}

impl fmt::Display for RuleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Comparison(rule) => rule.fmt(f),
            Self::Open => f.write_str("("),
            Self::Close => f.write_str(")"),
            Self::And => f.write_str("AND"),
            Self::Or => f.write_str("OR"),
        }
    }
}

/// Desired state of one audience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub boolean_operator: BooleanOperator,
    #[serde(default)]
    pub rules: Vec<RuleToken>,
    #[serde(default)]
    pub previous_names: Vec<String>,
    #[serde(default)]
    pub is_obsolete: bool,
    #[serde(default)]
    pub should_delete: bool,
}

impl AudienceSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            boolean_operator: BooleanOperator::And,
            rules: Vec::new(),
            previous_names: Vec::new(),
            is_obsolete: false,
            should_delete: false,
        }
    }

    /// Description to store; the name when none is declared.
    #[must_use]
    pub fn effective_description(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.name)
    }

    #[must_use]
    pub fn with_rules(mut self, rules: Vec<RuleToken>, operator: BooleanOperator) -> Self {
        self.rules = rules;
        self.boolean_operator = operator;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.previous_names.push(previous.into());
        self
    }

    #[must_use]
    pub fn obsolete(mut self) -> Self {
        self.is_obsolete = true;
        self
    }

    #[must_use]
    pub fn delete(mut self) -> Self {
        self.should_delete = true;
        self
    }

    /// Rules rendered back into the rule language.
    #[must_use]
    pub fn rule_text(&self) -> String {
        self.rules.iter().map(ToString::to_string).collect::<Vec<_>>().join(" ")
    }
}
