//! The validated set of field descriptors for one profile type.

use crate::error::{ModelError, ModelResult};
use crate::schema::FieldDescriptor;
use profilesync_types::FieldName;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Storage key of the per-profile hash log.
pub const DEFAULT_HASH_LOG_KEY: &str = "HashLog";

/// Identity column of the search snapshot.
pub const DEFAULT_ID_KEY: &str = "AccountName";

/// Immutable registry of field descriptors. Built once, then shared
/// read-only behind an `Arc`.
#[derive(Debug, Clone)]
pub struct FieldRegistry {
    profile_type: String,
    hash_log_key: String,
    id_key: String,
    fields: Vec<FieldDescriptor>,
    by_name: HashMap<FieldName, usize>,
}

impl FieldRegistry {
    pub fn builder(profile_type: impl Into<String>) -> FieldRegistryBuilder {
        FieldRegistryBuilder {
            profile_type: profile_type.into(),
            hash_log_key: DEFAULT_HASH_LOG_KEY.to_string(),
            id_key: DEFAULT_ID_KEY.to_string(),
            fields: Vec::new(),
        }
    }

    /// Loads a registry from a TOML document:
    ///
    /// ```toml
    /// profile_type = "UserProfile"
    ///
    /// [[fields]]
    /// name = "Title"
    /// index_key = "JobTitle"
    /// sources = [{ source = "HR", priority = 1 }]
    /// ```
    pub fn from_toml(text: &str) -> ModelResult<Self> {
        let doc: RegistryDocument = toml::from_str(text)?;
        let mut builder = Self::builder(doc.profile_type);
        if let Some(key) = doc.hash_log_key {
            builder = builder.hash_log_key(key);
        }
        if let Some(key) = doc.id_key {
            builder = builder.id_key(key);
        }
        for field in doc.fields {
            builder = builder.field(field);
        }
        builder.build()
    }

    #[must_use]
    pub fn profile_type(&self) -> &str {
        &self.profile_type
    }

    #[must_use]
    pub fn hash_log_key(&self) -> &str {
        &self.hash_log_key
    }

    #[must_use]
    pub fn id_key(&self) -> &str {
        &self.id_key
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    /// Descriptors in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Distinct source-log storage keys used by the registered fields.
    #[must_use]
    pub fn log_fields(&self) -> BTreeSet<FieldName> {
        self.fields.iter().map(|f| f.log.log_field.clone()).collect()
    }
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    profile_type: String,
    #[serde(default)]
    hash_log_key: Option<String>,
    #[serde(default)]
    id_key: Option<String>,
    #[serde(default)]
    fields: Vec<FieldDescriptor>,
}

/// Builder for [`FieldRegistry`]; validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct FieldRegistryBuilder {
    profile_type: String,
    hash_log_key: String,
    id_key: String,
    fields: Vec<FieldDescriptor>,
}

impl FieldRegistryBuilder {
    #[must_use]
    pub fn field(mut self, descriptor: FieldDescriptor) -> Self {
        self.fields.push(descriptor);
        self
    }

    #[must_use]
    pub fn hash_log_key(mut self, key: impl Into<String>) -> Self {
        self.hash_log_key = key.into();
        self
    }

    #[must_use]
    pub fn id_key(mut self, key: impl Into<String>) -> Self {
        self.id_key = key.into();
        self
    }

    pub fn build(self) -> ModelResult<FieldRegistry> {
        let invalid = |msg: String| Err(ModelError::InvalidRegistry(msg));

        let mut fields = self.fields;
        let mut by_name = HashMap::with_capacity(fields.len());
        let mut storage_keys = HashSet::new();

        for (i, field) in fields.iter_mut().enumerate() {
            if field.name.as_str().trim().is_empty() {
                return invalid(format!("field #{i} has no name"));
            }
            if field.storage_key.is_empty() {
                field.storage_key = field.name.as_str().to_string();
            }
            if by_name.insert(field.name.clone(), i).is_some() {
                return invalid(format!("field '{}' is declared twice", field.name));
            }
            if !storage_keys.insert(field.storage_key.clone()) {
                return invalid(format!("storage key '{}' is used by two fields", field.storage_key));
            }
            if field.sources.is_empty() {
                return invalid(format!("field '{}' has no sources", field.name));
            }
            let mut seen = HashSet::new();
            for rule in &field.sources {
                if !seen.insert(rule.source.clone()) {
                    return invalid(format!("field '{}' lists source '{}' twice", field.name, rule.source));
                }
            }
        }

        for field in &fields {
            let log_key = field.log.log_field.as_str();
            if storage_keys.contains(log_key) {
                return invalid(format!("log field '{log_key}' of '{}' collides with a field", field.name));
            }
            if log_key == self.hash_log_key {
                return invalid(format!("log field '{log_key}' collides with the hash log"));
            }
        }
        if storage_keys.contains(self.hash_log_key.as_str()) {
            return invalid(format!("hash log key '{}' collides with a field", self.hash_log_key));
        }

        Ok(FieldRegistry {
            profile_type: self.profile_type,
            hash_log_key: self.hash_log_key,
            id_key: self.id_key,
            fields,
            by_name,
        })
    }
}
