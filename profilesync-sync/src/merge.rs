//! Applying one source's value to one profile field.

use crate::error::MergeError;
use chrono::{DateTime, SubsecRound, Utc};
use profilesync_audience::AudienceCompilationQueue;
use profilesync_model::{FieldDescriptor, FieldRegistry, Profile};
use profilesync_provenance::{Captured, Stamp, content_hash};
use profilesync_types::{FieldValue, SourceName, ValueType};
use std::sync::Arc;
use tracing::{debug, trace};

/// Merges proposed values into profiles under the priority rules of the
/// field registry, recording provenance and queueing affected audiences.
///
/// A value is written only when:
/// 1. it is non-empty, or the source may clear the field;
/// 2. no strictly better source owns the field, unless the source escalates
///    on change and its own value changed since it last proposed it;
/// 3. it differs from the current value.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    registry: Arc<FieldRegistry>,
    queue: Arc<AudienceCompilationQueue>,
    user: String,
}

impl MergeEngine {
    pub fn new(registry: Arc<FieldRegistry>, queue: Arc<AudienceCompilationQueue>) -> Self {
        Self {
            registry,
            queue,
            user: crate::SyncConfig::default().updating_user,
        }
    }

    /// Creates an engine that records `config.updating_user`.
    pub fn from_config(
        registry: Arc<FieldRegistry>,
        queue: Arc<AudienceCompilationQueue>,
        config: &crate::SyncConfig,
    ) -> Self {
        Self::new(registry, queue).with_user(config.updating_user.clone())
    }

    /// Sets the user recorded in source logs.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<FieldRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<AudienceCompilationQueue> {
        &self.queue
    }

    /// Proposes `value` for `field` on behalf of `source`, stamped now.
    /// Returns whether the field changed.
    pub fn apply(
        &self,
        profile: &mut Profile,
        source: &SourceName,
        field: &str,
        value: impl Into<FieldValue>,
    ) -> Result<bool, MergeError> {
        self.apply_at(profile, source, field, value.into(), Utc::now())
    }

    /// Like [`apply`](Self::apply) with an explicit timestamp.
    pub fn apply_at(
        &self,
        profile: &mut Profile,
        source: &SourceName,
        field: &str,
        value: FieldValue,
        at: DateTime<Utc>,
    ) -> Result<bool, MergeError> {
        // Encoded logs carry whole seconds.
        let at = at.trunc_subsecs(0);
        let descriptor = self
            .registry
            .get(field)
            .ok_or_else(|| MergeError::UnknownField(field.to_string()))?;
        let rule = descriptor
            .rule_for(source.as_str())
            .ok_or_else(|| MergeError::SourceNotPermitted {
                field: field.to_string(),
                source_name: source.to_string(),
            })?;
        if !profile.is_full() {
            return Err(MergeError::PartialProfile(profile.id().clone()));
        }
        let value = value
            .coerce(descriptor.value_type)
            .map_err(|e| MergeError::InvalidValue {
                field: field.to_string(),
                reason: e.to_string(),
            })?;

        if value.is_empty() && !rule.use_if_empty {
            trace!(%source, field, "empty value ignored");
            return Ok(false);
        }

        let log_field = &descriptor.log.log_field;
        let better_owner = profile
            .provenance(log_field.as_str(), field)
            .is_some_and(|entry| descriptor.outranks(entry.source.as_str(), source.as_str()));
        if better_owner && !rule.raise_priority_if_changed {
            trace!(%source, field, "better source owns field");
            return Ok(false);
        }

        let proposed = value.to_comparable();
        if rule.raise_priority_if_changed {
            let hash = content_hash(&proposed);
            let unchanged = profile.hash_log().get(&descriptor.name, source) == hash.as_deref();
            if !unchanged {
                profile.hash_log_mut().set(&descriptor.name, source, hash);
                profile.mark_hash_log_changed();
            }
            if unchanged && better_owner {
                trace!(%source, field, "escalating source value unchanged");
                return Ok(false);
            }
        }

        let current = profile.value(field);
        let previous = current.to_comparable();
        if previous == proposed {
            return Ok(false);
        }

        self.write(profile, descriptor, source, value, &current, at);
        debug!(profile = %profile.id(), %source, field, "field updated");
        self.queue_audiences(descriptor, &previous, &proposed);
        Ok(true)
    }

    fn write(
        &self,
        profile: &mut Profile,
        descriptor: &FieldDescriptor,
        source: &SourceName,
        value: FieldValue,
        current: &FieldValue,
        at: DateTime<Utc>,
    ) {
        let policy = &descriptor.log;
        let previous = current.to_comparable();
        let captured = Captured {
            value: (policy.store_value && !previous.is_empty()).then(|| previous.clone()),
            hash: if policy.store_hash { content_hash(&previous) } else { None },
        };
        let stamp = Stamp {
            source: source.clone(),
            updated_at: policy.store_date.then_some(at),
            user: if policy.store_user { self.user.clone() } else { String::new() },
        };

        profile.set(&descriptor.name, value);
        profile
            .log_mut(&policy.log_field)
            .record(&descriptor.name, stamp, captured, policy.history_length);
        profile.mark_changed(&policy.log_field);
    }

    fn queue_audiences(&self, descriptor: &FieldDescriptor, previous: &str, proposed: &str) {
        for trigger in &descriptor.audiences {
            let affected = match &trigger.filter {
                None => true,
                Some(_) if descriptor.value_type == ValueType::Bool => true,
                Some(filter) => previous.contains(filter.as_str()) || proposed.contains(filter.as_str()),
            };
            if affected {
                debug!(audience = %trigger.audience, field = %descriptor.name, "audience queued for compilation");
                self.queue.push(&trigger.audience);
            }
        }
    }
}
