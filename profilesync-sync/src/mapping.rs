//! Declarative field mappings for loaders.
//!
//! A loader usually turns one source record into several field values.
//! [`FieldMappings`] lists those conversions once and runs them through the
//! merge engine. Mappings come in four flavours:
//!
//! | flavour           | runs in          | without a record |
//! |-------------------|------------------|------------------|
//! | `map`             | primary update   | skipped          |
//! | `map_nullable`    | primary update   | called with None |
//! | `map_delayed`     | secondary update | skipped          |
//! | `map_delayed_nullable` | secondary update | called with None |

use crate::error::MergeError;
use crate::merge::MergeEngine;
use profilesync_model::Profile;
use profilesync_types::{FieldName, FieldValue, SourceName};

type RecordFn<S> = Box<dyn Fn(&Profile, &S) -> FieldValue + Send + Sync>;
type NullableFn<S> = Box<dyn Fn(&Profile, Option<&S>) -> FieldValue + Send + Sync>;

enum Conversion<S> {
    Record(RecordFn<S>),
    Nullable(NullableFn<S>),
}

struct Mapping<S> {
    field: FieldName,
    delayed: bool,
    convert: Conversion<S>,
}

/// Field conversions from a source record type `S`.
pub struct FieldMappings<S> {
    mappings: Vec<Mapping<S>>,
}

impl<S> Default for FieldMappings<S> {
    fn default() -> Self {
        Self { mappings: Vec::new() }
    }
}

impl<S> FieldMappings<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, field: &str, delayed: bool, convert: Conversion<S>) -> Self {
        self.mappings.push(Mapping {
            field: FieldName::new(field),
            delayed,
            convert,
        });
        self
    }

    #[must_use]
    pub fn map<F>(self, field: &str, f: F) -> Self
    where
        F: Fn(&Profile, &S) -> FieldValue + Send + Sync + 'static,
    {
        self.push(field, false, Conversion::Record(Box::new(f)))
    }

    #[must_use]
    pub fn map_nullable<F>(self, field: &str, f: F) -> Self
    where
        F: Fn(&Profile, Option<&S>) -> FieldValue + Send + Sync + 'static,
    {
        self.push(field, false, Conversion::Nullable(Box::new(f)))
    }

    #[must_use]
    pub fn map_delayed<F>(self, field: &str, f: F) -> Self
    where
        F: Fn(&Profile, &S) -> FieldValue + Send + Sync + 'static,
    {
        self.push(field, true, Conversion::Record(Box::new(f)))
    }

    #[must_use]
    pub fn map_delayed_nullable<F>(self, field: &str, f: F) -> Self
    where
        F: Fn(&Profile, Option<&S>) -> FieldValue + Send + Sync + 'static,
    {
        self.push(field, true, Conversion::Nullable(Box::new(f)))
    }

    /// Fields mapped in the given pass.
    pub fn fields(&self, secondary: bool) -> impl Iterator<Item = &FieldName> {
        self.mappings.iter().filter(move |m| m.delayed == secondary).map(|m| &m.field)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Runs the mappings of one pass (`secondary` selects the delayed ones)
    /// and merges each result. Returns whether any field changed.
    pub fn apply(
        &self,
        merge: &MergeEngine,
        profile: &mut Profile,
        source: &SourceName,
        record: Option<&S>,
        secondary: bool,
    ) -> Result<bool, MergeError> {
        let mut changed = false;
        for mapping in self.mappings.iter().filter(|m| m.delayed == secondary) {
            let value = match (&mapping.convert, record) {
                (Conversion::Record(f), Some(r)) => f(profile, r),
                (Conversion::Record(_), None) => continue,
                (Conversion::Nullable(f), r) => f(profile, r),
            };
            changed |= merge.apply(profile, source, mapping.field.as_str(), value)?;
        }
        Ok(changed)
    }
}
