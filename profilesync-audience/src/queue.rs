//! Audiences waiting for recompilation.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Deduplicated, most-recent-first queue of audience names.
///
/// Pushing a name that is already queued moves it to the front. Shared
/// between the merge engine, the reconciler and the compilation sweep.
#[derive(Debug, Default)]
pub struct AudienceCompilationQueue {
    names: Mutex<VecDeque<String>>,
}

impl AudienceCompilationQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn names(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, name: &str) {
        let mut names = self.names();
        if let Some(i) = names.iter().position(|n| n == name) {
            names.remove(i);
        }
        names.push_front(name.to_string());
    }

    /// Removes and returns the most recently pushed name.
    pub fn pop(&self) -> Option<String> {
        self.names().pop_front()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.names().iter().any(|n| n == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names().is_empty()
    }

    /// Queued names, most recent first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.names().iter().cloned().collect()
    }
}
