//! Brings live audiences in line with declared specs.

use crate::error::{AudienceStoreError, ReconcileError, ReconcileFailure};
use crate::queue::AudienceCompilationQueue;
use crate::spec::AudienceSpec;
use crate::store::{AudienceId, AudienceStore, LiveAudience};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A rename performed during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

/// What a reconciliation sweep did, by audience name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub renamed: Vec<Rename>,
    /// Audiences whose definition was committed and queued for compilation.
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    /// Obsolete or deleted specs with no live audience.
    pub skipped: Vec<String>,
}

impl ReconcileReport {
    /// True when the sweep changed nothing in the store.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.renamed.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Diffs declared [`AudienceSpec`]s against an [`AudienceStore`] and applies
/// the smallest set of create, rename, update and delete operations.
///
/// Running it twice with the same specs changes nothing the second time.
pub struct AudienceReconciler {
    store: Arc<dyn AudienceStore>,
    queue: Arc<AudienceCompilationQueue>,
    obsolete_prefix: String,
}

impl AudienceReconciler {
    pub fn new(store: Arc<dyn AudienceStore>, queue: Arc<AudienceCompilationQueue>) -> Self {
        Self {
            store,
            queue,
            obsolete_prefix: crate::CompilationConfig::default().obsolete_prefix,
        }
    }

    #[must_use]
    pub fn with_obsolete_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.obsolete_prefix = prefix.into();
        self
    }

    fn obsolete_name(&self, name: &str) -> String {
        format!("{} {}", self.obsolete_prefix, name)
    }

    fn is_protected(&self, live_name: &str, protected: &[String]) -> bool {
        protected
            .iter()
            .any(|name| live_name == name || live_name == self.obsolete_name(name))
    }

    /// Finds the live audience for a spec: exact name, then retired name,
    /// then any previous name. Audiences already claimed by an earlier
    /// spec are not considered.
    fn locate(&self, live: &[LiveAudience], claimed: &HashSet<AudienceId>, spec: &AudienceSpec) -> Option<LiveAudience> {
        let candidates = || live.iter().filter(|a| !claimed.contains(&a.id));
        let retired = self.obsolete_name(&spec.name);
        candidates()
            .find(|a| a.name == spec.name)
            .or_else(|| candidates().find(|a| a.name == retired))
            .or_else(|| {
                spec.previous_names
                    .iter()
                    .find_map(|prev| candidates().find(|a| &a.name == prev))
            })
            .cloned()
    }

    /// Reconciles the store against `specs`. Live audiences that no spec
    /// matches are removed only when `allow_deletion` is set.
    pub async fn reconcile(&self, specs: &[AudienceSpec], allow_deletion: bool) -> Result<ReconcileReport, ReconcileError> {
        self.reconcile_protecting(specs, allow_deletion, &[]).await
    }

    /// Like [`reconcile`](Self::reconcile), but unmatched live audiences
    /// named in `protected` (or their retired names) are never deleted.
    /// Callers pass the names of audiences whose rules failed to compile.
    pub async fn reconcile_protecting(
        &self,
        specs: &[AudienceSpec],
        allow_deletion: bool,
        protected: &[String],
    ) -> Result<ReconcileReport, ReconcileError> {
        let live = self.store.list().await.map_err(ReconcileError::Listing)?;
        let mut report = ReconcileReport::default();
        let mut failures = Vec::new();
        let mut claimed = HashSet::new();
        let mut doomed = Vec::new();

        for spec in specs {
            let found = self.locate(&live, &claimed, spec);
            if let Some(audience) = &found {
                claimed.insert(audience.id);
            }
            if let Err(error) = self.apply(spec, found, &mut report, &mut doomed).await {
                warn!(audience = %spec.name, %error, "failed to reconcile audience");
                failures.push(ReconcileFailure {
                    audience: spec.name.clone(),
                    error,
                });
            }
        }

        if allow_deletion {
            for audience in live.iter().filter(|a| !claimed.contains(&a.id)) {
                if self.is_protected(&audience.name, protected) {
                    debug!(audience = %audience.name, "unmatched audience protected from deletion");
                    continue;
                }
                doomed.push(audience.name.clone());
            }
        }

        for name in doomed {
            match self.store.remove(&name).await {
                Ok(()) => {
                    info!(audience = %name, "deleted audience");
                    report.deleted.push(name);
                }
                Err(error) => {
                    warn!(audience = %name, %error, "failed to delete audience");
                    failures.push(ReconcileFailure { audience: name, error });
                }
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(ReconcileError::Partial { failures, report })
        }
    }

    async fn apply(
        &self,
        spec: &AudienceSpec,
        found: Option<LiveAudience>,
        report: &mut ReconcileReport,
        doomed: &mut Vec<String>,
    ) -> Result<(), AudienceStoreError> {
        let (mut audience, mut changed) = match found {
            Some(audience) => (audience, false),
            None if spec.should_delete || spec.is_obsolete => {
                debug!(audience = %spec.name, "no live audience to retire");
                report.skipped.push(spec.name.clone());
                return Ok(());
            }
            None => {
                let created = self.store.create(&spec.name, spec.effective_description()).await?;
                info!(audience = %spec.name, "created audience");
                report.created.push(spec.name.clone());
                (created, true)
            }
        };

        if spec.should_delete {
            doomed.push(audience.name);
            return Ok(());
        }

        let target = if spec.is_obsolete {
            self.obsolete_name(&spec.name)
        } else {
            spec.name.clone()
        };
        if audience.name != target {
            self.store.rename(audience.id, &target).await?;
            info!(from = %audience.name, to = %target, "renamed audience");
            let from = std::mem::replace(&mut audience.name, target.clone());
            report.renamed.push(Rename { from, to: target });
            changed = true;
        }

        if audience.operator != spec.boolean_operator {
            audience.operator = spec.boolean_operator;
            changed = true;
        }
        if audience.description != spec.effective_description() {
            audience.description = spec.effective_description().to_string();
            changed = true;
        }
        if audience.rules != spec.rules {
            audience.rules = spec.rules.clone();
            changed = true;
        }

        if changed {
            self.store.commit(&audience).await?;
            self.queue.push(&audience.name);
            debug!(audience = %audience.name, "committed audience and queued compilation");
            report.updated.push(audience.name);
        } else {
            report.unchanged.push(audience.name);
        }
        Ok(())
    }
}
