//! Batch and real-time update orchestration.
//!
//! A batch pass runs in three steps:
//!
//! 1. **Initialize**: build the [`ProfileIndex`], call every loader's bulk
//!    hook under the deadline and settle each loader's [`LoaderState`].
//! 2. **Primary sweep**: profiles are moved into tasks (bounded by
//!    `max_parallelism`); each task runs the active loaders serially,
//!    collects incidental data and export rows, then saves if anything
//!    changed.
//! 3. **Secondary sweep**: loaders that asked for one get a second look at
//!    every profile, after which export writers run once.
//!
//! Nothing in a pass is fatal. Loader and save failures are logged with
//! their loader and profile and counted in the [`PassReport`].

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::loader::{DataLoader, ProfileIndex, Spread};
use crate::merge::MergeEngine;
use crate::repository::ProfileRepository;
use crate::state::RecencyMap;
use profilesync_model::{Profile, ProfileStore, SearchIndex};
use profilesync_types::SourceName;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Where a loader ended up for the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderState {
    Uninitialized,
    Initializing,
    /// Bulk data loaded; updates profiles the bulk data covers.
    BulkReady,
    /// No bulk data; updates profiles one at a time per its spread.
    RealTimeFallback,
    /// Skipped for the rest of the pass.
    Disabled,
}

/// Counters for one loader in one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderStats {
    pub profiles_checked: usize,
    pub profiles_updated: usize,
    pub failures: usize,
    pub timeouts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoaderReport {
    pub source: SourceName,
    pub state: LoaderState,
    pub primary: LoaderStats,
    pub secondary: LoaderStats,
}

/// Summary of one batch pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub loaders: Vec<LoaderReport>,
    /// Distinct profiles processed.
    pub profiles: usize,
    /// Input profiles dropped because their id was already seen.
    pub duplicates: usize,
    pub profiles_saved: usize,
    pub save_failures: usize,
}

/// The profiles of a pass, handed back after both sweeps, and its report.
#[derive(Debug)]
pub struct PassOutcome {
    pub profiles: Vec<Profile>,
    pub report: PassReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveOutcome {
    Unchanged,
    Saved,
    Failed,
}

/// One loader's state for the duration of a pass.
struct Slot {
    loader: Arc<dyn DataLoader>,
    state: LoaderState,
    /// The bulk hook returned without error or timeout.
    initialized: bool,
    /// Index keys picked for a sampled real-time spread.
    sample: Option<HashSet<String>>,
    disabled: AtomicBool,
    primary: Mutex<LoaderStats>,
    secondary: Mutex<LoaderStats>,
    incidental: Mutex<()>,
}

impl Slot {
    fn new(loader: Arc<dyn DataLoader>) -> Self {
        Self {
            loader,
            state: LoaderState::Uninitialized,
            initialized: false,
            sample: None,
            disabled: AtomicBool::new(false),
            primary: Mutex::new(LoaderStats::default()),
            secondary: Mutex::new(LoaderStats::default()),
            incidental: Mutex::new(()),
        }
    }

    fn source(&self) -> &SourceName {
        self.loader.source()
    }

    fn is_active(&self) -> bool {
        matches!(self.state, LoaderState::BulkReady | LoaderState::RealTimeFallback)
            && !self.disabled.load(Ordering::Acquire)
    }

    fn stats(&self, phase: Phase) -> &Mutex<LoaderStats> {
        match phase {
            Phase::Primary => &self.primary,
            Phase::Secondary => &self.secondary,
        }
    }

    fn selects(&self, profile: &Profile) -> bool {
        if !self.is_active() || !self.loader.is_valid_profile(profile) {
            return false;
        }
        match self.state {
            LoaderState::BulkReady => {
                self.loader.bulk_data_contains(profile) || self.loader.bulk_data_used_to_contain(profile)
            }
            LoaderState::RealTimeFallback => match (&self.sample, self.loader.spread()) {
                (_, Spread::All) => true,
                (Some(sample), _) => sample.contains(&profile.id().index_key()),
                (None, _) => false,
            },
            _ => false,
        }
    }

    async fn report(&self) -> LoaderReport {
        let state = if self.disabled.load(Ordering::Acquire) {
            LoaderState::Disabled
        } else {
            self.state
        };
        LoaderReport {
            source: self.source().clone(),
            state,
            primary: *self.primary.lock().await,
            secondary: *self.secondary.lock().await,
        }
    }
}

/// Shared by every profile task of a pass.
struct PassContext {
    slots: Vec<Slot>,
    merge: Arc<MergeEngine>,
    repository: Arc<ProfileRepository>,
    deadline: Duration,
}

impl PassContext {
    async fn process(self: Arc<Self>, phase: Phase, mut profile: Profile) -> (Profile, SaveOutcome) {
        for slot in &self.slots {
            let selected = match phase {
                Phase::Primary => slot.selects(&profile),
                Phase::Secondary => {
                    slot.is_active()
                        && slot.loader.secondary_update_required()
                        && slot.loader.should_update_in_secondary(&profile)
                }
            };
            if !selected {
                continue;
            }
            if let Err(e) = self.update(slot, phase, &mut profile).await {
                // Promotion failed: the profile cannot be written this pass.
                warn!(source = %slot.source(), profile = %profile.id(), error = %e, "profile skipped");
                return (profile, SaveOutcome::Unchanged);
            }
        }

        if phase == Phase::Primary {
            for slot in self.slots.iter().filter(|s| s.initialized) {
                self.collect(slot, &profile).await;
            }
        }

        let outcome = if !profile.has_changes() {
            SaveOutcome::Unchanged
        } else {
            match self.repository.save(&mut profile).await {
                Ok(_) => SaveOutcome::Saved,
                Err(e) => {
                    error!(profile = %profile.id(), error = %e, "save failed");
                    SaveOutcome::Failed
                }
            }
        };
        (profile, outcome)
    }

    /// Runs one loader against one profile. Only a failed promotion is
    /// returned; loader errors are logged and counted.
    async fn update(&self, slot: &Slot, phase: Phase, profile: &mut Profile) -> SyncResult<()> {
        slot.stats(phase).lock().await.profiles_checked += 1;
        self.repository.promote(profile).await?;

        let before = profile.change_count();
        let loader = &slot.loader;
        let merge = self.merge.as_ref();
        let result = match phase {
            Phase::Primary if slot.state == LoaderState::BulkReady => {
                timeout(self.deadline, loader.update_bulk(profile, merge)).await
            }
            Phase::Primary => timeout(self.deadline, loader.update_real_time(profile, merge))
                .await
                .map(|r| r.map(|_| ())),
            Phase::Secondary => timeout(self.deadline, loader.update_secondary(profile, merge)).await,
        };

        let mut stats = slot.stats(phase).lock().await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                stats.failures += 1;
                warn!(source = %slot.source(), profile = %profile.id(), error = %e, "loader update failed");
            }
            Err(_) => {
                stats.timeouts += 1;
                slot.disabled.store(true, Ordering::Release);
                error!(source = %slot.source(), profile = %profile.id(), "loader timed out, disabled for this pass");
            }
        }
        if profile.change_count() != before {
            stats.profiles_updated += 1;
        }
        Ok(())
    }

    async fn collect(&self, slot: &Slot, profile: &Profile) {
        {
            let _serial = slot.incidental.lock().await;
            if let Err(e) = slot.loader.collect_incidental(profile).await {
                warn!(source = %slot.source(), profile = %profile.id(), error = %e, "incidental collection failed");
            }
        }
        if slot.loader.should_export() {
            if let Err(e) = slot.loader.add_export_row(profile).await {
                warn!(source = %slot.source(), profile = %profile.id(), error = %e, "export row failed");
            }
        }
    }
}

/// Drives loaders across the profile population.
pub struct Orchestrator {
    config: SyncConfig,
    loaders: Vec<Arc<dyn DataLoader>>,
    merge: Arc<MergeEngine>,
    repository: Arc<ProfileRepository>,
    recency: Arc<RecencyMap>,
    search: Option<Arc<dyn SearchIndex>>,
}

impl Orchestrator {
    pub fn new(config: SyncConfig, merge: Arc<MergeEngine>, store: Arc<dyn ProfileStore>) -> Self {
        let mut repository = ProfileRepository::new(store, Arc::clone(merge.registry()));
        if let Some(key) = &config.id_key {
            repository = repository.with_id_key(key.clone());
        }
        Self {
            config,
            loaders: Vec::new(),
            merge,
            repository: Arc::new(repository),
            recency: Arc::new(RecencyMap::new()),
            search: None,
        }
    }

    /// Adds a loader. Loaders run in the order they were added.
    #[must_use]
    pub fn with_loader(mut self, loader: Arc<dyn DataLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    /// Makes [`run_pass`](Self::run_pass) start from partial profiles read
    /// from the search snapshot instead of loading every profile fully.
    #[must_use]
    pub fn with_search_index(mut self, search: Arc<dyn SearchIndex>) -> Self {
        self.search = Some(search);
        self
    }

    /// Shares a recency map with another orchestrator.
    #[must_use]
    pub fn with_recency(mut self, recency: Arc<RecencyMap>) -> Self {
        self.recency = recency;
        self
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn merge(&self) -> &Arc<MergeEngine> {
        &self.merge
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<ProfileRepository> {
        &self.repository
    }

    #[must_use]
    pub fn recency(&self) -> &Arc<RecencyMap> {
        &self.recency
    }

    /// Loads the population and runs a batch pass over it.
    pub async fn run_pass(&self) -> SyncResult<PassOutcome> {
        let profiles = match &self.search {
            Some(search) => {
                let rows = search.snapshot().await?;
                rows.iter().filter_map(|row| self.repository.load_partial(row)).collect()
            }
            None => self.repository.load_all().await?,
        };
        Ok(self.run_batch(profiles).await)
    }

    /// Runs a batch pass over `profiles`.
    pub async fn run_batch(&self, profiles: Vec<Profile>) -> PassOutcome {
        let mut seen = HashSet::new();
        let mut population = Vec::with_capacity(profiles.len());
        let mut duplicates = 0;
        for profile in profiles {
            if seen.insert(profile.id().index_key()) {
                population.push(profile);
            } else {
                duplicates += 1;
                warn!(profile = %profile.id(), "duplicate profile dropped from pass");
            }
        }
        info!(profiles = population.len(), loaders = self.loaders.len(), "starting pass");

        let index = ProfileIndex::build(&population);
        let mut slots = Vec::with_capacity(self.loaders.len());
        for loader in &self.loaders {
            let mut slot = Slot::new(Arc::clone(loader));
            self.initialize(&mut slot, &index).await;
            if slot.state == LoaderState::RealTimeFallback {
                if let Spread::Sample(n) = slot.loader.spread() {
                    slot.sample = Some(self.select_sample(slot.loader.as_ref(), &population, n).await);
                }
            }
            slots.push(slot);
        }

        let context = Arc::new(PassContext {
            slots,
            merge: Arc::clone(&self.merge),
            repository: Arc::clone(&self.repository),
            deadline: self.config.loader_timeout(),
        });

        let mut report = PassReport {
            profiles: population.len(),
            duplicates,
            ..PassReport::default()
        };
        let mut profiles = self.sweep(&context, Phase::Primary, population, &mut report).await;

        let secondary = context
            .slots
            .iter()
            .any(|s| s.is_active() && s.loader.secondary_update_required());
        if secondary {
            debug!("starting secondary sweep");
            profiles = self.sweep(&context, Phase::Secondary, profiles, &mut report).await;
        }

        for slot in context.slots.iter().filter(|s| s.initialized) {
            if let Err(e) = slot.loader.write_export().await {
                warn!(source = %slot.source(), error = %e, "export write failed");
            }
        }

        for slot in &context.slots {
            report.loaders.push(slot.report().await);
        }
        info!(
            profiles = report.profiles,
            saved = report.profiles_saved,
            save_failures = report.save_failures,
            "pass complete"
        );
        PassOutcome { profiles, report }
    }

    async fn initialize(&self, slot: &mut Slot, index: &ProfileIndex) {
        slot.state = LoaderState::Initializing;
        let source = slot.source().clone();
        debug!(%source, "initializing loader");
        let bulk = match timeout(self.config.loader_timeout(), slot.loader.load_bulk_data(index)).await {
            Ok(Ok(bulk)) => {
                slot.initialized = true;
                bulk
            }
            Ok(Err(e)) => {
                error!(%source, error = %e, "loader initialization failed");
                false
            }
            Err(_) => {
                let e = SyncError::Timeout {
                    loader: source.to_string(),
                    operation: "bulk load",
                };
                error!(%source, error = %e, "loader initialization failed");
                false
            }
        };
        slot.state = if bulk {
            LoaderState::BulkReady
        } else if slot.initialized && slot.loader.spread() != Spread::Disabled {
            LoaderState::RealTimeFallback
        } else {
            LoaderState::Disabled
        };
        info!(%source, state = ?slot.state, "loader ready");
    }

    /// Picks up to `n` valid profiles the loader has not touched within its
    /// expiry and marks them attempted.
    async fn select_sample(&self, loader: &dyn DataLoader, population: &[Profile], n: usize) -> HashSet<String> {
        let source = loader.source();
        let expiry = loader.real_time_update_expiry();
        let mut candidates = Vec::new();
        for profile in population.iter().filter(|p| loader.is_valid_profile(p)) {
            if !self.recency.is_fresh(source, profile.id(), expiry).await {
                candidates.push(profile.id());
            }
        }
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(n);

        let mut sample = HashSet::with_capacity(candidates.len());
        for id in candidates {
            self.recency.mark(source, id).await;
            sample.insert(id.index_key());
        }
        debug!(%source, sampled = sample.len(), "real-time sample selected");
        sample
    }

    async fn sweep(
        &self,
        context: &Arc<PassContext>,
        phase: Phase,
        profiles: Vec<Profile>,
        report: &mut PassReport,
    ) -> Vec<Profile> {
        let permits = Arc::new(Semaphore::new(self.config.max_parallelism.max(1)));
        let mut tasks = JoinSet::new();
        for (position, profile) in profiles.into_iter().enumerate() {
            let context = Arc::clone(context);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let (profile, outcome) = context.process(phase, profile).await;
                (position, profile, outcome)
            });
        }

        let mut done = HashMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((position, profile, outcome)) => {
                    match outcome {
                        SaveOutcome::Saved => report.profiles_saved += 1,
                        SaveOutcome::Failed => report.save_failures += 1,
                        SaveOutcome::Unchanged => {}
                    }
                    done.insert(position, profile);
                }
                Err(e) => error!(error = %e, "profile task panicked"),
            }
        }
        let mut positions: Vec<usize> = done.keys().copied().collect();
        positions.sort_unstable();
        positions.into_iter().filter_map(|p| done.remove(&p)).collect()
    }

    /// Updates one profile from every loader that answers in real time,
    /// skipping loaders that touched it within their expiry. Each answer is
    /// saved and stamped. Returns whether any loader answered.
    pub async fn run_real_time(&self, profile: &mut Profile) -> SyncResult<bool> {
        let mut answered = false;
        for loader in &self.loaders {
            let source = loader.source();
            if !loader.is_valid_profile(profile)
                || self.recency.is_fresh(source, profile.id(), loader.real_time_update_expiry()).await
            {
                continue;
            }
            self.repository.promote(profile).await?;
            match timeout(self.config.loader_timeout(), loader.update_real_time(profile, &self.merge)).await {
                Ok(Ok(true)) => {
                    answered = true;
                    self.recency.mark(source, profile.id()).await;
                    if let Err(e) = self.repository.save(profile).await {
                        error!(%source, profile = %profile.id(), error = %e, "save failed");
                    }
                }
                Ok(Ok(false)) => debug!(%source, profile = %profile.id(), "loader had no answer"),
                Ok(Err(e)) => warn!(%source, profile = %profile.id(), error = %e, "real-time update failed"),
                Err(_) => warn!(%source, profile = %profile.id(), "real-time update timed out"),
            }
        }
        Ok(answered)
    }

    /// Forgets every recorded real-time attempt.
    pub async fn reset_update_flags(&self) {
        self.recency.clear().await;
    }
}
