use async_trait::async_trait;
use pretty_assertions::assert_eq;
use profilesync_audience::AudienceCompilationQueue;
use profilesync_model::{FieldDescriptor, FieldRegistry, LoadTier, Profile, SourceRule};
use profilesync_storage::{MemoryProfileStore, MemorySearchIndex};
use profilesync_sync::{
    DataLoader, LoaderState, LoaderStats, MergeEngine, Orchestrator, ProfileIndex, Spread, SyncConfig, SyncError,
    SyncResult,
};
use profilesync_types::{FieldValue, ProfileId, SourceName};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn registry() -> Arc<FieldRegistry> {
    Arc::new(
        FieldRegistry::builder("UserProfile")
            .field(
                FieldDescriptor::text("Title")
                    .indexed_as("JobTitle")
                    .source(SourceRule::new("HR", 1)),
            )
            .field(FieldDescriptor::text("Office").source(SourceRule::new("Directory", 1)))
            .field(FieldDescriptor::text("Manager").source(SourceRule::new("HR", 1)))
            .build()
            .unwrap(),
    )
}

fn id(s: &str) -> ProfileId {
    ProfileId::parse(s).unwrap()
}

fn full(s: &str) -> Profile {
    Profile::new(id(s), LoadTier::Full)
}

fn config() -> SyncConfig {
    SyncConfig {
        max_parallelism: 4,
        ..SyncConfig::default()
    }
}

struct Fixture {
    store: Arc<MemoryProfileStore>,
    orchestrator: Orchestrator,
}

fn fixture(config: SyncConfig, loaders: Vec<Arc<dyn DataLoader>>) -> Fixture {
    let store = Arc::new(MemoryProfileStore::new());
    let merge = Arc::new(MergeEngine::new(registry(), Arc::new(AudienceCompilationQueue::new())));
    let mut orchestrator = Orchestrator::new(config, merge, store.clone());
    for loader in loaders {
        orchestrator = orchestrator.with_loader(loader);
    }
    Fixture { store, orchestrator }
}

// ── Test loaders ─────────────────────────────────────────────────

/// Bulk HR feed: titles by profile id, managers resolved in a secondary
/// sweep through the profile index.
struct HrFeed {
    source: SourceName,
    titles: HashMap<String, String>,
    managers: HashMap<String, String>,
    known: Mutex<Vec<String>>,
    incidental: AtomicUsize,
    export_rows: Mutex<Vec<String>>,
    exports_written: AtomicUsize,
    fail_bulk: bool,
}

impl HrFeed {
    fn new(titles: &[(&str, &str)]) -> Self {
        Self {
            source: SourceName::new("HR"),
            titles: titles.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            managers: HashMap::new(),
            known: Mutex::new(Vec::new()),
            incidental: AtomicUsize::new(0),
            export_rows: Mutex::new(Vec::new()),
            exports_written: AtomicUsize::new(0),
            fail_bulk: false,
        }
    }

    fn failing(mut self) -> Self {
        self.fail_bulk = true;
        self
    }

    fn with_manager(mut self, profile: &str, manager: &str) -> Self {
        self.managers.insert(profile.to_string(), manager.to_string());
        self
    }
}

#[async_trait]
impl DataLoader for HrFeed {
    fn source(&self) -> &SourceName {
        &self.source
    }

    async fn load_bulk_data(&self, index: &ProfileIndex) -> SyncResult<bool> {
        if self.fail_bulk {
            return Err(SyncError::loader("HR", "feed unavailable"));
        }
        let known = self.managers.values().filter(|m| index.contains(m)).cloned().collect();
        *self.known.lock().unwrap() = known;
        Ok(true)
    }

    fn bulk_data_contains(&self, profile: &Profile) -> bool {
        self.titles.contains_key(&profile.id().index_key())
    }

    async fn update_bulk(&self, profile: &mut Profile, merge: &MergeEngine) -> SyncResult<()> {
        if let Some(title) = self.titles.get(&profile.id().index_key()) {
            merge.apply(profile, &self.source, "Title", title.as_str())?;
        }
        Ok(())
    }

    fn secondary_update_required(&self) -> bool {
        !self.managers.is_empty()
    }

    fn should_update_in_secondary(&self, profile: &Profile) -> bool {
        self.managers.contains_key(&profile.id().index_key())
    }

    async fn update_secondary(&self, profile: &mut Profile, merge: &MergeEngine) -> SyncResult<()> {
        let manager = self.managers.get(&profile.id().index_key()).cloned();
        if let Some(manager) = manager.filter(|m| self.known.lock().unwrap().contains(m)) {
            merge.apply(profile, &self.source, "Manager", manager)?;
        }
        Ok(())
    }

    async fn collect_incidental(&self, _profile: &Profile) -> SyncResult<()> {
        self.incidental.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn should_export(&self) -> bool {
        true
    }

    async fn add_export_row(&self, profile: &Profile) -> SyncResult<()> {
        self.export_rows.lock().unwrap().push(profile.id().to_string());
        Ok(())
    }

    async fn write_export(&self) -> SyncResult<()> {
        self.exports_written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Directory lookups one profile at a time.
struct DirectoryLookup {
    source: SourceName,
    spread: Spread,
    delay: Option<Duration>,
    fail: bool,
    skip: Option<String>,
    calls: AtomicUsize,
}

impl DirectoryLookup {
    fn new(spread: Spread) -> Self {
        Self {
            source: SourceName::new("Directory"),
            spread,
            delay: None,
            fail: false,
            skip: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataLoader for DirectoryLookup {
    fn source(&self) -> &SourceName {
        &self.source
    }

    fn spread(&self) -> Spread {
        self.spread
    }

    fn is_valid_profile(&self, profile: &Profile) -> bool {
        self.skip.as_deref() != Some(profile.id().as_str())
    }

    async fn update_real_time(&self, profile: &mut Profile, merge: &MergeEngine) -> SyncResult<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(SyncError::loader("Directory", "lookup failed"));
        }
        merge.apply(profile, &self.source, "Office", "HQ")?;
        Ok(true)
    }
}

fn stats(checked: usize, updated: usize) -> LoaderStats {
    LoaderStats {
        profiles_checked: checked,
        profiles_updated: updated,
        ..LoaderStats::default()
    }
}

// ── Bulk loaders ─────────────────────────────────────────────────

#[tokio::test]
async fn bulk_loader_updates_covered_profiles() {
    let hr = Arc::new(HrFeed::new(&[("ada", "Engineer"), ("bob", "Designer")]));
    let f = fixture(config(), vec![hr.clone()]);

    let outcome = f
        .orchestrator
        .run_batch(vec![full("ada"), full("bob"), full("eve")])
        .await;

    let report = &outcome.report;
    assert_eq!(report.profiles, 3);
    assert_eq!(report.profiles_saved, 2);
    assert_eq!(report.loaders[0].state, LoaderState::BulkReady);
    assert_eq!(report.loaders[0].primary, stats(2, 2));
    assert_eq!(f.store.value(&id("ada"), "Title"), Some(FieldValue::Text("Engineer".into())));
    assert!(!f.store.contains(&id("eve")));

    let order: Vec<&str> = outcome.profiles.iter().map(|p| p.id().as_str()).collect();
    assert_eq!(order, vec!["ada", "bob", "eve"]);
}

#[tokio::test]
async fn second_pass_changes_nothing() {
    let hr = Arc::new(HrFeed::new(&[("ada", "Engineer")]));
    let f = fixture(config(), vec![hr]);
    let first = f.orchestrator.run_batch(vec![full("ada")]).await;

    let second = f.orchestrator.run_batch(first.profiles).await;
    assert_eq!(second.report.profiles_saved, 0);
    assert_eq!(second.report.loaders[0].primary, stats(1, 0));
}

#[tokio::test]
async fn duplicate_profiles_processed_once() {
    let hr = Arc::new(HrFeed::new(&[("ada", "Engineer")]));
    let f = fixture(config(), vec![hr.clone()]);

    let outcome = f.orchestrator.run_batch(vec![full("ada"), full("ADA"), full("bob")]).await;
    assert_eq!(outcome.report.profiles, 2);
    assert_eq!(outcome.report.duplicates, 1);
    assert_eq!(outcome.report.loaders[0].primary.profiles_checked, 1);
}

#[tokio::test]
async fn incidental_and_export_hooks_run_per_profile() {
    let hr = Arc::new(HrFeed::new(&[("ada", "Engineer")]));
    let f = fixture(config(), vec![hr.clone()]);

    f.orchestrator.run_batch(vec![full("ada"), full("bob")]).await;
    assert_eq!(hr.incidental.load(Ordering::SeqCst), 2);
    let mut rows = hr.export_rows.lock().unwrap().clone();
    rows.sort();
    assert_eq!(rows, vec!["ada".to_string(), "bob".to_string()]);
    assert_eq!(hr.exports_written.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_initialization_disables_loader() {
    let hr = Arc::new(HrFeed::new(&[("ada", "Engineer")]).failing());
    let directory = Arc::new(DirectoryLookup::new(Spread::All));
    let f = fixture(config(), vec![hr.clone(), directory.clone()]);

    let outcome = f.orchestrator.run_batch(vec![full("ada")]).await;
    let report = &outcome.report;
    assert_eq!(report.loaders[0].state, LoaderState::Disabled);
    assert_eq!(report.loaders[0].primary, LoaderStats::default());
    assert_eq!(hr.incidental.load(Ordering::SeqCst), 0);
    assert_eq!(hr.exports_written.load(Ordering::SeqCst), 0);

    // The other loader is unaffected.
    assert_eq!(report.loaders[1].state, LoaderState::RealTimeFallback);
    assert_eq!(f.store.value(&id("ada"), "Office"), Some(FieldValue::Text("HQ".into())));
}

// ── Secondary sweep ──────────────────────────────────────────────

#[tokio::test]
async fn secondary_sweep_resolves_references() {
    let hr = Arc::new(HrFeed::new(&[("ada", "Engineer"), ("grace", "Director")]).with_manager("ada", "grace"));
    let f = fixture(config(), vec![hr]);

    let outcome = f.orchestrator.run_batch(vec![full("ada"), full("grace")]).await;
    let report = &outcome.report;
    assert_eq!(report.loaders[0].secondary, stats(1, 1));
    assert_eq!(f.store.value(&id("ada"), "Manager"), Some(FieldValue::Text("grace".into())));
    // Both profiles saved in the primary sweep, ada again in the secondary.
    assert_eq!(report.profiles_saved, 3);
}

#[tokio::test]
async fn secondary_skips_unknown_reference() {
    let hr = Arc::new(HrFeed::new(&[("ada", "Engineer")]).with_manager("ada", "nobody"));
    let f = fixture(config(), vec![hr]);

    let outcome = f.orchestrator.run_batch(vec![full("ada")]).await;
    assert_eq!(outcome.report.loaders[0].secondary, stats(1, 0));
    assert_eq!(f.store.value(&id("ada"), "Manager"), None);
}

// ── Real-time fallback ───────────────────────────────────────────

#[tokio::test]
async fn spread_all_updates_every_valid_profile() {
    let directory = Arc::new(DirectoryLookup {
        skip: Some("eve".into()),
        ..DirectoryLookup::new(Spread::All)
    });
    let f = fixture(config(), vec![directory.clone()]);

    let outcome = f.orchestrator.run_batch(vec![full("ada"), full("bob"), full("eve")]).await;
    assert_eq!(outcome.report.loaders[0].primary, stats(2, 2));
    assert_eq!(directory.calls(), 2);
    assert_eq!(f.store.value(&id("eve"), "Office"), None);
}

#[tokio::test]
async fn sampled_spread_rotates_through_population() {
    let directory = Arc::new(DirectoryLookup::new(Spread::Sample(1)));
    let f = fixture(config(), vec![directory.clone()]);
    let mut profiles = vec![full("ada"), full("bob"), full("eve")];

    for pass in 1..=3 {
        let outcome = f.orchestrator.run_batch(profiles).await;
        assert_eq!(outcome.report.loaders[0].primary, stats(1, 1));
        assert_eq!(f.orchestrator.recency().len().await, pass);
        profiles = outcome.profiles;
    }
    for name in ["ada", "bob", "eve"] {
        assert_eq!(f.store.value(&id(name), "Office"), Some(FieldValue::Text("HQ".into())));
    }

    // Everyone is fresh now.
    let outcome = f.orchestrator.run_batch(profiles).await;
    assert_eq!(outcome.report.loaders[0].primary, LoaderStats::default());
}

#[tokio::test]
async fn no_bulk_and_no_spread_is_disabled() {
    let directory = Arc::new(DirectoryLookup::new(Spread::Disabled));
    let f = fixture(config(), vec![directory.clone()]);

    let outcome = f.orchestrator.run_batch(vec![full("ada")]).await;
    assert_eq!(outcome.report.loaders[0].state, LoaderState::Disabled);
    assert_eq!(directory.calls(), 0);
}

// ── Failures ─────────────────────────────────────────────────────

#[tokio::test]
async fn update_errors_are_counted_not_fatal() {
    let directory = Arc::new(DirectoryLookup {
        fail: true,
        ..DirectoryLookup::new(Spread::All)
    });
    let f = fixture(config(), vec![directory.clone()]);

    let outcome = f.orchestrator.run_batch(vec![full("ada"), full("bob")]).await;
    let loader = &outcome.report.loaders[0];
    assert_eq!(loader.primary.failures, 2);
    assert_eq!(loader.state, LoaderState::RealTimeFallback);
    assert_eq!(outcome.profiles.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn timeout_disables_loader_for_rest_of_pass() {
    let directory = Arc::new(DirectoryLookup {
        delay: Some(Duration::from_secs(5)),
        ..DirectoryLookup::new(Spread::All)
    });
    let config = SyncConfig {
        max_parallelism: 1,
        loader_timeout_ms: 1_000,
        ..SyncConfig::default()
    };
    let f = fixture(config, vec![directory.clone()]);

    let outcome = f.orchestrator.run_batch(vec![full("ada"), full("bob"), full("eve")]).await;
    let loader = &outcome.report.loaders[0];
    assert_eq!(loader.state, LoaderState::Disabled);
    assert_eq!(loader.primary.timeouts, 1);
    assert_eq!(loader.primary.profiles_checked, 1);
    assert_eq!(directory.calls(), 1);
}

#[tokio::test]
async fn save_failure_is_reported() {
    let hr = Arc::new(HrFeed::new(&[("ada", "Engineer"), ("bob", "Designer")]));
    let f = fixture(config(), vec![hr]);
    f.store.reject("Title");

    let outcome = f.orchestrator.run_batch(vec![full("ada"), full("bob")]).await;
    assert_eq!(outcome.report.save_failures, 2);
    assert_eq!(outcome.report.profiles_saved, 0);
    // In-memory state is kept.
    assert_eq!(outcome.profiles[0].value("Title"), FieldValue::Text("Engineer".into()));
}

// ── Loading the population ───────────────────────────────────────

#[tokio::test]
async fn pass_from_search_index_promotes_touched_profiles() {
    let hr = Arc::new(HrFeed::new(&[("ada", "Engineer")]));
    let search = Arc::new(MemorySearchIndex::default());
    search.push(&[("AccountName", "ada"), ("JobTitle", "Intern")]);
    search.push(&[("AccountName", "bob"), ("JobTitle", "Designer")]);
    search.push(&[("JobTitle", "orphan row")]);

    let f = fixture(config(), vec![hr]);
    let orchestrator = f.orchestrator.with_search_index(search);

    let outcome = orchestrator.run_pass().await.unwrap();
    assert_eq!(outcome.report.profiles, 2);
    let tiers: Vec<LoadTier> = outcome.profiles.iter().map(Profile::tier).collect();
    assert_eq!(tiers, vec![LoadTier::Full, LoadTier::Partial]);
    assert_eq!(f.store.value(&id("ada"), "Title"), Some(FieldValue::Text("Engineer".into())));
}

#[tokio::test]
async fn pass_from_store_loads_every_profile() {
    let hr = Arc::new(HrFeed::new(&[("ada", "Engineer")]));
    let f = fixture(config(), vec![hr]);
    f.store.insert(&id("ada"), [("Title".to_string(), FieldValue::from("Intern"))]);
    f.store.insert(&id("bob"), Vec::new());

    let outcome = f.orchestrator.run_pass().await.unwrap();
    assert_eq!(outcome.report.profiles, 2);
    assert_eq!(outcome.report.profiles_saved, 1);
    assert_eq!(f.store.value(&id("ada"), "Title"), Some(FieldValue::Text("Engineer".into())));
}

// ── Real-time single profile ─────────────────────────────────────

#[tokio::test]
async fn real_time_update_saves_and_respects_recency() {
    let directory = Arc::new(DirectoryLookup::new(Spread::Disabled));
    let f = fixture(config(), vec![directory.clone()]);
    let mut ada = full("ada");

    assert!(f.orchestrator.run_real_time(&mut ada).await.unwrap());
    assert_eq!(f.store.value(&id("ada"), "Office"), Some(FieldValue::Text("HQ".into())));

    assert!(!f.orchestrator.run_real_time(&mut ada).await.unwrap());
    assert_eq!(directory.calls(), 1);

    f.orchestrator.reset_update_flags().await;
    assert!(f.orchestrator.run_real_time(&mut ada).await.unwrap());
    assert_eq!(directory.calls(), 2);
}
