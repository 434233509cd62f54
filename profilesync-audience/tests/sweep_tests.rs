use pretty_assertions::assert_eq;
use profilesync_audience::{
    AudienceCompilationQueue, AudienceStore, CompilationConfig, CompilationSweep, DrainReport, LiveAudience,
    MemoryAudienceStore,
};
use std::sync::Arc;

fn setup(names: &[&str], config: CompilationConfig) -> (Arc<MemoryAudienceStore>, Arc<AudienceCompilationQueue>, CompilationSweep) {
    let store = Arc::new(MemoryAudienceStore::with_audiences(
        names.iter().map(|n| LiveAudience::new(*n, *n)).collect(),
    ));
    let queue = Arc::new(AudienceCompilationQueue::new());
    for n in names {
        queue.push(n);
    }
    let sweep = CompilationSweep::new(store.clone(), queue.clone(), config);
    (store, queue, sweep)
}

fn config(batch_threshold: usize) -> CompilationConfig {
    CompilationConfig {
        batch_threshold,
        ..CompilationConfig::default()
    }
}

// ── Draining ─────────────────────────────────────────────────────

#[tokio::test]
async fn drains_at_most_max_most_recent_first() {
    let (store, queue, sweep) = setup(&["A", "B", "C", "D"], config(10));
    let report = sweep.drain_up_to(2).await;
    assert_eq!(report.compiled, vec!["D".to_string(), "C".to_string()]);
    assert_eq!(queue.snapshot(), vec!["B".to_string(), "A".to_string()]);
    assert_eq!(store.compiled(), vec!["D".to_string(), "C".to_string()]);
    assert!(!report.skipped);
}

#[tokio::test]
async fn empty_queue_is_a_quiet_sweep() {
    let (_, _, sweep) = setup(&[], config(10));
    let report = sweep.drain().await;
    assert_eq!(report, DrainReport::default());
}

#[tokio::test]
async fn other_failures_are_recorded_and_sweep_continues() {
    let (store, queue, sweep) = setup(&["A", "B"], config(10));
    queue.push("Missing");
    let report = sweep.drain_up_to(10).await;
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "Missing");
    assert_eq!(report.compiled.len(), 2);
    assert_eq!(store.compiled().len(), 2);
}

// ── Contention ───────────────────────────────────────────────────

#[tokio::test]
async fn small_sweep_backs_off_when_a_job_is_running() {
    let (store, queue, sweep) = setup(&["A", "B"], config(10));
    store.simulate_running_job(1);

    let report = sweep.drain_up_to(5).await;
    assert_eq!(report.requeued, vec!["B".to_string()]);
    assert!(report.compiled.is_empty());
    assert_eq!(queue.snapshot(), vec!["B".to_string(), "A".to_string()]);
    assert_eq!(store.stop_count(), 0);
}

#[tokio::test]
async fn large_sweep_stops_running_job_and_retries() {
    let (store, queue, sweep) = setup(&["A", "B"], config(3));
    store.simulate_running_job(5);

    let report = sweep.drain_up_to(3).await;
    assert_eq!(store.stop_count(), 1);
    assert_eq!(report.compiled, vec!["B".to_string(), "A".to_string()]);
    assert!(report.requeued.is_empty());
    assert!(queue.is_empty());
}

#[tokio::test]
async fn sweep_flag_is_released_after_each_run() {
    let (_, queue, sweep) = setup(&["A"], config(10));
    sweep.drain().await;
    assert!(!sweep.is_running());
    queue.push("A");
    let report = sweep.drain().await;
    assert_eq!(report.compiled, vec!["A".to_string()]);
}

// ── Single flight ────────────────────────────────────────────────

/// Store whose compile blocks until released, to hold a sweep open.
struct GatedStore {
    inner: MemoryAudienceStore,
    gate: tokio::sync::Notify,
    entered: tokio::sync::Notify,
}

#[async_trait::async_trait]
impl AudienceStore for GatedStore {
    async fn list(&self) -> Result<Vec<LiveAudience>, profilesync_audience::AudienceStoreError> {
        self.inner.list().await
    }
    async fn create(&self, name: &str, d: &str) -> Result<LiveAudience, profilesync_audience::AudienceStoreError> {
        self.inner.create(name, d).await
    }
    async fn rename(
        &self,
        id: profilesync_audience::AudienceId,
        name: &str,
    ) -> Result<(), profilesync_audience::AudienceStoreError> {
        self.inner.rename(id, name).await
    }
    async fn commit(&self, a: &LiveAudience) -> Result<(), profilesync_audience::AudienceStoreError> {
        self.inner.commit(a).await
    }
    async fn remove(&self, name: &str) -> Result<(), profilesync_audience::AudienceStoreError> {
        self.inner.remove(name).await
    }
    async fn compile(&self, name: &str) -> Result<(), profilesync_audience::AudienceStoreError> {
        self.entered.notify_one();
        self.gate.notified().await;
        self.inner.compile(name).await
    }
    async fn stop_compilation(&self) -> Result<(), profilesync_audience::AudienceStoreError> {
        self.inner.stop_compilation().await
    }
}

#[tokio::test]
async fn concurrent_drain_returns_immediately() {
    let store = Arc::new(GatedStore {
        inner: MemoryAudienceStore::with_audiences(vec![LiveAudience::new("A", "A")]),
        gate: tokio::sync::Notify::new(),
        entered: tokio::sync::Notify::new(),
    });
    let queue = Arc::new(AudienceCompilationQueue::new());
    queue.push("A");
    let sweep = Arc::new(CompilationSweep::new(store.clone(), queue.clone(), CompilationConfig::default()));

    let first = {
        let sweep = sweep.clone();
        tokio::spawn(async move { sweep.drain().await })
    };
    store.entered.notified().await;
    assert!(sweep.is_running());

    let second = sweep.drain().await;
    assert!(second.skipped);
    assert!(second.compiled.is_empty());

    store.gate.notify_one();
    let first = first.await.unwrap();
    assert_eq!(first.compiled, vec!["A".to_string()]);
}
