//! Draining the compilation queue.

use crate::config::CompilationConfig;
use crate::error::AudienceStoreError;
use crate::queue::AudienceCompilationQueue;
use crate::store::AudienceStore;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub compiled: Vec<String>,
    pub failed: Vec<(String, String)>,
    /// Pushed back because another compilation job was running.
    pub requeued: Vec<String>,
    /// True when another sweep was already running and this call did nothing.
    pub skipped: bool,
}

/// Compiles queued audiences in bounded sweeps, one sweep at a time.
pub struct CompilationSweep {
    store: Arc<dyn AudienceStore>,
    queue: Arc<AudienceCompilationQueue>,
    config: CompilationConfig,
    running: AtomicBool,
}

/// Clears the single-flight flag however the sweep ends.
struct Running<'a>(&'a AtomicBool);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CompilationSweep {
    pub fn new(store: Arc<dyn AudienceStore>, queue: Arc<AudienceCompilationQueue>, config: CompilationConfig) -> Self {
        Self {
            store,
            queue,
            config,
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Drains up to the configured `drain_max` audiences.
    pub async fn drain(&self) -> DrainReport {
        self.drain_up_to(self.config.drain_max).await
    }

    /// Pops and compiles up to `max` audiences. Returns immediately with
    /// `skipped` set if a sweep is already running.
    ///
    /// When the store reports a running compilation job, a sweep of at
    /// least `batch_threshold` stops that job and retries once; a smaller
    /// sweep puts the audience back and ends early.
    pub async fn drain_up_to(&self, max: usize) -> DrainReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("audience compilation sweep already running");
            return DrainReport {
                skipped: true,
                ..DrainReport::default()
            };
        }
        let _running = Running(&self.running);
        let mut report = DrainReport::default();

        for _ in 0..max {
            let Some(name) = self.queue.pop() else {
                break;
            };
            match self.store.compile(&name).await {
                Ok(()) => report.compiled.push(name),
                Err(AudienceStoreError::CompilationInProgress) if max >= self.config.batch_threshold => {
                    info!(audience = %name, "stopping running compilation job");
                    if let Err(error) = self.store.stop_compilation().await {
                        warn!(%error, "failed to stop running compilation job");
                    }
                    match self.store.compile(&name).await {
                        Ok(()) => report.compiled.push(name),
                        Err(error) => {
                            warn!(audience = %name, %error, "audience compilation failed after retry");
                            report.failed.push((name, error.to_string()));
                        }
                    }
                }
                Err(AudienceStoreError::CompilationInProgress) => {
                    debug!(audience = %name, "compilation job busy, backing off");
                    self.queue.push(&name);
                    report.requeued.push(name);
                    break;
                }
                Err(error) => {
                    warn!(audience = %name, %error, "audience compilation failed");
                    report.failed.push((name, error.to_string()));
                }
            }
        }

        if !report.compiled.is_empty() {
            info!(compiled = report.compiled.len(), remaining = self.queue.len(), "compiled audiences");
        }
        report
    }
}
