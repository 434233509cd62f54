//! Commands behind the `profilesync` binary.
//!
//! Each command reads its inputs from files, returns a serializable
//! result, and leaves printing to `main`.

use anyhow::{Context, Result};
use profilesync_audience::{
    AudienceCompilationQueue, AudienceReconciler, AudienceSpec, AudienceSpecCompiler, CompilationConfig,
    CompilationSweep, DrainReport, MemoryAudienceStore, ReconcileReport, specs_from_registry,
};
use profilesync_model::FieldRegistry;
use profilesync_provenance::SourceLog;
use profilesync_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Top-level configuration file.
///
/// ```toml
/// registry = "fields.toml"
///
/// [sync]
/// max_parallelism = 16
///
/// [audiences]
/// obsolete_prefix = "RETIRED"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileSyncConfig {
    pub sync: SyncConfig,
    pub audiences: CompilationConfig,
    /// Field registry document, relative to the config file.
    pub registry: Option<PathBuf>,
}

impl ProfileSyncConfig {
    /// Loads the configuration, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))?;
        if let (Some(registry), Some(dir)) = (&config.registry, path.parent()) {
            if registry.is_relative() {
                config.registry = Some(dir.join(registry));
            }
        }
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Loads the field registry named by the config, if any.
    pub fn load_registry(&self) -> Result<Option<FieldRegistry>> {
        let Some(path) = &self.registry else {
            return Ok(None);
        };
        let text = fs::read_to_string(path).with_context(|| format!("failed to read registry {}", path.display()))?;
        let registry =
            FieldRegistry::from_toml(&text).with_context(|| format!("invalid registry {}", path.display()))?;
        info!(fields = registry.len(), profile_type = registry.profile_type(), "registry loaded");
        Ok(Some(registry))
    }
}

// ── audiences check ─────────────────────────────────────────────

/// Result of compiling an audience file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckReport {
    pub specs: Vec<AudienceSpec>,
    /// Names of the audiences that failed to compile.
    pub failed: Vec<String>,
    pub errors: Vec<String>,
}

impl CheckReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Compiles a sectioned audience file. Rule errors are collected; a
/// malformed file structure fails outright.
pub fn check_audiences(path: &Path) -> Result<CheckReport> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let batch = AudienceSpecCompiler::compile_document(&text)
        .with_context(|| format!("malformed audience file {}", path.display()))?;
    for error in &batch.errors {
        warn!(audience = %error.audience, "{error}");
    }
    let mut failed: Vec<String> = batch.errors.iter().map(|e| e.audience.clone()).collect();
    failed.dedup();
    Ok(CheckReport {
        specs: batch.specs,
        failed,
        errors: batch.errors.iter().map(ToString::to_string).collect(),
    })
}

// ── audiences reconcile ─────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileOutcome {
    pub report: ReconcileReport,
    pub compilation: DrainReport,
    /// Rule errors of the audiences left out of this run.
    pub compile_errors: Vec<String>,
}

/// Options for [`reconcile_audiences`].
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// JSON file holding the live audiences; created when missing.
    pub state: PathBuf,
    pub allow_deletion: bool,
    /// Also reconcile the audiences derived from the field registry.
    pub include_registry: bool,
}

/// Reconciles the audiences of a file against a JSON audience state,
/// compiles what changed and writes the state back.
///
/// Audiences whose rules fail to compile are left out of the run and
/// listed in [`ReconcileOutcome::compile_errors`]; their live audiences are
/// never deleted. Audiences that fail to reconcile are reported as an
/// error after the state has been written.
pub async fn reconcile_audiences(
    path: &Path,
    options: &ReconcileOptions,
    config: &ProfileSyncConfig,
) -> Result<ReconcileOutcome> {
    let check = check_audiences(path)?;
    if !check.is_clean() {
        warn!(failed = check.failed.len(), "reconciling without audiences that failed to compile");
    }
    let mut specs = check.specs;
    if options.include_registry {
        if let Some(registry) = config.load_registry()? {
            for spec in specs_from_registry(&registry) {
                let declared = specs.iter().any(|s| s.name == spec.name) || check.failed.contains(&spec.name);
                if declared {
                    debug!(audience = %spec.name, "audience file overrides registry audience");
                    continue;
                }
                specs.push(spec);
            }
        }
    }

    let store = Arc::new(load_state(&options.state)?);
    let queue = Arc::new(AudienceCompilationQueue::new());
    let reconciler = AudienceReconciler::new(store.clone(), queue.clone())
        .with_obsolete_prefix(config.audiences.obsolete_prefix.clone());
    let result = reconciler
        .reconcile_protecting(&specs, options.allow_deletion, &check.failed)
        .await;

    let sweep = CompilationSweep::new(store.clone(), queue, config.audiences.clone());
    let compilation = sweep.drain().await;
    save_state(&options.state, &store)?;

    let report = result.context("audience reconciliation incomplete")?;
    info!(
        created = report.created.len(),
        updated = report.updated.len(),
        compiled = compilation.compiled.len(),
        skipped = check.failed.len(),
        "audiences reconciled"
    );
    Ok(ReconcileOutcome {
        report,
        compilation,
        compile_errors: check.errors,
    })
}

fn load_state(path: &Path) -> Result<MemoryAudienceStore> {
    if !path.exists() {
        debug!(path = %path.display(), "no audience state yet, starting empty");
        return Ok(MemoryAudienceStore::new());
    }
    let json = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    MemoryAudienceStore::from_json(&json).with_context(|| format!("invalid audience state {}", path.display()))
}

fn save_state(path: &Path, store: &MemoryAudienceStore) -> Result<()> {
    let json = store.to_json().context("failed to serialize audience state")?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

// ── sourcelog ───────────────────────────────────────────────────

/// Decodes a stored source log into its entries.
pub fn decode_source_log(path: &Path) -> Result<SourceLog> {
    let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(SourceLog::decode(&text))
}

/// Encodes a JSON source log into its stored text form.
pub fn encode_source_log(path: &Path) -> Result<String> {
    let json = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let log: SourceLog = serde_json::from_str(&json).with_context(|| format!("invalid source log {}", path.display()))?;
    let encoded = log.encode();
    if encoded.truncated {
        warn!(history_kept = encoded.history_kept, "encoded log exceeds the size limit and was truncated");
    }
    Ok(encoded.text)
}
