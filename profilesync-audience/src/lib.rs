//! Audiences for ProfileSync.
//!
//! An audience is a named group whose membership is a rule over profile
//! fields. This crate covers the audience lifecycle:
//!
//! - [`AudienceSpecCompiler`]: parses the rule language into [`AudienceSpec`]s
//! - [`AudienceReconciler`]: brings a live [`AudienceStore`] in line with a
//!   declared set of specs
//! - [`AudienceCompilationQueue`] + [`CompilationSweep`]: collect audiences
//!   whose membership may have changed and recompile them in bounded sweeps
//! - [`specs_from_registry`]: derives specs from field audience triggers
//! - [`MemoryAudienceStore`]: an in-process store for tests and dry runs

mod compiler;
mod config;
mod derive;
mod error;
mod memory;
mod queue;
mod reconciler;
mod spec;
mod store;
mod sweep;

pub use compiler::{AudienceSpecCompiler, BatchCompile, MAX_NESTING, RuleSource};
pub use config::CompilationConfig;
pub use derive::specs_from_registry;
pub use error::{AudienceStoreError, CompileError, ReconcileError, ReconcileFailure};
pub use memory::MemoryAudienceStore;
pub use profilesync_model::{BooleanOperator, ComparisonOperator};
pub use queue::AudienceCompilationQueue;
pub use reconciler::{AudienceReconciler, ReconcileReport, Rename};
pub use spec::{AudienceSpec, Rule, RuleToken};
pub use store::{AudienceId, AudienceStore, LiveAudience};
pub use sweep::{CompilationSweep, DrainReport};
