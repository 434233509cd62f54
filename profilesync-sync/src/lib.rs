//! Merge engine and update orchestration for ProfileSync.
//!
//! # Architecture
//!
//! External systems are wrapped in [`DataLoader`]s. Loaders never write
//! profile fields directly; every proposed value goes through the
//! [`MergeEngine`], which applies the field's source priorities, records
//! provenance in the field's source log and queues the audiences whose
//! membership the change may affect.
//!
//! ## Components
//!
//! - **Merge**: priority rules, source logs, audience queueing
//! - **Mappings**: declarative record-to-field conversions for loaders
//! - **Repository**: loading, promoting and saving profiles through the
//!   store ports
//! - **Orchestrator**: batch passes across the population and single
//!   profile real-time updates
//!
//! # Example
//!
//! ```
//! use profilesync_audience::AudienceCompilationQueue;
//! use profilesync_model::{FieldDescriptor, FieldRegistry, LoadTier, Profile, SourceRule};
//! use profilesync_sync::MergeEngine;
//! use profilesync_types::{ProfileId, SourceName};
//! use std::sync::Arc;
//!
//! let registry = FieldRegistry::builder("UserProfile")
//!     .field(FieldDescriptor::text("Title").source(SourceRule::new("HR", 1)))
//!     .build()
//!     .unwrap();
//! let merge = MergeEngine::new(Arc::new(registry), Arc::new(AudienceCompilationQueue::new()));
//!
//! let mut profile = Profile::new(ProfileId::parse("CONTOSO\\ada").unwrap(), LoadTier::Full);
//! assert!(merge.apply(&mut profile, &SourceName::new("HR"), "Title", "Engineer").unwrap());
//! ```

mod config;
mod error;
mod loader;
mod mapping;
mod merge;
mod orchestrator;
mod repository;
mod state;

pub use config::SyncConfig;
pub use error::{MergeError, SyncError, SyncResult};
pub use loader::{DEFAULT_REAL_TIME_EXPIRY, DataLoader, ProfileIndex, Spread};
pub use mapping::FieldMappings;
pub use merge::MergeEngine;
pub use orchestrator::{LoaderReport, LoaderState, LoaderStats, Orchestrator, PassOutcome, PassReport};
pub use repository::ProfileRepository;
pub use state::RecencyMap;
