//! The data loader seam.
//!
//! Each external source is wrapped in a [`DataLoader`]. The orchestrator
//! calls the bulk-load hook once per pass, then asks the loader which
//! profiles it wants to update. Every hook except [`DataLoader::source`]
//! has a default, so a loader implements only what its source supports.

use crate::error::SyncResult;
use crate::merge::MergeEngine;
use async_trait::async_trait;
use profilesync_model::Profile;
use profilesync_types::SourceName;
use std::collections::HashMap;
use std::time::Duration;

/// Default minimum interval between real-time updates of one profile by
/// one loader.
pub const DEFAULT_REAL_TIME_EXPIRY: Duration = Duration::from_secs(600);

/// How a loader without bulk data spreads real-time updates over passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Spread {
    /// No real-time updates during batch passes.
    #[default]
    Disabled,
    /// At most this many profiles per pass, chosen at random among the
    /// profiles not updated within the real-time expiry.
    Sample(usize),
    /// Every valid profile, every pass.
    All,
}

/// Read-only view of the pass population, keyed by lower-cased profile id.
#[derive(Debug, Clone, Default)]
pub struct ProfileIndex {
    profiles: HashMap<String, Profile>,
}

impl ProfileIndex {
    /// Indexes `profiles`; the first profile wins when ids collide.
    pub fn build<'a>(profiles: impl IntoIterator<Item = &'a Profile>) -> Self {
        let mut index = HashMap::new();
        for profile in profiles {
            index.entry(profile.id().index_key()).or_insert_with(|| profile.clone());
        }
        Self { profiles: index }
    }

    /// Looks up a profile by id, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Profile> {
        self.profiles.get(&id.trim().to_lowercase())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.profiles.values()
    }
}

/// An external source of profile data.
///
/// Loaders are shared across concurrent profile tasks, so hooks take
/// `&self`; state gathered by [`load_bulk_data`](Self::load_bulk_data) is
/// kept behind the loader's own locks.
#[async_trait]
pub trait DataLoader: Send + Sync {
    /// The source name this loader writes as.
    fn source(&self) -> &SourceName;

    /// Loads the loader's bulk data for a pass. Returns `true` when bulk
    /// data is available; `false` means the loader can only update
    /// profiles one at a time.
    async fn load_bulk_data(&self, _index: &ProfileIndex) -> SyncResult<bool> {
        Ok(false)
    }

    fn spread(&self) -> Spread {
        Spread::Disabled
    }

    fn real_time_update_expiry(&self) -> Duration {
        DEFAULT_REAL_TIME_EXPIRY
    }

    fn is_valid_profile(&self, _profile: &Profile) -> bool {
        true
    }

    /// Whether the bulk data has a record for the profile.
    fn bulk_data_contains(&self, _profile: &Profile) -> bool {
        false
    }

    /// Whether the profile still carries values this source wrote before
    /// its record disappeared.
    fn bulk_data_used_to_contain(&self, _profile: &Profile) -> bool {
        false
    }

    /// Updates a profile from bulk data.
    async fn update_bulk(&self, _profile: &mut Profile, _merge: &MergeEngine) -> SyncResult<()> {
        Ok(())
    }

    /// Updates a profile by querying the source directly. Returns whether
    /// the source answered.
    async fn update_real_time(&self, _profile: &mut Profile, _merge: &MergeEngine) -> SyncResult<bool> {
        Ok(false)
    }

    fn secondary_update_required(&self) -> bool {
        false
    }

    fn should_update_in_secondary(&self, _profile: &Profile) -> bool {
        false
    }

    /// Second sweep, run after every profile had its primary update.
    async fn update_secondary(&self, _profile: &mut Profile, _merge: &MergeEngine) -> SyncResult<()> {
        Ok(())
    }

    /// Gathers data from every profile for the loader's own use. Calls are
    /// serialized per loader.
    async fn collect_incidental(&self, _profile: &Profile) -> SyncResult<()> {
        Ok(())
    }

    fn should_export(&self) -> bool {
        false
    }

    async fn add_export_row(&self, _profile: &Profile) -> SyncResult<()> {
        Ok(())
    }

    /// Writes the collected export once the pass is over.
    async fn write_export(&self) -> SyncResult<()> {
        Ok(())
    }
}
