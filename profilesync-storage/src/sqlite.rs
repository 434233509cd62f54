//! SQLite-backed profile store.
//!
//! Field values are kept as JSON so typed values survive a round trip.
//! Writes are staged in memory and applied in one transaction on commit.

use crate::backend;
use async_trait::async_trait;
use profilesync_model::{ProfileStore, StoreError, StoreResult, StoredValue};
use profilesync_types::{FieldValue, ProfileId};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Durable [`ProfileStore`] in a single SQLite file.
pub struct SqliteProfileStore {
    conn: Arc<Mutex<Connection>>,
    staged: Mutex<HashMap<ProfileId, Vec<(String, FieldValue)>>>,
}

impl SqliteProfileStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(|e| backend("failed to open profile store", e))?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(|e| backend("failed to open in-memory profile store", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            staged: Mutex::new(HashMap::new()),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> StoreResult<()> {
        self.conn()
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS profiles (
                    id TEXT PRIMARY KEY
                );

                CREATE TABLE IF NOT EXISTS profile_fields (
                    profile_id TEXT NOT NULL,
                    key TEXT NOT NULL,
                    value TEXT NOT NULL,
                    UNIQUE(profile_id, key)
                );

                CREATE TABLE IF NOT EXISTS field_attributes (
                    key TEXT PRIMARY KEY,
                    multi_valued INTEGER NOT NULL DEFAULT 0,
                    required INTEGER NOT NULL DEFAULT 0
                );
                ",
            )
            .map_err(|e| backend("failed to create profile schema", e))
    }

    /// Declares store-side attributes for a field key.
    pub fn set_attributes(&self, key: &str, multi_valued: bool, required: bool) -> StoreResult<()> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO field_attributes (key, multi_valued, required) VALUES (?1, ?2, ?3)",
                params![key, multi_valued, required],
            )
            .map_err(|e| backend("failed to set field attributes", e))?;
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SqliteProfileStore {
    async fn profile_exists(&self, id: &ProfileId) -> StoreResult<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row("SELECT 1 FROM profiles WHERE id = ?1", params![id.as_str()], |row| row.get(0))
            .optional()
            .map_err(|e| backend("failed to look up profile", e))?;
        Ok(found.is_some())
    }

    async fn create_profile(&self, id: &ProfileId) -> StoreResult<()> {
        let inserted = self
            .conn()
            .execute("INSERT OR IGNORE INTO profiles (id) VALUES (?1)", params![id.as_str()])
            .map_err(|e| backend("failed to create profile", e))?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists(id.clone()));
        }
        Ok(())
    }

    async fn get_field(&self, id: &ProfileId, key: &str) -> StoreResult<Option<StoredValue>> {
        if !self.profile_exists(id).await? {
            return Err(StoreError::NotFound(id.clone()));
        }
        let conn = self.conn();
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM profile_fields WHERE profile_id = ?1 AND key = ?2",
                params![id.as_str(), key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| backend("failed to read field", e))?;
        let attributes: Option<(bool, bool)> = conn
            .query_row(
                "SELECT multi_valued, required FROM field_attributes WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| backend("failed to read field attributes", e))?;
        if raw.is_none() && attributes.is_none() {
            return Ok(None);
        }

        let value = match raw {
            Some(json) => serde_json::from_str(&json).map_err(|e| backend("corrupt field value", e))?,
            None => FieldValue::Empty,
        };
        let (multi_valued, required) = attributes.unwrap_or_default();
        Ok(Some(StoredValue {
            value,
            multi_valued,
            required,
        }))
    }

    async fn set_field(&self, id: &ProfileId, key: &str, value: FieldValue) -> StoreResult<()> {
        if !self.profile_exists(id).await? {
            return Err(StoreError::NotFound(id.clone()));
        }
        self.staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(id.clone())
            .or_default()
            .push((key.to_string(), value));
        Ok(())
    }

    async fn commit(&self, id: &ProfileId) -> StoreResult<()> {
        let staged = self
            .staged
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .unwrap_or_default();
        let mut conn = self.conn();
        let tx = conn.transaction().map_err(|e| backend("failed to begin commit", e))?;
        for (key, value) in &staged {
            let json = serde_json::to_string(value).map_err(|e| backend("failed to encode field value", e))?;
            tx.execute(
                "INSERT OR REPLACE INTO profile_fields (profile_id, key, value) VALUES (?1, ?2, ?3)",
                params![id.as_str(), key, json],
            )
            .map_err(|e| backend("failed to write field", e))?;
        }
        tx.commit().map_err(|e| backend("failed to commit profile", e))?;
        debug!(profile = %id, fields = staged.len(), "profile committed");
        Ok(())
    }

    async fn list_profiles(&self) -> StoreResult<Vec<ProfileId>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT id FROM profiles ORDER BY id")
            .map_err(|e| backend("failed to list profiles", e))?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| backend("failed to list profiles", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| backend("failed to list profiles", e))?;
        ids.iter()
            .map(|id| ProfileId::parse(id).map_err(|e| backend("invalid stored profile id", e)))
            .collect()
    }
}
