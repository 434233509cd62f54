//! Reference adapters for the ProfileSync store ports.
//!
//! - [`MemoryProfileStore`]: in-process store with staged writes, field
//!   attributes and failure injection, for tests and dry runs
//! - [`SqliteProfileStore`]: a durable store in a single SQLite file
//! - [`MemorySearchIndex`]: a fixed search snapshot
//!
//! Both stores stage [`set_field`](profilesync_model::ProfileStore::set_field)
//! writes per profile and apply them on commit.

mod memory;
mod search;
mod sqlite;

pub use memory::MemoryProfileStore;
pub use search::MemorySearchIndex;
pub use sqlite::SqliteProfileStore;

use profilesync_model::StoreError;

fn backend(context: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("{context}: {e}"))
}
