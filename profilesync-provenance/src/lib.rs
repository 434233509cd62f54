//! Field provenance for ProfileSync.
//!
//! Every synchronized field carries a record of which source last wrote it,
//! when, and on whose behalf, plus a short bounded history of previous
//! owners. This crate provides:
//!
//! - [`SourceLog`] / [`SourceLogEntry`] / [`HistoryEntry`]: the in-memory log
//! - [`codec`]: the line-oriented text form stored alongside the profile,
//!   capped at [`codec::MAX_ENCODED_LEN`] characters and tolerant of the two
//!   older layouts still found in long-lived profiles
//! - [`HashLog`]: the last value hash each escalating source proposed
//! - [`content_hash`]: the short hash used for change detection
//!
//! The codec never fails: malformed input degrades to fewer entries.

pub mod codec;
mod entry;
mod hash;
mod hash_log;
mod log;

pub use codec::EncodedLog;
pub use entry::{Captured, HistoryEntry, SourceLogEntry, Stamp};
pub use hash::content_hash;
pub use hash_log::HashLog;
pub use log::SourceLog;
