//! Durable storage for the two pool collections.
//!
//! Every save replaces a whole collection atomically; a reader sees either
//! the previous or the new contents, never a mix.

mod event_log;
mod flat;
mod memory;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::record::{AvailableEntry, LeaseEntry};

pub use event_log::{EventKind, EventLog};
pub use flat::FlatFileStore;
pub use memory::MemoryStore;

#[cfg(test)]
pub(crate) use memory::FlakyStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to encode record: {0}")]
    Encode(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// One collection as read from storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loaded<T> {
    pub entries: Vec<T>,
    /// Records whose timestamp was missing or unreadable and was set to the
    /// load time. Nothing is durable until the collection is saved.
    pub restamped: usize,
}

impl<T> Loaded<T> {
    pub fn clean(entries: Vec<T>) -> Self {
        Self {
            entries,
            restamped: 0,
        }
    }
}

/// Record storage backing a pool.
///
/// Loads are defensive: missing or corrupt data reads as an empty (or
/// shorter) collection, and records without a usable timestamp are stamped
/// with `now`. Saves are full-collection overwrites.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load_available(&self, now: DateTime<Utc>)
    -> Result<Loaded<AvailableEntry>, StoreError>;

    async fn load_in_use(&self, now: DateTime<Utc>) -> Result<Loaded<LeaseEntry>, StoreError>;

    async fn save_available(&self, entries: &[AvailableEntry]) -> Result<(), StoreError>;

    async fn save_in_use(&self, entries: &[LeaseEntry]) -> Result<(), StoreError>;
}
