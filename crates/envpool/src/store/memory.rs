//! In-process record store.

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Loaded, RecordStore, StoreError};
use crate::record::{AvailableEntry, LeaseEntry};

/// Volatile store holding both collections in memory. State is lost with
/// the process; useful for embedding and tests.
#[derive(Default)]
pub struct MemoryStore {
    available: StdMutex<Vec<AvailableEntry>>,
    in_use: StdMutex<Vec<LeaseEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(available: Vec<AvailableEntry>, in_use: Vec<LeaseEntry>) -> Self {
        Self {
            available: StdMutex::new(available),
            in_use: StdMutex::new(in_use),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn load_available(
        &self,
        _now: DateTime<Utc>,
    ) -> Result<Loaded<AvailableEntry>, StoreError> {
        let entries = self.available.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Loaded::clean(entries.clone()))
    }

    async fn load_in_use(&self, _now: DateTime<Utc>) -> Result<Loaded<LeaseEntry>, StoreError> {
        let entries = self.in_use.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Loaded::clean(entries.clone()))
    }

    async fn save_available(&self, entries: &[AvailableEntry]) -> Result<(), StoreError> {
        *self.available.lock().unwrap_or_else(|e| e.into_inner()) = entries.to_vec();
        Ok(())
    }

    async fn save_in_use(&self, entries: &[LeaseEntry]) -> Result<(), StoreError> {
        *self.in_use.lock().unwrap_or_else(|e| e.into_inner()) = entries.to_vec();
        Ok(())
    }
}

/// Store wrapper that can be told to fail saves, for exercising error paths.
#[cfg(test)]
pub(crate) struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_available: std::sync::atomic::AtomicBool,
    pub fail_in_use: std::sync::atomic::AtomicBool,
    pub saves: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl FlakyStore {
    pub fn new(inner: MemoryStore) -> Self {
        Self {
            inner,
            fail_available: Default::default(),
            fail_in_use: Default::default(),
            saves: Default::default(),
        }
    }

    pub fn set_failing(&self, available: bool, in_use: bool) {
        use std::sync::atomic::Ordering;
        self.fail_available.store(available, Ordering::SeqCst);
        self.fail_in_use.store(in_use, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn injected(name: &str) -> StoreError {
        StoreError::io(name, std::io::Error::other("injected failure"))
    }
}

#[cfg(test)]
#[async_trait]
impl RecordStore for FlakyStore {
    async fn load_available(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Loaded<AvailableEntry>, StoreError> {
        self.inner.load_available(now).await
    }

    async fn load_in_use(&self, now: DateTime<Utc>) -> Result<Loaded<LeaseEntry>, StoreError> {
        self.inner.load_in_use(now).await
    }

    async fn save_available(&self, entries: &[AvailableEntry]) -> Result<(), StoreError> {
        use std::sync::atomic::Ordering;
        if self.fail_available.load(Ordering::SeqCst) {
            return Err(Self::injected("available"));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save_available(entries).await
    }

    async fn save_in_use(&self, entries: &[LeaseEntry]) -> Result<(), StoreError> {
        use std::sync::atomic::Ordering;
        if self.fail_in_use.load(Ordering::SeqCst) {
            return Err(Self::injected("in_use"));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save_in_use(entries).await
    }
}
