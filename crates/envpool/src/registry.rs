//! Lease registry: claim, release and expire over the persisted pool.
//!
//! Every read-modify-write runs inside one boundary (`begin()`), which holds
//! a single mutex for both collections and re-reads them from the store
//! after the lock is taken. Moves between collections persist the receiving
//! collection first, so an interrupted commit leaves a duplicate (resolved
//! on the next load) rather than a lost record.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, MutexGuard};

use crate::clock::{Clock, SystemClock};
use crate::error::PoolError;
use crate::record::{AvailableEntry, LeaseEntry, LeaseId, ResourceRecord};
use crate::store::{EventKind, EventLog, RecordStore, StoreError};

pub const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// Both collections as read under the boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolState {
    pub available: Vec<AvailableEntry>,
    pub in_use: Vec<LeaseEntry>,
}

impl PoolState {
    /// Enforce url uniqueness: first occurrence wins inside a collection,
    /// and a url present in both stays leased.
    pub fn reconcile(available: Vec<AvailableEntry>, in_use: Vec<LeaseEntry>) -> Self {
        let mut leased = HashSet::with_capacity(in_use.len());
        let in_use: Vec<LeaseEntry> = in_use
            .into_iter()
            .filter(|lease| {
                let fresh = leased.insert(lease.url().to_string());
                if !fresh {
                    tracing::warn!(url = %lease.url(), lease_id = %lease.lease_id, "Dropping duplicate in-use record");
                }
                fresh
            })
            .collect();

        let mut seen = HashSet::with_capacity(available.len());
        let available = available
            .into_iter()
            .filter(|entry| {
                if leased.contains(entry.url()) {
                    tracing::warn!(url = %entry.url(), "Record both available and in use, keeping lease");
                    return false;
                }
                let fresh = seen.insert(entry.url().to_string());
                if !fresh {
                    tracing::warn!(url = %entry.url(), "Dropping duplicate available record");
                }
                fresh
            })
            .collect();

        Self { available, in_use }
    }

    pub fn contains_url(&self, url: &str) -> bool {
        self.available.iter().any(|e| e.url() == url) || self.in_use.iter().any(|l| l.url() == url)
    }
}

pub struct LeaseRegistry {
    store: Arc<dyn RecordStore>,
    events: EventLog,
    clock: Arc<dyn Clock>,
    ttl: TimeDelta,
    boundary: Mutex<()>,
}

impl LeaseRegistry {
    pub fn new(store: Arc<dyn RecordStore>, ttl: Duration) -> Self {
        Self {
            store,
            events: EventLog::disabled(),
            clock: Arc::new(SystemClock),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            boundary: Mutex::new(()),
        }
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    /// Clock used to stamp records loaded without a usable timestamp.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    /// Enter the boundary and load the current pool.
    ///
    /// The returned transaction holds the lock until dropped; all of its
    /// operations see state read after acquisition. Records that had to be
    /// stamped at load are written back before the transaction is handed
    /// out, so the stamp is only ever taken once.
    pub async fn begin(&self) -> Result<PoolTxn<'_>, StoreError> {
        let guard = self.boundary.lock().await;
        let now = self.clock.now();
        let available = self.store.load_available(now).await?;
        let in_use = self.store.load_in_use(now).await?;

        let state = PoolState::reconcile(available.entries, in_use.entries);

        if in_use.restamped > 0 {
            tracing::info!(count = in_use.restamped, "Persisting load-time stamps for in-use records");
            self.store.save_in_use(&state.in_use).await?;
        }
        if available.restamped > 0 {
            tracing::info!(count = available.restamped, "Persisting load-time stamps for available records");
            self.store.save_available(&state.available).await?;
        }

        Ok(PoolTxn {
            _guard: guard,
            registry: self,
            state,
        })
    }

    pub async fn claim(&self, now: DateTime<Utc>) -> Result<Option<LeaseEntry>, StoreError> {
        self.begin().await?.claim(now).await
    }

    pub async fn release(
        &self,
        lease_id: &LeaseId,
        now: DateTime<Utc>,
    ) -> Result<LeaseEntry, PoolError> {
        self.begin().await?.release(lease_id, now).await
    }

    pub async fn expire(&self, now: DateTime<Utc>) -> Result<Vec<LeaseEntry>, StoreError> {
        self.begin().await?.expire(now).await
    }
}

/// Exclusive view of the pool for the duration of one boundary hold.
///
/// Each mutating call builds the next state, persists it, and adopts it only
/// after the store accepted every write. A failed call leaves the
/// transaction's view unchanged.
pub struct PoolTxn<'a> {
    _guard: MutexGuard<'a, ()>,
    registry: &'a LeaseRegistry,
    state: PoolState,
}

impl PoolTxn<'_> {
    pub fn available(&self) -> &[AvailableEntry] {
        &self.state.available
    }

    pub fn in_use(&self) -> &[LeaseEntry] {
        &self.state.in_use
    }

    pub fn state(&self) -> &PoolState {
        &self.state
    }

    pub fn ttl(&self) -> TimeDelta {
        self.registry.ttl
    }

    /// Take the head of the available queue. `None` when the pool is empty.
    pub async fn claim(&mut self, now: DateTime<Utc>) -> Result<Option<LeaseEntry>, StoreError> {
        if self.state.available.is_empty() {
            tracing::debug!("Claim on empty pool");
            return Ok(None);
        }

        let mut available = self.state.available.clone();
        let head = available.remove(0);
        let lease = head.into_lease(self.mint_lease_id(), now);

        let mut in_use = self.state.in_use.clone();
        in_use.push(lease.clone());

        self.persist_toward_in_use(&available, &in_use).await?;
        self.state = PoolState { available, in_use };

        tracing::info!(url = %lease.url(), lease_id = %lease.lease_id, "Environment claimed");
        self.record(
            now,
            EventKind::Claimed,
            &format!("{} by {}", lease.url(), lease.lease_id),
        )
        .await;

        Ok(Some(lease))
    }

    /// Return a lease to the tail of the available queue.
    pub async fn release(
        &mut self,
        lease_id: &LeaseId,
        now: DateTime<Utc>,
    ) -> Result<LeaseEntry, PoolError> {
        let Some(pos) = self
            .state
            .in_use
            .iter()
            .position(|l| &l.lease_id == lease_id)
        else {
            tracing::debug!(%lease_id, "Release of unknown lease");
            return Err(PoolError::LeaseNotFound);
        };

        let mut in_use = self.state.in_use.clone();
        let lease = in_use.remove(pos);

        let mut available = self.state.available.clone();
        available.push(lease.clone().into_available(now));

        self.persist_toward_available(&available, &in_use).await?;
        self.state = PoolState { available, in_use };

        tracing::info!(url = %lease.url(), %lease_id, "Environment released");
        self.record(
            now,
            EventKind::Released,
            &format!("{} by {}", lease.url(), lease_id),
        )
        .await;

        Ok(lease)
    }

    /// Move every lease older than the TTL back to available, persisting once.
    ///
    /// Returns the reclaimed leases; empty means nothing was written.
    pub async fn expire(&mut self, now: DateTime<Utc>) -> Result<Vec<LeaseEntry>, StoreError> {
        let ttl = self.registry.ttl;
        let (expired, in_use): (Vec<LeaseEntry>, Vec<LeaseEntry>) = self
            .state
            .in_use
            .iter()
            .cloned()
            .partition(|l| l.is_expired(now, ttl));

        if expired.is_empty() {
            return Ok(expired);
        }

        let mut available = self.state.available.clone();
        available.extend(expired.iter().cloned().map(|l| l.into_available(now)));

        self.persist_toward_available(&available, &in_use).await?;
        self.state = PoolState { available, in_use };

        for lease in &expired {
            tracing::info!(url = %lease.url(), lease_id = %lease.lease_id, claimed_at = %lease.claimed_at, "Lease expired");
            self.record(now, EventKind::Expired, lease.url()).await;
        }

        Ok(expired)
    }

    /// Append a new resource to the available queue.
    pub async fn register(
        &mut self,
        record: ResourceRecord,
        now: DateTime<Utc>,
    ) -> Result<AvailableEntry, PoolError> {
        if self.state.contains_url(&record.url) {
            return Err(PoolError::DuplicateResource(record.url));
        }

        let entry = AvailableEntry::new(record, now);
        let mut available = self.state.available.clone();
        available.push(entry.clone());

        self.registry.store.save_available(&available).await?;
        self.state.available = available;

        tracing::info!(url = %entry.url(), version = %entry.record.version, "Environment added");
        self.record(
            now,
            EventKind::Added,
            &format!("{} - version {}", entry.url(), entry.record.version),
        )
        .await;

        Ok(entry)
    }

    /// Append several resources with a single write.
    ///
    /// Each record is accepted or rejected on its own (a url already pooled,
    /// or repeated earlier in the batch, is a duplicate). Results follow the
    /// input order. A failed write rejects the whole batch.
    pub async fn register_batch(
        &mut self,
        records: Vec<ResourceRecord>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Result<AvailableEntry, PoolError>>, StoreError> {
        let mut available = self.state.available.clone();
        let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
        let mut results = Vec::with_capacity(records.len());

        for record in records {
            if self.state.contains_url(&record.url) || !seen.insert(record.url.clone()) {
                results.push(Err(PoolError::DuplicateResource(record.url)));
                continue;
            }
            let entry = AvailableEntry::new(record, now);
            available.push(entry.clone());
            results.push(Ok(entry));
        }

        if available.len() == self.state.available.len() {
            return Ok(results);
        }

        self.registry.store.save_available(&available).await?;
        self.state.available = available;

        for entry in results.iter().flatten() {
            tracing::info!(url = %entry.url(), version = %entry.record.version, "Environment added");
            self.record(
                now,
                EventKind::Added,
                &format!("{} - version {}", entry.url(), entry.record.version),
            )
            .await;
        }

        Ok(results)
    }

    fn mint_lease_id(&self) -> LeaseId {
        loop {
            let id = LeaseId::new();
            if !self.state.in_use.iter().any(|l| l.lease_id == id) {
                return id;
            }
        }
    }

    async fn persist_toward_in_use(
        &self,
        available: &[AvailableEntry],
        in_use: &[LeaseEntry],
    ) -> Result<(), StoreError> {
        let store = &self.registry.store;
        store.save_in_use(in_use).await?;
        store.save_available(available).await
    }

    async fn persist_toward_available(
        &self,
        available: &[AvailableEntry],
        in_use: &[LeaseEntry],
    ) -> Result<(), StoreError> {
        let store = &self.registry.store;
        store.save_available(available).await?;
        store.save_in_use(in_use).await
    }

    async fn record(&self, at: DateTime<Utc>, kind: EventKind, detail: &str) {
        self.registry.events.record(at, kind, detail).await;
    }
}
