//! PoolService: transport-agnostic facade over the lease registry.
//!
//! Each operation takes the registry boundary once, runs an opportunistic
//! expiry pass, then performs its own mutation inside the same hold.
//! Transports (HTTP today) only translate requests and outcomes.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::clock::Clock;
use crate::error::{PoolError, Result};
use crate::record::{AvailableEntry, LeaseEntry, LeaseId, NewResource};
use crate::registry::{LeaseRegistry, PoolTxn};
use crate::version::VersionInfo;

/// A freshly registered resource.
#[derive(Debug, Clone)]
pub struct Registered {
    pub entry: AvailableEntry,
    pub available_count: usize,
}

/// A successful claim, credentials included.
#[derive(Debug, Clone)]
pub struct ClaimedLease {
    pub lease: LeaseEntry,
    pub expires_at: DateTime<Utc>,
    pub remaining: usize,
}

#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed(ClaimedLease),
    /// No environment free right now. Expected, not a fault.
    Exhausted,
}

impl ClaimOutcome {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted)
    }

    pub fn claimed(self) -> Option<ClaimedLease> {
        match self {
            Self::Claimed(c) => Some(c),
            Self::Exhausted => None,
        }
    }
}

/// Per-record result of a batch registration, in input order.
#[derive(Debug)]
pub struct BatchItem {
    pub url: String,
    pub result: Result<AvailableEntry>,
}

#[derive(Debug)]
pub struct BatchRegistered {
    pub items: Vec<BatchItem>,
    pub added: usize,
    pub available_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    pub url: String,
    pub version: String,
    pub available_count: usize,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub available_count: usize,
    pub in_use_count: usize,
    pub total_count: usize,
    pub available_urls: Vec<String>,
    pub in_use_urls: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl PoolStatus {
    fn from_txn(txn: &PoolTxn<'_>, timestamp: DateTime<Utc>) -> Self {
        let available_urls: Vec<String> =
            txn.available().iter().map(|e| e.url().to_string()).collect();
        let in_use_urls: Vec<String> = txn.in_use().iter().map(|l| l.url().to_string()).collect();

        Self {
            available_count: available_urls.len(),
            in_use_count: in_use_urls.len(),
            total_count: available_urls.len() + in_use_urls.len(),
            available_urls,
            in_use_urls,
            timestamp,
        }
    }
}

pub struct PoolService {
    registry: Arc<LeaseRegistry>,
    clock: Arc<dyn Clock>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    version: VersionInfo,
}

impl PoolService {
    pub fn new(registry: Arc<LeaseRegistry>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            clock: registry.clock().clone(),
            registry,
            shutdown_tx,
            shutdown_rx,
            version: VersionInfo::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    pub fn registry(&self) -> &Arc<LeaseRegistry> {
        &self.registry
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn version(&self) -> &VersionInfo {
        &self.version
    }

    pub fn ttl(&self) -> TimeDelta {
        self.registry.ttl()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Add a resource to the tail of the available queue.
    ///
    /// Input is validated before the boundary is entered. Expired leases are
    /// reclaimed first so a url that just came back is seen as a duplicate
    /// of its available entry rather than of a stale lease.
    pub async fn register(&self, input: NewResource) -> Result<Registered> {
        let record = input.validate().map_err(PoolError::InvalidInput)?;

        let now = self.clock.now();
        let mut txn = self.registry.begin().await?;
        txn.expire(now).await?;
        let entry = txn.register(record, now).await?;

        Ok(Registered {
            entry,
            available_count: txn.available().len(),
        })
    }

    /// Register several resources under one boundary hold.
    ///
    /// Invalid and duplicate records are reported per item and do not stop
    /// the rest; only a storage failure fails the whole call.
    pub async fn register_many(&self, inputs: Vec<NewResource>) -> Result<BatchRegistered> {
        let mut checked: Vec<(String, Option<PoolError>)> = Vec::with_capacity(inputs.len());
        let mut valid = Vec::new();

        for input in inputs {
            let url = input.url.trim().to_string();
            match input.validate() {
                Ok(record) => {
                    valid.push(record);
                    checked.push((url, None));
                }
                Err(msg) => checked.push((url, Some(PoolError::InvalidInput(msg)))),
            }
        }

        let now = self.clock.now();
        let mut txn = self.registry.begin().await?;
        txn.expire(now).await?;
        let mut outcomes = txn.register_batch(valid, now).await?.into_iter();

        // One outcome per valid record, consumed in input order.
        let items: Vec<BatchItem> = checked
            .into_iter()
            .filter_map(|(url, rejected)| {
                let result = match rejected {
                    Some(e) => Err(e),
                    None => outcomes.next()?,
                };
                Some(BatchItem { url, result })
            })
            .collect();

        let added = items.iter().filter(|i| i.result.is_ok()).count();
        Ok(BatchRegistered {
            items,
            added,
            available_count: txn.available().len(),
        })
    }

    /// Claim the oldest available resource, or report exhaustion.
    pub async fn claim(&self) -> Result<ClaimOutcome> {
        let now = self.clock.now();
        let mut txn = self.registry.begin().await?;
        txn.expire(now).await?;

        let Some(lease) = txn.claim(now).await? else {
            return Ok(ClaimOutcome::Exhausted);
        };

        Ok(ClaimOutcome::Claimed(ClaimedLease {
            expires_at: lease.expires_at(txn.ttl()),
            remaining: txn.available().len(),
            lease,
        }))
    }

    /// Return a lease to the pool.
    pub async fn release(&self, lease_id: &str) -> Result<Released> {
        let lease_id = LeaseId::parse(lease_id)
            .ok_or_else(|| PoolError::InvalidInput("Missing lease_id parameter".to_string()))?;

        let now = self.clock.now();
        let mut txn = self.registry.begin().await?;
        let lease = txn.release(&lease_id, now).await?;

        Ok(Released {
            url: lease.record.url,
            version: lease.record.version,
            available_count: txn.available().len(),
        })
    }

    /// Counts and urls of both collections.
    ///
    /// Read-only from the caller's side: a failed reclaim pass is logged and
    /// the status reflects the pool as loaded.
    pub async fn status(&self) -> Result<PoolStatus> {
        let now = self.clock.now();
        let mut txn = self.registry.begin().await?;
        if let Err(e) = txn.expire(now).await {
            tracing::warn!(error = %e, "Reclaim during status failed");
        }
        Ok(PoolStatus::from_txn(&txn, now))
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::registry::DEFAULT_LEASE_TTL;
    use crate::store::{FlakyStore, MemoryStore, RecordStore};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn service_with_store(store: Arc<dyn RecordStore>) -> (Arc<ManualClock>, PoolService) {
        let clock = Arc::new(ManualClock::new(t0()));
        let registry = Arc::new(LeaseRegistry::new(store, DEFAULT_LEASE_TTL));
        let service = PoolService::new(registry).with_clock(clock.clone());
        (clock, service)
    }

    fn service() -> (Arc<ManualClock>, PoolService) {
        service_with_store(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn register_validates_before_touching_state() {
        let store = Arc::new(FlakyStore::new(MemoryStore::new()));
        let (_clock, svc) = service_with_store(store.clone());

        let err = svc
            .register(NewResource::new("http://a", "", "p"))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::InvalidInput(_)));
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn register_returns_record_and_count() {
        let (_clock, svc) = service();

        let first = svc
            .register(NewResource::new("http://a", "u", "p").with_version("3.12"))
            .await
            .unwrap();
        assert_eq!(first.available_count, 1);
        assert_eq!(first.entry.record.version, "3.12");
        assert_eq!(first.entry.added_at, t0());

        let second = svc
            .register(NewResource::new("http://b", "u", "p"))
            .await
            .unwrap();
        assert_eq!(second.available_count, 2);
    }

    #[tokio::test]
    async fn register_duplicate_of_leased_url_conflicts() {
        let (_clock, svc) = service();
        svc.register(NewResource::new("http://a", "u", "p"))
            .await
            .unwrap();
        svc.claim().await.unwrap().claimed().unwrap();

        let err = svc
            .register(NewResource::new("http://a", "u2", "p2"))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::DuplicateResource(_)));

        let status = svc.status().await.unwrap();
        assert_eq!(status.total_count, 1);
    }

    #[tokio::test]
    async fn claim_reports_expiry_and_remaining() {
        let (_clock, svc) = service();
        for url in ["http://a", "http://b"] {
            svc.register(NewResource::new(url, "u", "p")).await.unwrap();
        }

        let claimed = svc.claim().await.unwrap().claimed().unwrap();
        assert_eq!(claimed.lease.url(), "http://a");
        assert_eq!(claimed.lease.record.password, "p");
        assert_eq!(claimed.expires_at, t0() + TimeDelta::hours(4));
        assert_eq!(claimed.remaining, 1);
    }

    #[tokio::test]
    async fn claim_empty_pool_is_exhausted_not_error() {
        let (_clock, svc) = service();
        let outcome = svc.claim().await.unwrap();
        assert!(outcome.is_exhausted());

        let status = svc.status().await.unwrap();
        assert_eq!(status.total_count, 0);
    }

    #[tokio::test]
    async fn claim_release_round_trip() {
        let (clock, svc) = service();
        svc.register(NewResource::new("http://a", "u", "p"))
            .await
            .unwrap();
        let before = svc.status().await.unwrap().available_count;

        let claimed = svc.claim().await.unwrap().claimed().unwrap();
        clock.advance(TimeDelta::minutes(30));
        let released = svc
            .release(claimed.lease.lease_id.as_str())
            .await
            .unwrap();

        assert_eq!(
            released,
            Released {
                url: "http://a".to_string(),
                version: "3.11".to_string(),
                available_count: before,
            }
        );

        let again = svc.claim().await.unwrap().claimed().unwrap();
        assert_eq!(again.lease.record, claimed.lease.record);
        assert_ne!(again.lease.lease_id, claimed.lease.lease_id);
    }

    #[tokio::test]
    async fn release_requires_lease_id() {
        let (_clock, svc) = service();
        let err = svc.release("  ").await.unwrap_err();
        assert!(matches!(err, PoolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn release_after_expiry_is_not_found() {
        let (clock, svc) = service();
        svc.register(NewResource::new("http://a", "u", "p"))
            .await
            .unwrap();
        let claimed = svc.claim().await.unwrap().claimed().unwrap();

        clock.advance(TimeDelta::hours(4) + TimeDelta::minutes(1));
        // Status triggers the reclaim pass.
        let status = svc.status().await.unwrap();
        assert_eq!(status.available_count, 1);
        assert_eq!(status.in_use_count, 0);

        let err = svc
            .release(claimed.lease.lease_id.as_str())
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::LeaseNotFound));
    }

    #[tokio::test]
    async fn claim_reclaims_expired_lease_first() {
        let (clock, svc) = service();
        svc.register(NewResource::new("http://a", "u", "p"))
            .await
            .unwrap();
        let first = svc.claim().await.unwrap().claimed().unwrap();
        assert!(svc.claim().await.unwrap().is_exhausted());

        clock.advance(TimeDelta::hours(5));
        let second = svc.claim().await.unwrap().claimed().unwrap();
        assert_eq!(second.lease.url(), first.lease.url());
        assert_eq!(second.lease.claimed_at, t0() + TimeDelta::hours(5));
    }

    #[tokio::test]
    async fn status_lists_both_collections() {
        let (_clock, svc) = service();
        for url in ["http://a", "http://b", "http://c"] {
            svc.register(NewResource::new(url, "u", "p")).await.unwrap();
        }
        svc.claim().await.unwrap();

        let status = svc.status().await.unwrap();
        assert_eq!(
            status,
            PoolStatus {
                available_count: 2,
                in_use_count: 1,
                total_count: 3,
                available_urls: vec!["http://b".to_string(), "http://c".to_string()],
                in_use_urls: vec!["http://a".to_string()],
                timestamp: t0(),
            }
        );
    }

    #[tokio::test]
    async fn storage_failure_surfaces_as_typed_error() {
        let store = Arc::new(FlakyStore::new(MemoryStore::new()));
        let (_clock, svc) = service_with_store(store.clone());
        svc.register(NewResource::new("http://a", "u", "p"))
            .await
            .unwrap();

        store.set_failing(true, true);
        let err = svc.claim().await.unwrap_err();
        assert!(matches!(err, PoolError::StorageFailure(_)));

        store.set_failing(false, false);
        let status = svc.status().await.unwrap();
        assert_eq!(status.available_count, 1);
        assert_eq!(status.in_use_count, 0);
    }

    #[tokio::test]
    async fn shutdown_signal_works() {
        let (_clock, svc) = service();
        let mut rx = svc.shutdown_rx();

        assert!(!*rx.borrow());

        svc.trigger_shutdown();
        rx.changed().await.unwrap();

        assert!(*rx.borrow());
    }
    #[tokio::test]
    async fn register_many_reports_per_item() {
        let (_clock, svc) = service();
        svc.register(NewResource::new("http://a", "u", "p"))
            .await
            .unwrap();

        let batch = svc
            .register_many(vec![
                NewResource::new("http://b", "u", "p"),
                NewResource::new("http://a", "u", "p"),
                NewResource::new("http://c", "", "p"),
                NewResource::new(" http://d ", "u", "p").with_version("3.12"),
            ])
            .await
            .unwrap();

        assert_eq!(batch.added, 2);
        assert_eq!(batch.available_count, 3);
        let urls: Vec<&str> = batch.items.iter().map(|i| i.url.as_str()).collect();
        assert_eq!(urls, vec!["http://b", "http://a", "http://c", "http://d"]);
        assert!(batch.items[0].result.is_ok());
        assert!(matches!(
            batch.items[1].result,
            Err(PoolError::DuplicateResource(_))
        ));
        assert!(matches!(batch.items[2].result, Err(PoolError::InvalidInput(_))));
        let d = batch.items[3].result.as_ref().unwrap();
        assert_eq!(d.record.version, "3.12");
        assert_eq!(d.added_at, t0());
    }

    #[tokio::test]
    async fn register_many_storage_failure_fails_batch() {
        let store = Arc::new(FlakyStore::new(MemoryStore::new()));
        let (_clock, svc) = service_with_store(store.clone());
        store.set_failing(true, false);

        let err = svc
            .register_many(vec![NewResource::new("http://a", "u", "p")])
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::StorageFailure(_)));

        store.set_failing(false, false);
        assert_eq!(svc.status().await.unwrap().total_count, 0);
    }
}
