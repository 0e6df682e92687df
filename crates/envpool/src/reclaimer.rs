//! Background reclaim of leases held past their TTL.
//!
//! Expiry also runs opportunistically inside every facade call; this task
//! covers idle periods. It goes through the same registry boundary as
//! client operations.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::registry::LeaseRegistry;

pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RECLAIM_RETRY: Duration = Duration::from_secs(60);

pub struct ExpiryReclaimer {
    registry: Arc<LeaseRegistry>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    retry: Duration,
}

impl ExpiryReclaimer {
    pub fn new(registry: Arc<LeaseRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            registry,
            clock,
            interval: DEFAULT_RECLAIM_INTERVAL,
            retry: DEFAULT_RECLAIM_RETRY,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    /// Run one reclaim pass and return the delay before the next one.
    pub async fn tick(&self) -> Duration {
        let now = self.clock.now();
        match self.registry.expire(now).await {
            Ok(reclaimed) => {
                if !reclaimed.is_empty() {
                    tracing::info!(count = reclaimed.len(), "Reclaimed expired leases");
                }
                self.interval
            }
            Err(e) => {
                tracing::error!(error = %e, retry_in = ?self.retry, "Reclaim pass failed");
                self.retry
            }
        }
    }

    /// Start the loop on the current runtime.
    ///
    /// The first pass runs immediately so leases that expired while the
    /// process was down are returned at startup.
    pub fn spawn(self) -> ReclaimerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            tracing::debug!(interval = ?self.interval, "Reclaimer started");
            loop {
                let delay = tokio::select! {
                    _ = token.cancelled() => break,
                    delay = self.tick() => delay,
                };
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            tracing::debug!("Reclaimer stopped");
        });

        ReclaimerHandle { cancel, task }
    }
}

pub struct ReclaimerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ReclaimerHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Reclaimer task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::record::ResourceRecord;
    use crate::registry::DEFAULT_LEASE_TTL;
    use crate::store::{FlakyStore, MemoryStore, RecordStore};
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn record(url: &str) -> ResourceRecord {
        ResourceRecord {
            url: url.to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            version: "3.11".to_string(),
            resources: "2vCPU 4GB RAM".to_string(),
        }
    }

    async fn leased_registry(
        store: Arc<dyn RecordStore>,
    ) -> (Arc<LeaseRegistry>, Arc<ManualClock>) {
        let registry = Arc::new(LeaseRegistry::new(store, DEFAULT_LEASE_TTL));
        {
            let mut txn = registry.begin().await.unwrap();
            txn.register(record("http://a"), t0()).await.unwrap();
            txn.claim(t0()).await.unwrap().unwrap();
        }
        (registry, Arc::new(ManualClock::new(t0())))
    }

    #[tokio::test]
    async fn tick_reclaims_only_past_ttl() {
        let (registry, clock) = leased_registry(Arc::new(MemoryStore::new())).await;
        let reclaimer = ExpiryReclaimer::new(registry.clone(), clock.clone())
            .with_interval(Duration::from_secs(10))
            .with_retry(Duration::from_secs(1));

        clock.advance(TimeDelta::hours(3) + TimeDelta::minutes(59));
        assert_eq!(reclaimer.tick().await, Duration::from_secs(10));
        assert_eq!(registry.begin().await.unwrap().in_use().len(), 1);

        clock.advance(TimeDelta::minutes(2));
        assert_eq!(reclaimer.tick().await, Duration::from_secs(10));
        let txn = registry.begin().await.unwrap();
        assert!(txn.in_use().is_empty());
        assert_eq!(txn.available().len(), 1);
    }

    #[tokio::test]
    async fn failed_tick_uses_retry_interval() {
        let store = Arc::new(FlakyStore::new(MemoryStore::new()));
        let (registry, clock) = leased_registry(store.clone()).await;
        let reclaimer = ExpiryReclaimer::new(registry.clone(), clock.clone())
            .with_interval(Duration::from_secs(300))
            .with_retry(Duration::from_secs(60));

        clock.advance(TimeDelta::hours(5));
        store.set_failing(true, false);
        assert_eq!(reclaimer.tick().await, Duration::from_secs(60));
        assert_eq!(registry.begin().await.unwrap().in_use().len(), 1);

        store.set_failing(false, false);
        assert_eq!(reclaimer.tick().await, Duration::from_secs(300));
        assert!(registry.begin().await.unwrap().in_use().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_loop_reclaims_and_stops() {
        let (registry, clock) = leased_registry(Arc::new(MemoryStore::new())).await;
        let handle = ExpiryReclaimer::new(registry.clone(), clock.clone())
            .with_interval(Duration::from_secs(300))
            .spawn();

        clock.advance(TimeDelta::hours(5));
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert!(registry.begin().await.unwrap().in_use().is_empty());

        assert!(!handle.is_finished());
        handle.shutdown().await;
    }
}
