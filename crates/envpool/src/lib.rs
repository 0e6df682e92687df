//! envpool: leasing pool for shared remote environments.
//!
//! Resources are registered into a FIFO available queue, leased to one
//! client at a time, and returned either explicitly or after the lease TTL.
//! Both collections persist through a `RecordStore`.

pub mod clock;
pub mod config;
mod error;
pub mod reclaimer;
pub mod record;
pub mod registry;
pub mod service;
pub mod store;
pub mod transport;
mod version;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PoolConfig;
pub use error::{PoolError, Result};
pub use reclaimer::{ExpiryReclaimer, ReclaimerHandle};
pub use record::{AvailableEntry, LeaseEntry, LeaseId, NewResource, ResourceRecord};
pub use registry::{DEFAULT_LEASE_TTL, LeaseRegistry, PoolState, PoolTxn};
pub use service::{
    BatchItem, BatchRegistered, ClaimOutcome, ClaimedLease, PoolService, PoolStatus, Registered,
    Released,
};
pub use store::{
    EventKind, EventLog, FlatFileStore, Loaded, MemoryStore, RecordStore, StoreError,
};
pub use version::{ENVPOOL_VERSION, VersionInfo};
