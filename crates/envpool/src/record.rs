//! Pool records: resource descriptors and the two lifecycle wrappers.
//!
//! A resource lives in exactly one of two collections:
//! - `AvailableEntry`: waiting to be claimed (FIFO by `added_at` order)
//! - `LeaseEntry`: held by one caller under a `LeaseId` until released or expired

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Default version tag when a registration omits one.
pub const DEFAULT_VERSION: &str = "3.11";

/// Default capacity descriptor when a registration omits one.
pub const DEFAULT_RESOURCES: &str = "2vCPU 4GB RAM";

/// Character reserved by the flat-file layout; never allowed inside a field.
pub const RESERVED_CHAR: char = '|';

/// Opaque token identifying the holder of a lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(String);

impl LeaseId {
    /// Mint a fresh token.
    pub fn new() -> Self {
        Self(format!("lease_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Accept a caller-supplied token. Blank input is rejected.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            None
        } else {
            Some(Self(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A leasable environment descriptor. `url` is the identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub url: String,
    pub username: String,
    pub password: String,
    pub version: String,
    pub resources: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableEntry {
    #[serde(flatten)]
    pub record: ResourceRecord,
    pub added_at: DateTime<Utc>,
}

impl AvailableEntry {
    pub fn new(record: ResourceRecord, added_at: DateTime<Utc>) -> Self {
        Self { record, added_at }
    }

    pub fn url(&self) -> &str {
        &self.record.url
    }

    /// Turn this entry into a lease held by `lease_id`.
    pub fn into_lease(self, lease_id: LeaseId, claimed_at: DateTime<Utc>) -> LeaseEntry {
        LeaseEntry {
            record: self.record,
            lease_id,
            claimed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseEntry {
    #[serde(flatten)]
    pub record: ResourceRecord,
    pub lease_id: LeaseId,
    pub claimed_at: DateTime<Utc>,
}

impl LeaseEntry {
    pub fn url(&self) -> &str {
        &self.record.url
    }

    pub fn expires_at(&self, ttl: TimeDelta) -> DateTime<Utc> {
        self.claimed_at + ttl
    }

    /// Strictly older than `ttl` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.claimed_at > ttl
    }

    /// Return the resource to the available pool, stamped `added_at`.
    pub fn into_available(self, added_at: DateTime<Utc>) -> AvailableEntry {
        AvailableEntry {
            record: self.record,
            added_at,
        }
    }
}

/// Registration input as received from a caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewResource {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "python_version")]
    pub version: Option<String>,
    #[serde(default)]
    pub resources: Option<String>,
}

impl NewResource {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: username.into(),
            password: password.into(),
            version: None,
            resources: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_resources(mut self, resources: impl Into<String>) -> Self {
        self.resources = Some(resources.into());
        self
    }

    /// Trim, apply defaults and check every field.
    pub fn validate(self) -> Result<ResourceRecord, String> {
        let url = self.url.trim().to_string();
        let username = self.username.trim().to_string();
        let password = self.password.trim().to_string();

        if url.is_empty() || username.is_empty() || password.is_empty() {
            return Err("Missing url, username, or password".to_string());
        }

        let version = non_blank_or(self.version, DEFAULT_VERSION);
        let resources = non_blank_or(self.resources, DEFAULT_RESOURCES);

        for (name, value) in [
            ("url", &url),
            ("username", &username),
            ("password", &password),
            ("version", &version),
            ("resources", &resources),
        ] {
            if value.contains(RESERVED_CHAR) || value.contains(['\n', '\r']) {
                return Err(format!(
                    "{name} must not contain '{RESERVED_CHAR}' or line breaks"
                ));
            }
        }

        Ok(ResourceRecord {
            url,
            username,
            password,
            version,
            resources,
        })
    }
}

fn non_blank_or(value: Option<String>, default: &str) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
