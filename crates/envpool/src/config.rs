//! Environment-driven configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::reclaimer::{DEFAULT_RECLAIM_INTERVAL, DEFAULT_RECLAIM_RETRY};
use crate::registry::DEFAULT_LEASE_TTL;
use crate::transport::ServerConfig;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_EVENT_LOG_FILE: &str = "pool_log.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub data_dir: PathBuf,
    pub lease_ttl: Duration,
    pub reclaim_interval: Duration,
    pub reclaim_retry: Duration,
    /// `None` disables the event log.
    pub event_log: Option<PathBuf>,
    pub host: String,
    pub port: u16,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            lease_ttl: DEFAULT_LEASE_TTL,
            reclaim_interval: DEFAULT_RECLAIM_INTERVAL,
            reclaim_retry: DEFAULT_RECLAIM_RETRY,
            event_log: Some(PathBuf::from(DEFAULT_DATA_DIR).join(DEFAULT_EVENT_LOG_FILE)),
            host: server.host,
            port: server.port,
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. Unset or blank variables take
    /// their default; unparsable numbers fall back with a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let data_dir = var("ENVPOOL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        let event_log = match var("ENVPOOL_EVENT_LOG").as_deref() {
            Some("off") => None,
            Some(path) => Some(PathBuf::from(path)),
            None => Some(data_dir.join(DEFAULT_EVENT_LOG_FILE)),
        };

        Self {
            lease_ttl: secs(var("ENVPOOL_LEASE_TTL_SECS"), "ENVPOOL_LEASE_TTL_SECS", defaults.lease_ttl),
            reclaim_interval: secs(
                var("ENVPOOL_RECLAIM_INTERVAL_SECS"),
                "ENVPOOL_RECLAIM_INTERVAL_SECS",
                defaults.reclaim_interval,
            ),
            reclaim_retry: secs(
                var("ENVPOOL_RECLAIM_RETRY_SECS"),
                "ENVPOOL_RECLAIM_RETRY_SECS",
                defaults.reclaim_retry,
            ),
            host: var("ENVPOOL_HOST").unwrap_or(defaults.host),
            port: parsed(var("ENVPOOL_PORT"), "ENVPOOL_PORT", defaults.port),
            data_dir,
            event_log,
        }
    }

    pub fn server(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
        }
    }
}

fn parsed<T: std::str::FromStr + std::fmt::Debug>(raw: Option<String>, key: &str, default: T) -> T {
    let Some(raw) = raw else {
        return default;
    };
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!(key, value = %raw, ?default, "Ignoring invalid config value");
            default
        }
    }
}

/// Whole seconds; zero is rejected along with garbage.
fn secs(raw: Option<String>, key: &str, default: Duration) -> Duration {
    match parsed::<u64>(raw, key, default.as_secs()) {
        0 => {
            tracing::warn!(key, ?default, "Zero duration not allowed, using default");
            default
        }
        n => Duration::from_secs(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> PoolConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PoolConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]);
        assert_eq!(cfg, PoolConfig::default());
        assert_eq!(cfg.lease_ttl, Duration::from_secs(14_400));
        assert_eq!(cfg.reclaim_interval, Duration::from_secs(300));
        assert_eq!(cfg.reclaim_retry, Duration::from_secs(60));
        assert_eq!(cfg.event_log, Some(PathBuf::from("data/pool_log.txt")));
        assert_eq!(cfg.server().port, 5000);
    }

    #[test]
    fn reads_overrides() {
        let cfg = config(&[
            ("ENVPOOL_DATA_DIR", "/var/lib/envpool"),
            ("ENVPOOL_LEASE_TTL_SECS", "600"),
            ("ENVPOOL_RECLAIM_INTERVAL_SECS", "30"),
            ("ENVPOOL_RECLAIM_RETRY_SECS", "5"),
            ("ENVPOOL_HOST", "127.0.0.1"),
            ("ENVPOOL_PORT", "8080"),
        ]);
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/envpool"));
        assert_eq!(cfg.lease_ttl, Duration::from_secs(600));
        assert_eq!(cfg.reclaim_interval, Duration::from_secs(30));
        assert_eq!(cfg.reclaim_retry, Duration::from_secs(5));
        assert_eq!(
            cfg.event_log,
            Some(PathBuf::from("/var/lib/envpool/pool_log.txt"))
        );
        assert_eq!(cfg.server().host, "127.0.0.1");
        assert_eq!(cfg.server().port, 8080);
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let cfg = config(&[
            ("ENVPOOL_LEASE_TTL_SECS", "four hours"),
            ("ENVPOOL_RECLAIM_INTERVAL_SECS", "0"),
            ("ENVPOOL_PORT", "99999"),
        ]);
        assert_eq!(cfg.lease_ttl, DEFAULT_LEASE_TTL);
        assert_eq!(cfg.reclaim_interval, DEFAULT_RECLAIM_INTERVAL);
        assert_eq!(cfg.port, 5000);
    }

    #[test]
    fn event_log_can_be_disabled_or_moved() {
        assert_eq!(config(&[("ENVPOOL_EVENT_LOG", "off")]).event_log, None);
        assert_eq!(
            config(&[("ENVPOOL_EVENT_LOG", "/tmp/events.log")]).event_log,
            Some(PathBuf::from("/tmp/events.log"))
        );
    }
}
