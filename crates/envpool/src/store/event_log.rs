//! Append-only diagnostic log of pool transitions.
//!
//! Write-only: nothing reads this file back to rebuild state. A failed
//! append is logged and otherwise ignored.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Claimed,
    Released,
    Expired,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "ENV ADDED",
            Self::Claimed => "ENV CLAIMED",
            Self::Released => "ENV RELEASED",
            Self::Expired => "ENV EXPIRED",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    path: Option<PathBuf>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn record(&self, at: DateTime<Utc>, kind: EventKind, detail: &str) {
        let Some(path) = self.path.as_ref() else {
            return;
        };

        let line = format_line(at, kind, detail);
        if let Err(e) = append(path, &line).await {
            tracing::warn!(file = %path.display(), error = %e, "Failed to append pool event");
        }
    }
}

fn format_line(at: DateTime<Utc>, kind: EventKind, detail: &str) -> String {
    format!(
        "[{}] {}: {}\n",
        at.format("%Y-%m-%d %H:%M:%S"),
        kind.as_str(),
        detail
    )
}

async fn append(path: &Path, line: &str) -> std::io::Result<()> {
    let mut f = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    f.write_all(line.as_bytes()).await?;
    f.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn line_format() {
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        assert_eq!(
            format_line(at, EventKind::Claimed, "http://a by lease_1"),
            "[2024-05-06 07:08:09] ENV CLAIMED: http://a by lease_1\n"
        );
    }

    #[tokio::test]
    async fn appends_lines_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("pool_log.txt"));
        let at = Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();

        log.record(at, EventKind::Added, "http://a").await;
        log.record(at, EventKind::Expired, "http://a").await;

        let contents = std::fs::read_to_string(dir.path().join("pool_log.txt")).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("ENV ADDED: http://a"));
        assert!(lines[1].ends_with("ENV EXPIRED: http://a"));
    }

    #[tokio::test]
    async fn unwritable_path_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("missing").join("pool_log.txt"));
        log.record(Utc::now(), EventKind::Added, "http://a").await;
    }

    #[tokio::test]
    async fn disabled_log_writes_nothing() {
        let log = EventLog::disabled();
        assert!(log.path().is_none());
        log.record(Utc::now(), EventKind::Added, "http://a").await;
    }
}
