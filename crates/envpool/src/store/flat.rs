//! Flat-file record store: one record per line, fields joined by `" | "`.
//!
//! Layout:
//! - `available.txt`: `url | username | password | version | resources | added_at`
//! - `in_use.txt`:    `url | username | password | version | lease_id | claimed_at | resources`
//!
//! Timestamps are written RFC 3339; the legacy `%Y-%m-%d %H:%M:%S` form is
//! still read, as local time of the host, so existing pool files load
//! unchanged. A record with no usable timestamp is stamped with the load
//! time and reported in `Loaded::restamped`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use tokio::io::AsyncWriteExt;

use super::{Loaded, RecordStore, StoreError};
use crate::record::{
    AvailableEntry, DEFAULT_RESOURCES, LeaseEntry, LeaseId, RESERVED_CHAR, ResourceRecord,
};

pub const FIELD_DELIMITER: &str = " | ";

const AVAILABLE_FILE: &str = "available.txt";
const IN_USE_FILE: &str = "in_use.txt";

const AVAILABLE_MIN_FIELDS: usize = 4;
const IN_USE_MIN_FIELDS: usize = 5;

const LEGACY_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

pub struct FlatFileStore {
    dir: PathBuf,
    available_path: PathBuf,
    in_use_path: PathBuf,
}

impl FlatFileStore {
    /// Open (creating if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::io(&dir, e))?;

        tracing::debug!(dir = %dir.display(), "Opened flat-file record store");

        Ok(Self {
            available_path: dir.join(AVAILABLE_FILE),
            in_use_path: dir.join(IN_USE_FILE),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn available_path(&self) -> &Path {
        &self.available_path
    }

    pub fn in_use_path(&self) -> &Path {
        &self.in_use_path
    }
}

#[async_trait]
impl RecordStore for FlatFileStore {
    async fn load_available(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Loaded<AvailableEntry>, StoreError> {
        let lines = read_lines(&self.available_path).await?;
        Ok(decode_lines(&lines, &self.available_path, now, decode_available))
    }

    async fn load_in_use(&self, now: DateTime<Utc>) -> Result<Loaded<LeaseEntry>, StoreError> {
        let lines = read_lines(&self.in_use_path).await?;
        Ok(decode_lines(&lines, &self.in_use_path, now, decode_in_use))
    }

    async fn save_available(&self, entries: &[AvailableEntry]) -> Result<(), StoreError> {
        let lines = entries
            .iter()
            .map(encode_available)
            .collect::<Result<Vec<_>, _>>()?;
        write_atomic(&self.available_path, &lines).await
    }

    async fn save_in_use(&self, entries: &[LeaseEntry]) -> Result<(), StoreError> {
        let lines = entries
            .iter()
            .map(encode_in_use)
            .collect::<Result<Vec<_>, _>>()?;
        write_atomic(&self.in_use_path, &lines).await
    }
}

fn decode_lines<T>(
    lines: &[String],
    path: &Path,
    now: DateTime<Utc>,
    decode: fn(&str, DateTime<Utc>) -> Option<Decoded<T>>,
) -> Loaded<T> {
    let mut loaded = Loaded::clean(Vec::with_capacity(lines.len()));
    for (n, line) in lines.iter().enumerate() {
        match decode(line, now) {
            Some(decoded) => {
                if decoded.restamped {
                    loaded.restamped += 1;
                }
                loaded.entries.push(decoded.entry);
            }
            None => {
                tracing::warn!(file = %path.display(), line = n + 1, "Skipping malformed record");
            }
        }
    }
    loaded
}

/// Non-blank lines of `path`; a missing file reads as empty.
async fn read_lines(path: &Path) -> Result<Vec<String>, StoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    Ok(String::from_utf8_lossy(&bytes)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

async fn write_atomic(path: &Path, lines: &[String]) -> Result<(), StoreError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|s| s.to_str()).unwrap_or("records"),
        std::process::id()
    ));

    let mut contents = lines.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }

    {
        let mut f = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        f.write_all(contents.as_bytes())
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        f.sync_all().await.map_err(|e| StoreError::io(&tmp, e))?;
    }

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(StoreError::io(path, e));
    }

    if let Ok(dir) = tokio::fs::File::open(parent).await {
        let _ = dir.sync_all().await;
    }
    Ok(())
}

fn encode_available(entry: &AvailableEntry) -> Result<String, StoreError> {
    let r = &entry.record;
    join_fields(&[
        &r.url,
        &r.username,
        &r.password,
        &r.version,
        &r.resources,
        &entry.added_at.to_rfc3339(),
    ])
}

fn encode_in_use(entry: &LeaseEntry) -> Result<String, StoreError> {
    let r = &entry.record;
    join_fields(&[
        &r.url,
        &r.username,
        &r.password,
        &r.version,
        entry.lease_id.as_str(),
        &entry.claimed_at.to_rfc3339(),
        &r.resources,
    ])
}

fn join_fields(fields: &[&str]) -> Result<String, StoreError> {
    if let Some(bad) = fields
        .iter()
        .find(|f| f.contains(RESERVED_CHAR) || f.contains(['\n', '\r']))
    {
        return Err(StoreError::Encode(format!(
            "field contains a reserved character: {bad:?}"
        )));
    }
    Ok(fields.join(FIELD_DELIMITER))
}

struct Decoded<T> {
    entry: T,
    /// Timestamp was missing or unreadable and `now` was substituted.
    restamped: bool,
}

fn decode_available(line: &str, now: DateTime<Utc>) -> Option<Decoded<AvailableEntry>> {
    let parts: Vec<&str> = line.split(FIELD_DELIMITER).map(str::trim).collect();
    if parts.len() < AVAILABLE_MIN_FIELDS || parts[0].is_empty() {
        return None;
    }

    let record = ResourceRecord {
        url: parts[0].to_string(),
        username: parts[1].to_string(),
        password: parts[2].to_string(),
        version: parts[3].to_string(),
        resources: field_or(parts.get(4), DEFAULT_RESOURCES),
    };
    let (added_at, restamped) = timestamp_or(parts.get(5).copied(), now, &record.url);
    Some(Decoded {
        entry: AvailableEntry::new(record, added_at),
        restamped,
    })
}

fn decode_in_use(line: &str, now: DateTime<Utc>) -> Option<Decoded<LeaseEntry>> {
    let parts: Vec<&str> = line.split(FIELD_DELIMITER).map(str::trim).collect();
    if parts.len() < IN_USE_MIN_FIELDS || parts[0].is_empty() {
        return None;
    }

    let lease_id = LeaseId::parse(parts[4])?;
    let record = ResourceRecord {
        url: parts[0].to_string(),
        username: parts[1].to_string(),
        password: parts[2].to_string(),
        version: parts[3].to_string(),
        resources: field_or(parts.get(6), DEFAULT_RESOURCES),
    };
    let (claimed_at, restamped) = timestamp_or(parts.get(5).copied(), now, &record.url);
    Some(Decoded {
        entry: LeaseEntry {
            record,
            lease_id,
            claimed_at,
        },
        restamped,
    })
}

fn field_or(part: Option<&&str>, default: &str) -> String {
    part.filter(|p| !p.is_empty())
        .map(|p| p.to_string())
        .unwrap_or_else(|| default.to_string())
}

/// Parsed timestamp, or `now` flagged as substituted.
fn timestamp_or(raw: Option<&str>, now: DateTime<Utc>, url: &str) -> (DateTime<Utc>, bool) {
    let Some(raw) = raw.filter(|r| !r.is_empty()) else {
        tracing::warn!(%url, "Missing timestamp, stamping with load time");
        return (now, true);
    };
    match parse_timestamp(raw) {
        Some(ts) => (ts, false),
        None => {
            tracing::warn!(%url, timestamp = raw, "Unparsable timestamp, stamping with load time");
            (now, true)
        }
    }
}

/// RFC 3339, or the legacy naive form interpreted in the host's local zone.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP)
        .ok()?
        .and_local_timezone(Local)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}
