use crate::error::HarvestError;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::error;

/// Ledger schema, version 1. Column order is the on-disk header order;
/// `LedgerRecord` field order must match it.
pub const LEDGER_HEADERS: [&str; 10] = [
    "period",
    "url",
    "filename",
    "saved_path",
    "hash",
    "etag",
    "last_modified",
    "content_length",
    "version",
    "last_seen_at",
];

/// One observed (period, url, version). The current record for a
/// (period, url) pair is the row with the highest version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub period: String,
    pub url: String,
    pub filename: String,
    pub saved_path: String,
    pub hash: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_length: Option<u64>,
    pub version: u32,
    pub last_seen_at: String,
}

/// Exclusive advisory lock on the ledger, released on drop.
pub struct LedgerGuard {
    file: File,
}

impl Drop for LedgerGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Handle on the persisted ledger file. Reads are lock-free snapshots;
/// any read-then-write sequence must happen inside `lock()`.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    lock_wait: Duration,
}

impl Ledger {
    pub fn open(path: impl Into<PathBuf>, lock_wait: Duration) -> Self {
        Self {
            path: path.into(),
            lock_wait,
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_os_string();
        os.push(".lock");
        PathBuf::from(os)
    }

    /// Acquire the cross-process lock, polling with a bounded wait.
    pub fn lock(&self) -> Result<LedgerGuard> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;

        let started = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(LedgerGuard { file }),
                Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    if started.elapsed() >= self.lock_wait {
                        return Err(HarvestError::LockTimeout(self.lock_wait).into());
                    }
                    thread::sleep(Duration::from_millis(100));
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("failed to lock ledger at {}", lock_path.display())
                    });
                }
            }
        }
    }

    /// Read all rows in file order. A missing file is an empty ledger. A
    /// file that cannot be parsed is ALSO treated as empty — that silently
    /// discards history, so it is logged at error level rather than hidden.
    pub fn read(&self) -> Result<Vec<LedgerRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;

        match parse_rows(&raw) {
            Ok(rows) => Ok(rows),
            Err(err) => {
                error!(
                    ledger = %self.path.display(),
                    "malformed ledger, treating as empty (history discarded): {err:#}"
                );
                Ok(Vec::new())
            }
        }
    }

    /// Replace the ledger atomically: serialize to a temp file in the same
    /// directory, then rename over the original. A crash mid-write leaves
    /// either the old file or the new one, never a torn mix.
    pub fn write(&self, records: &[LedgerRecord]) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;

        let mut tmp = NamedTempFile::new_in(&parent)
            .with_context(|| format!("failed to create temp ledger in {}", parent.display()))?;
        {
            // Header written explicitly so an all-rows-removed ledger still
            // round-trips instead of degrading to an empty file.
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file_mut());
            writer
                .write_record(LEDGER_HEADERS)
                .context("failed to write ledger header")?;
            for record in records {
                writer
                    .serialize(record)
                    .context("failed to serialize ledger record")?;
            }
            writer.flush().context("failed to flush ledger")?;
        }
        tmp.as_file().sync_all().context("failed to sync ledger")?;
        tmp.persist(&self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

fn parse_rows(raw: &str) -> Result<Vec<LedgerRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(false)
        .from_reader(raw.as_bytes());

    let headers = reader.headers().context("failed to read ledger header")?;
    let header_names: Vec<String> = headers.iter().map(ToOwned::to_owned).collect();

    if header_names == LEDGER_HEADERS {
        let mut out = Vec::new();
        for row in reader.deserialize() {
            let record: LedgerRecord = row.context("failed to parse ledger row")?;
            out.push(record);
        }
        return Ok(out);
    }

    upgrade_legacy_rows(&header_names, reader)
}

/// Best-effort upgrade of an older header layout: columns are matched by
/// name, anything missing gets a default. A table without at least
/// `period` and `url` columns is not a ledger at all.
fn upgrade_legacy_rows(
    headers: &[String],
    mut reader: csv::Reader<&[u8]>,
) -> Result<Vec<LedgerRecord>> {
    let index_of = |name: &str| headers.iter().position(|h| h == name);
    let (Some(period_idx), Some(url_idx)) = (index_of("period"), index_of("url")) else {
        anyhow::bail!("unrecognized ledger header: {}", headers.join(","));
    };

    let get = |row: &csv::StringRecord, name: &str| -> Option<String> {
        index_of(name)
            .and_then(|i| row.get(i))
            .filter(|v| !v.is_empty())
            .map(ToOwned::to_owned)
    };

    let mut out = Vec::new();
    for row in reader.records() {
        let row = row.context("failed to parse legacy ledger row")?;
        let period = row
            .get(period_idx)
            .map(ToOwned::to_owned)
            .unwrap_or_default();
        let url = row.get(url_idx).map(ToOwned::to_owned).unwrap_or_default();
        if period.is_empty() || url.is_empty() {
            continue;
        }
        out.push(LedgerRecord {
            period,
            url,
            filename: get(&row, "filename").unwrap_or_default(),
            saved_path: get(&row, "saved_path").unwrap_or_default(),
            hash: get(&row, "hash").unwrap_or_default(),
            etag: get(&row, "etag"),
            last_modified: get(&row, "last_modified"),
            content_length: get(&row, "content_length").and_then(|v| v.parse().ok()),
            version: get(&row, "version")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            last_seen_at: get(&row, "last_seen_at").unwrap_or_default(),
        });
    }
    Ok(out)
}

/// In-memory view answering "what is the current record for (period, url)".
#[derive(Debug, Default)]
pub struct LedgerIndex {
    current: BTreeMap<(String, String), LedgerRecord>,
}

impl LedgerIndex {
    pub fn build(records: &[LedgerRecord]) -> Self {
        let mut current: BTreeMap<(String, String), LedgerRecord> = BTreeMap::new();
        for record in records {
            let key = (record.period.clone(), record.url.clone());
            match current.get(&key) {
                Some(existing) if existing.version > record.version => {}
                _ => {
                    current.insert(key, record.clone());
                }
            }
        }
        Self { current }
    }

    pub fn current(&self, period: &str, url: &str) -> Option<&LedgerRecord> {
        self.current
            .get(&(period.to_string(), url.to_string()))
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

/// Replace the row matching (period, url, version) in place, or append.
pub fn upsert(records: &mut Vec<LedgerRecord>, updated: LedgerRecord) {
    if let Some(slot) = records.iter_mut().find(|r| {
        r.period == updated.period && r.url == updated.url && r.version == updated.version
    }) {
        *slot = updated;
    } else {
        records.push(updated);
    }
}
