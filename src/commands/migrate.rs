use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::commands::CommandReport;
use crate::harvest::config::load_config;
use crate::harvest::ledger::{Ledger, LedgerIndex, LedgerRecord};
use crate::harvest::paths::resolve_paths;
use crate::harvest::util::now_rfc3339;

#[derive(Debug, Clone)]
pub struct MigrateOptions {
    pub from: PathBuf,
}

/// Upgrade a legacy JSON download manifest into the CSV ledger. Two shapes
/// existed across script versions: a flat `{key: entry}` map, and an
/// envelope `{"files": {...}, "_url_meta": {url: "etag|last-modified"}}`.
/// This is the one explicit migration path; the ledger itself never sniffs
/// formats at runtime.
pub fn run(opts: &MigrateOptions) -> Result<CommandReport> {
    let cfg = load_config()?;
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("migrate");
    report.detail(format!("from={}", opts.from.display()));
    report.detail(format!("ledger={}", paths.ledger_file.display()));

    let raw = fs::read_to_string(&opts.from)
        .with_context(|| format!("failed to read {}", opts.from.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", opts.from.display()))?;

    let migrated = legacy_records(&value, &paths.data_dir);
    if migrated.is_empty() {
        report.issue("legacy manifest contained no usable entries");
        return Ok(report);
    }

    let ledger = Ledger::open(
        &paths.ledger_file,
        Duration::from_secs(cfg.limits.lock_wait_secs),
    );
    let _guard = ledger.lock()?;
    let mut records = ledger.read()?;
    let index = LedgerIndex::build(&records);

    let mut imported = 0usize;
    let mut skipped = 0usize;
    for record in migrated {
        if index.current(&record.period, &record.url).is_some() {
            skipped += 1;
            continue;
        }
        records.push(record);
        imported += 1;
    }
    ledger.write(&records)?;

    report.detail(format!("imported={imported}"));
    report.detail(format!("already_present={skipped}"));
    Ok(report)
}

fn files_map(value: &Value) -> Option<&serde_json::Map<String, Value>> {
    let obj = value.as_object()?;
    match obj.get("files") {
        Some(files) => files.as_object(),
        None => Some(obj),
    }
}

fn validators_for<'a>(value: &'a Value, url: &str) -> (Option<&'a str>, Option<&'a str>) {
    let Some(meta) = value
        .get("_url_meta")
        .and_then(Value::as_object)
        .and_then(|m| m.get(url))
        .and_then(Value::as_str)
    else {
        return (None, None);
    };
    // Legacy cache key: "<etag>|<last-modified>", either side may be empty.
    let (etag, last_modified) = meta.split_once('|').unwrap_or((meta, ""));
    (
        Some(etag).filter(|s| !s.is_empty()),
        Some(last_modified).filter(|s| !s.is_empty()),
    )
}

fn rfc3339_from_epoch(secs: i64) -> Option<String> {
    DateTime::from_timestamp(secs, 0).map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Convert the legacy manifest entries into ledger rows. Entries missing a
/// URL or period are dropped with a warning.
pub fn legacy_records(value: &Value, data_dir: &Path) -> Vec<LedgerRecord> {
    let Some(files) = files_map(value) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for (key, entry) in files {
        if key.starts_with('_') {
            continue;
        }
        let Some(url) = entry.get("url").and_then(Value::as_str) else {
            warn!("legacy entry {key} has no url, dropped");
            continue;
        };
        let period = match entry.get("year") {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => {
                warn!("legacy entry {key} has no year, dropped");
                continue;
            }
        };
        let filename = entry
            .get("filename")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| key.rsplit('/').next().unwrap_or(key).to_string());
        let last_seen_at = entry
            .get("timestamp")
            .and_then(Value::as_i64)
            .and_then(rfc3339_from_epoch)
            .unwrap_or_else(now_rfc3339);
        let (etag, last_modified) = validators_for(value, url);

        out.push(LedgerRecord {
            saved_path: data_dir.join(&period).join(&filename).display().to_string(),
            period,
            url: url.to_string(),
            filename,
            hash: entry
                .get("hash")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            etag: etag.map(ToOwned::to_owned),
            last_modified: last_modified.map(ToOwned::to_owned),
            content_length: None,
            version: 1,
            last_seen_at,
        });
    }
    out
}
