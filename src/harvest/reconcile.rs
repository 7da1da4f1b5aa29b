use crate::harvest::ledger::Ledger;
use crate::harvest::util::now_rfc3339;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub kept: usize,
    pub removed: usize,
    pub redirected: usize,
}

/// Prune ledger rows whose backing artifact vanished from disk, so a
/// manually deleted file does not block re-download forever.
///
/// Rows pointing at a missing `.zip` get one reprieve: when a same-stem
/// directory exists next to where the archive was, the row is rewritten to
/// point at that directory (the archive was expanded and removed) instead
/// of being dropped. Applies to every row, historical versions included;
/// surviving history is never renumbered.
pub fn reconcile(ledger: &Ledger) -> Result<ReconcileOutcome> {
    let _guard = ledger.lock()?;
    let records = ledger.read()?;

    let mut outcome = ReconcileOutcome::default();
    let mut kept = Vec::with_capacity(records.len());

    for mut record in records {
        let saved = PathBuf::from(&record.saved_path);
        if record.saved_path.is_empty() {
            outcome.removed += 1;
            info!(
                "removing ledger row with no saved path: {} | {}",
                record.period, record.url
            );
            continue;
        }
        if saved.exists() {
            record.last_seen_at = now_rfc3339();
            outcome.kept += 1;
            kept.push(record);
            continue;
        }
        if let Some(dir) = expanded_dir_for(&saved) {
            info!(
                "redirecting ledger row to expanded archive dir: {} | {}",
                record.period,
                dir.display()
            );
            record.filename = dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(&record.filename)
                .to_string();
            record.saved_path = dir.display().to_string();
            record.last_seen_at = now_rfc3339();
            outcome.redirected += 1;
            kept.push(record);
            continue;
        }
        outcome.removed += 1;
        info!(
            "removing stale ledger row: {} | {} | {}",
            record.period, record.url, record.saved_path
        );
    }

    if outcome.removed > 0 || outcome.redirected > 0 {
        ledger.write(&kept)?;
    }
    Ok(outcome)
}

/// For a missing `foo.zip`, the directory `foo` in the same parent — when
/// it exists and is a directory.
fn expanded_dir_for(missing: &Path) -> Option<PathBuf> {
    let ext = missing.extension()?.to_str()?;
    if !ext.eq_ignore_ascii_case("zip") {
        return None;
    }
    let dir = missing.with_extension("");
    if dir.is_dir() { Some(dir) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::ledger::LedgerRecord;
    use std::fs;
    use std::time::Duration;
    use tempfile::tempdir;

    fn record(period: &str, url: &str, saved_path: &str) -> LedgerRecord {
        LedgerRecord {
            period: period.to_string(),
            url: url.to_string(),
            filename: "a.pdf".to_string(),
            saved_path: saved_path.to_string(),
            hash: "h".to_string(),
            etag: None,
            last_modified: None,
            content_length: None,
            version: 1,
            last_seen_at: "2025-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn removes_only_rows_with_missing_paths() {
        let tmp = tempdir().expect("tempdir");
        let present = tmp.path().join("present.pdf");
        fs::write(&present, b"x").expect("write");

        let ledger = Ledger::open(tmp.path().join("ledger.csv"), Duration::from_secs(5));
        ledger
            .write(&[
                record("2023", "https://x/present.pdf", present.to_str().unwrap()),
                record(
                    "2023",
                    "https://x/gone.pdf",
                    tmp.path().join("gone.pdf").to_str().unwrap(),
                ),
            ])
            .expect("seed");

        let outcome = reconcile(&ledger).expect("reconcile");
        assert_eq!(outcome.removed, 1);
        assert_eq!(outcome.kept, 1);
        assert_eq!(outcome.redirected, 0);

        let rows = ledger.read().expect("read");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].url, "https://x/present.pdf");
    }

    #[test]
    fn missing_zip_with_expanded_dir_is_redirected() {
        let tmp = tempdir().expect("tempdir");
        let dir = tmp.path().join("tables");
        fs::create_dir_all(&dir).expect("mkdir");

        let zip_path = tmp.path().join("tables.zip");
        let ledger = Ledger::open(tmp.path().join("ledger.csv"), Duration::from_secs(5));
        ledger
            .write(&[record(
                "2023",
                "https://x/tables.zip",
                zip_path.to_str().unwrap(),
            )])
            .expect("seed");

        let outcome = reconcile(&ledger).expect("reconcile");
        assert_eq!(outcome.redirected, 1);
        assert_eq!(outcome.removed, 0);

        let rows = ledger.read().expect("read");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].saved_path, dir.display().to_string());
        assert_eq!(rows[0].filename, "tables");
    }

    #[test]
    fn missing_zip_without_dir_is_removed() {
        let tmp = tempdir().expect("tempdir");
        let ledger = Ledger::open(tmp.path().join("ledger.csv"), Duration::from_secs(5));
        ledger
            .write(&[record(
                "2023",
                "https://x/tables.zip",
                tmp.path().join("tables.zip").to_str().unwrap(),
            )])
            .expect("seed");

        let outcome = reconcile(&ledger).expect("reconcile");
        assert_eq!(outcome.removed, 1);
        assert!(ledger.read().expect("read").is_empty());
    }

    #[test]
    fn clean_ledger_is_not_rewritten() {
        let tmp = tempdir().expect("tempdir");
        let present = tmp.path().join("present.pdf");
        fs::write(&present, b"x").expect("write");

        let ledger = Ledger::open(tmp.path().join("ledger.csv"), Duration::from_secs(5));
        let seeded = vec![record("2023", "https://x/present.pdf", present.to_str().unwrap())];
        ledger.write(&seeded).expect("seed");

        let outcome = reconcile(&ledger).expect("reconcile");
        assert_eq!(outcome.kept, 1);
        // No removals or redirects: last_seen_at on disk stays as seeded.
        assert_eq!(ledger.read().expect("read"), seeded);
    }
}
