use anyhow::Result;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::commands::CommandReport;
use crate::harvest::config::load_config;
use crate::harvest::ledger::{Ledger, LedgerIndex};
use crate::harvest::paths::resolve_paths;

pub fn run() -> Result<CommandReport> {
    let cfg = load_config()?;
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("mode={}", cfg.mode));
    report.detail(format!("root_url={}", cfg.source.root_url));
    report.detail(format!("home={}", paths.home.display()));
    report.detail(format!("data_dir={}", paths.data_dir.display()));
    report.detail(format!("ledger={}", paths.ledger_file.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));

    if !paths.ledger_file.exists() {
        report.detail("ledger not created yet (no crawl has run)".to_string());
        return Ok(report);
    }

    let ledger = Ledger::open(
        &paths.ledger_file,
        Duration::from_secs(cfg.limits.lock_wait_secs),
    );
    let records = ledger.read()?;
    let index = LedgerIndex::build(&records);
    let periods: BTreeSet<&str> = records.iter().map(|r| r.period.as_str()).collect();
    let stale = records
        .iter()
        .filter(|r| !Path::new(&r.saved_path).exists())
        .count();

    report.detail(format!("ledger_rows={}", records.len()));
    report.detail(format!("current_records={}", index.len()));
    report.detail(format!("periods={}", periods.len()));
    if stale > 0 {
        report.issue(format!(
            "{stale} ledger row(s) point at missing files; run `yb-harvest reconcile`"
        ));
    }

    Ok(report)
}
