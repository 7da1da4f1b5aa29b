use anyhow::Result;
use std::time::Duration;

use crate::commands::CommandReport;
use crate::harvest::config::load_config;
use crate::harvest::ledger::Ledger;
use crate::harvest::paths::resolve_paths;
use crate::harvest::reconcile::reconcile;

/// Standalone ledger cleanup, meant to run before a crawl or after files
/// were moved or deleted by hand.
pub fn run() -> Result<CommandReport> {
    let cfg = load_config()?;
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("reconcile");
    report.detail(format!("ledger={}", paths.ledger_file.display()));

    let ledger = Ledger::open(
        &paths.ledger_file,
        Duration::from_secs(cfg.limits.lock_wait_secs),
    );
    let outcome = reconcile(&ledger)?;

    report.detail(format!("kept={}", outcome.kept));
    report.detail(format!("removed={}", outcome.removed));
    report.detail(format!("redirected={}", outcome.redirected));
    Ok(report)
}
