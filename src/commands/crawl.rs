use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::commands::CommandReport;
use crate::harvest::config::{PolicyMode, load_config};
use crate::harvest::discover::{discover_candidates, discover_periods};
use crate::harvest::fetch::HttpClient;
use crate::harvest::ledger::{Ledger, LedgerIndex};
use crate::harvest::materialize::{Materializer, cleanup_staging};
use crate::harvest::paths::resolve_paths;
use crate::harvest::plan::{Decision, plan};
use crate::harvest::reconcile::reconcile;
use crate::harvest::unpack::{expand_zip, is_zip};

#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    pub mode: Option<PolicyMode>,
    pub out: Option<PathBuf>,
    pub from: Option<i32>,
    pub to: Option<i32>,
    pub root_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
struct CrawlCounts {
    downloaded: usize,
    versioned: usize,
    registered: usize,
    skipped: usize,
    unchanged: usize,
    errors: usize,
}

/// One full crawl run: reconcile the ledger, discover periods and file
/// candidates, then plan and materialize each one. Per-item failures are
/// counted and logged, never fatal; only discovery failure aborts.
pub fn run(opts: &CrawlOptions) -> Result<CommandReport> {
    let mut cfg = load_config()?;
    if let Some(mode) = opts.mode {
        cfg.mode = mode;
    }
    if let Some(from) = opts.from {
        cfg.source.start_period = Some(from);
    }
    if let Some(to) = opts.to {
        cfg.source.end_period = Some(to);
    }
    if let Some(root_url) = &opts.root_url {
        cfg.source.root_url = root_url.clone();
    }

    let mut paths = resolve_paths()?;
    if let Some(out) = &opts.out {
        paths.data_dir = out.clone();
    }

    let mut report = CommandReport::new("crawl");
    report.detail(format!("mode={}", cfg.mode));
    report.detail(format!("root_url={}", cfg.source.root_url));
    report.detail(format!("data_dir={}", paths.data_dir.display()));
    report.detail(format!("ledger={}", paths.ledger_file.display()));

    let ledger = Ledger::open(
        &paths.ledger_file,
        Duration::from_secs(cfg.limits.lock_wait_secs),
    );

    // Stale rows (manually deleted files) would block re-download forever.
    let pre = reconcile(&ledger).context("pre-crawl reconcile failed")?;
    if pre.removed > 0 || pre.redirected > 0 {
        info!(
            "pre-crawl reconcile: removed={} redirected={}",
            pre.removed, pre.redirected
        );
    }

    let client = HttpClient::new(&cfg.http)?;
    let materializer = Materializer::new(&client, &ledger, cfg.limits.max_file_bytes);

    let periods = discover_periods(
        &client,
        &cfg.source.root_url,
        cfg.source.start_period,
        cfg.source.end_period,
    )
    .with_context(|| format!("discovery failed for {}", cfg.source.root_url))?;
    if periods.is_empty() {
        bail!("no period pages discovered at {}", cfg.source.root_url);
    }

    let mut counts = CrawlCounts::default();

    for page in &periods {
        info!("processing period {}", page.period);
        let candidates = match discover_candidates(
            &client,
            &page.url,
            &cfg.source.allowed_extensions,
            &cfg.source.excluded_keywords,
        ) {
            Ok(candidates) => candidates,
            Err(err) => {
                counts.errors += 1;
                error!("failed to list files for period {}: {err}", page.period);
                continue;
            }
        };
        if candidates.is_empty() {
            info!("period {}: no files found", page.period);
            continue;
        }
        info!("period {}: {} file(s) discovered", page.period, candidates.len());

        let period_dir = paths.period_dir(&page.period);
        for candidate in &candidates {
            if let Err(err) = process_candidate(
                &ledger,
                &materializer,
                &client,
                cfg.mode,
                &page.period,
                candidate,
                &period_dir,
                &mut counts,
            ) {
                counts.errors += 1;
                error!("[error] {} {} ({err:#})", page.period, candidate.url);
            }
        }
        cleanup_staging(&period_dir);
    }

    info!(
        "crawl summary: downloaded={} new_versions={} registered={} skipped={} unchanged={} errors={}",
        counts.downloaded,
        counts.versioned,
        counts.registered,
        counts.skipped,
        counts.unchanged,
        counts.errors
    );
    report.detail(format!("downloaded={}", counts.downloaded));
    report.detail(format!("versioned={}", counts.versioned));
    report.detail(format!("registered={}", counts.registered));
    report.detail(format!("skipped={}", counts.skipped));
    report.detail(format!("unchanged={}", counts.unchanged));
    report.detail(format!("errors={}", counts.errors));
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn process_candidate(
    ledger: &Ledger,
    materializer: &Materializer<'_>,
    client: &HttpClient,
    mode: PolicyMode,
    period: &str,
    candidate: &crate::harvest::discover::Candidate,
    period_dir: &Path,
    counts: &mut CrawlCounts,
) -> Result<()> {
    let index = LedgerIndex::build(&ledger.read()?);
    // The header gate can only ever skip against a stored record, so a
    // fresh URL is not worth a HEAD round-trip.
    let probed = if index.current(period, &candidate.url).is_some() {
        client.head_validators(&candidate.url)
    } else {
        None
    };
    let planned = plan(&index, period, &candidate.url, probed.as_ref(), mode);

    if planned.decision == Decision::Skip {
        counts.skipped += 1;
        info!("[skipped] {period} {} ({})", candidate.url, planned.reason);
        return Ok(());
    }

    // A file the ledger lost track of (crash between file write and ledger
    // write) is adopted from disk instead of re-downloaded.
    let expected = period_dir.join(&candidate.filename);
    if expected.exists() && index.current(period, &candidate.url).is_none() {
        if materializer.register_existing_file(period, &candidate.url, &expected)? {
            counts.registered += 1;
            info!(
                "[registered] {period} {} -> {}",
                candidate.url,
                expected.display()
            );
        }
        return Ok(());
    }

    let versioned = planned.decision == Decision::Version;
    fs::create_dir_all(period_dir)
        .with_context(|| format!("failed to create {}", period_dir.display()))?;

    match materializer.download_and_record(
        &candidate.url,
        period_dir,
        period,
        &candidate.filename,
        versioned,
    )? {
        Some(saved) => {
            if versioned {
                counts.versioned += 1;
                info!("[new-version] {period} {} -> {}", candidate.url, saved.display());
            } else {
                counts.downloaded += 1;
                info!("[downloaded] {period} {} -> {}", candidate.url, saved.display());
            }
            if is_zip(&saved) {
                match expand_zip(&saved) {
                    Ok(dir) => {
                        materializer.update_saved_path(period, &candidate.url, &dir)?;
                        fs::remove_file(&saved)
                            .with_context(|| format!("failed to remove {}", saved.display()))?;
                        info!("removed archive {} after expansion", saved.display());
                    }
                    Err(err) => {
                        // Archive kept untouched; the ledger still points at it.
                        warn!("archive left unexpanded: {err:#}");
                    }
                }
            }
        }
        None => {
            counts.unchanged += 1;
            info!("[unchanged] {period} {} (no write)", candidate.url);
        }
    }
    Ok(())
}
