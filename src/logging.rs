use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_PREFIX: &str = "harvest_";
const KEEP_LOGS: usize = 12;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("YB_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn open_log_file(logs_dir: &Path) -> Result<File> {
    fs::create_dir_all(logs_dir)
        .with_context(|| format!("failed to create {}", logs_dir.display()))?;
    cleanup_old_logs(logs_dir, KEEP_LOGS);

    let stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");
    let path = logs_dir.join(format!("{LOG_PREFIX}{stamp}.log"));
    File::create(&path).with_context(|| format!("failed to create {}", path.display()))
}

fn cleanup_old_logs(logs_dir: &Path, keep: usize) {
    let Ok(entries) = fs::read_dir(logs_dir) else {
        return;
    };
    let mut logs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(LOG_PREFIX) && n.ends_with(".log"))
        })
        .collect();
    logs.sort();
    logs.reverse();
    for old in logs.into_iter().skip(keep) {
        let _ = fs::remove_file(old);
    }
}

/// Console on stderr plus a timestamped file under `logs_dir`. When the
/// log file cannot be created the run still proceeds console-only.
pub fn init(logs_dir: &Path) {
    let console = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match open_log_file(logs_dir) {
        Ok(file) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            let _ = tracing_subscriber::registry()
                .with(env_filter())
                .with(console)
                .with(file_layer)
                .try_init();
        }
        Err(err) => {
            let _ = tracing_subscriber::registry()
                .with(env_filter())
                .with(console)
                .try_init();
            tracing::warn!("file logging disabled: {err:#}");
        }
    }
}
