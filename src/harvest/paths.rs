use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct HarvestPaths {
    pub home: PathBuf,
    pub data_dir: PathBuf,
    pub ledger_file: PathBuf,
    pub logs_dir: PathBuf,
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

/// Resolve the working layout. Everything hangs off `YB_HOME` (default:
/// current directory) unless overridden piecewise.
pub fn resolve_paths() -> Result<HarvestPaths> {
    let cwd = env::current_dir().context("current directory could not be resolved")?;
    let home = env_or_default_path("YB_HOME", cwd);

    let data_dir = env_or_default_path("YB_DATA_DIR", home.join("data").join("yearbook"));
    let ledger_file = env_or_default_path(
        "YB_LEDGER_FILE",
        home.join("state").join("yearbook_ledger.csv"),
    );
    let logs_dir = env_or_default_path("YB_LOGS_DIR", home.join("logs"));

    Ok(HarvestPaths {
        home,
        data_dir,
        ledger_file,
        logs_dir,
    })
}

impl HarvestPaths {
    /// Per-period artifact directory, e.g. `data/yearbook/2023`.
    pub fn period_dir(&self, period: &str) -> PathBuf {
        self.data_dir.join(period)
    }
}
