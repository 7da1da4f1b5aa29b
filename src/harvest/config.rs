use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

/// What to do when remote content changed for a (period, url) the ledger
/// already knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Retain history: write a new row with an incremented version.
    #[default]
    Safe,
    /// Replace in place, no history.
    Overwrite,
}

impl PolicyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Overwrite => "overwrite",
        }
    }
}

impl fmt::Display for PolicyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(Self::Safe),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(anyhow!("invalid policy mode `{other}`: use `safe` or `overwrite`")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_initial_ms: u64,
    pub polite_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "DataResScraper/1.0".to_string(),
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_attempts: 4,
            backoff_initial_ms: 1_000,
            polite_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSourceConfig {
    pub root_url: String,
    pub start_period: Option<i32>,
    pub end_period: Option<i32>,
    pub allowed_extensions: Vec<String>,
    pub excluded_keywords: Vec<String>,
}

impl Default for CrawlSourceConfig {
    fn default() -> Self {
        Self {
            root_url: "https://ohss.dhs.gov/topics/immigration/yearbook".to_string(),
            start_period: None,
            end_period: None,
            allowed_extensions: [".pdf", ".xlsx", ".xls", ".zip"]
                .into_iter()
                .map(ToOwned::to_owned)
                .collect(),
            excluded_keywords: ["enforcement", "refugee", "asylee"]
                .into_iter()
                .map(ToOwned::to_owned)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_file_bytes: u64,
    pub lock_wait_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: 500 * 1024 * 1024,
            lock_wait_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HarvestConfig {
    pub mode: PolicyMode,
    pub http: HttpConfig,
    pub source: CrawlSourceConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialHarvestConfig {
    mode: Option<PolicyMode>,
    http: Option<HttpConfig>,
    source: Option<CrawlSourceConfig>,
    limits: Option<LimitsConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_opt_i32(var: &str, fallback: Option<i32>) -> Option<i32> {
    match env::var(var) {
        Ok(v) => v.trim().parse::<i32>().ok().or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>();
            if out.is_empty() { fallback.to_vec() } else { out }
        }
        Err(_) => fallback.to_vec(),
    }
}

fn validate(cfg: &HarvestConfig) -> Result<()> {
    if cfg.source.root_url.trim().is_empty() {
        return Err(anyhow!("invalid root url: cannot be empty"));
    }
    if let (Some(start), Some(end)) = (cfg.source.start_period, cfg.source.end_period)
        && start > end
    {
        return Err(anyhow!("invalid period range: start {start} is after end {end}"));
    }
    if cfg.source.allowed_extensions.is_empty() {
        return Err(anyhow!("invalid allowed extensions: need at least one"));
    }
    if cfg.http.max_attempts == 0 {
        return Err(anyhow!("invalid http max attempts: must be >= 1"));
    }
    if cfg.http.timeout_secs == 0 {
        return Err(anyhow!("invalid http timeout: must be >= 1 second"));
    }
    if cfg.limits.max_file_bytes == 0 {
        return Err(anyhow!("invalid max file bytes: must be >= 1"));
    }
    if cfg.limits.lock_wait_secs == 0 {
        return Err(anyhow!("invalid ledger lock wait: must be >= 1 second"));
    }
    Ok(())
}

fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("YB_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".yb-harvest").join("config.toml"))
}

fn merge_file_config(base: &mut HarvestConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialHarvestConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse config {}: {err}", path.display()))?;
    if let Some(mode) = parsed.mode {
        base.mode = mode;
    }
    if let Some(http) = parsed.http {
        base.http = http;
    }
    if let Some(source) = parsed.source {
        base.source = source;
    }
    if let Some(limits) = parsed.limits {
        base.limits = limits;
    }
    Ok(())
}

pub fn load_config() -> Result<HarvestConfig> {
    let mut cfg = HarvestConfig::default();
    merge_file_config(&mut cfg)?;

    if let Ok(mode) = env::var("YB_MODE")
        && !mode.trim().is_empty()
    {
        cfg.mode = mode.parse()?;
    }
    cfg.http.user_agent = env_or_string("YB_USER_AGENT", &cfg.http.user_agent);
    cfg.http.timeout_secs = env_or_u64("YB_HTTP_TIMEOUT_SECS", cfg.http.timeout_secs);
    cfg.http.connect_timeout_secs =
        env_or_u64("YB_HTTP_CONNECT_TIMEOUT_SECS", cfg.http.connect_timeout_secs);
    cfg.http.max_attempts = env_or_u32("YB_HTTP_MAX_ATTEMPTS", cfg.http.max_attempts);
    cfg.http.backoff_initial_ms =
        env_or_u64("YB_HTTP_BACKOFF_INITIAL_MS", cfg.http.backoff_initial_ms);
    cfg.http.polite_delay_ms = env_or_u64("YB_POLITE_DELAY_MS", cfg.http.polite_delay_ms);
    cfg.source.root_url = env_or_string("YB_ROOT_URL", &cfg.source.root_url);
    cfg.source.start_period = env_opt_i32("YB_START_PERIOD", cfg.source.start_period);
    cfg.source.end_period = env_opt_i32("YB_END_PERIOD", cfg.source.end_period);
    cfg.source.allowed_extensions =
        env_or_csv("YB_ALLOWED_EXTENSIONS", &cfg.source.allowed_extensions);
    cfg.source.excluded_keywords =
        env_or_csv("YB_EXCLUDED_KEYWORDS", &cfg.source.excluded_keywords);
    cfg.limits.max_file_bytes = env_or_u64("YB_MAX_FILE_BYTES", cfg.limits.max_file_bytes);
    cfg.limits.lock_wait_secs = env_or_u64("YB_LOCK_WAIT_SECS", cfg.limits.lock_wait_secs);

    validate(&cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_mode_parses_case_insensitively() {
        assert_eq!("Safe".parse::<PolicyMode>().unwrap(), PolicyMode::Safe);
        assert_eq!(
            "OVERWRITE".parse::<PolicyMode>().unwrap(),
            PolicyMode::Overwrite
        );
        assert!("keep".parse::<PolicyMode>().is_err());
    }

    #[test]
    fn default_config_validates() {
        validate(&HarvestConfig::default()).unwrap();
    }

    #[test]
    fn inverted_period_range_is_rejected() {
        let mut cfg = HarvestConfig::default();
        cfg.source.start_period = Some(2020);
        cfg.source.end_period = Some(1996);
        assert!(validate(&cfg).is_err());
    }
}
