use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures the harvest core reports per item. None of these abort a crawl;
/// the caller counts them and moves on.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("timed out after {0:?} waiting for ledger lock")]
    LockTimeout(Duration),
    #[error("download of {url} exceeds size limit ({got} > {limit} bytes)")]
    SizeLimitExceeded { url: String, got: u64, limit: u64 },
    #[error("archive expansion failed for {}: {detail}", path.display())]
    CorruptArchive { path: PathBuf, detail: String },
}
