use crate::error::HarvestError;
use crate::harvest::fetch::{HttpClient, RemoteValidators};
use crate::harvest::ledger::{Ledger, LedgerIndex, LedgerRecord, upsert};
use crate::harvest::util::now_rfc3339;
use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

const STAGING_SUBDIR: &str = ".staging";
const CHUNK_SIZE: usize = 8192;

/// Executes planned downloads: stream to staging, hash, promote atomically,
/// record in the ledger.
pub struct Materializer<'a> {
    client: &'a HttpClient,
    ledger: &'a Ledger,
    max_file_bytes: u64,
}

#[derive(Debug)]
struct StagedFile {
    tmp: NamedTempFile,
    hash: String,
    bytes: u64,
}

/// `name.ext` for version 1, `name.vN.ext` afterwards.
pub fn version_filename(filename: &str, version: u32) -> String {
    if version <= 1 {
        return filename.to_string();
    }
    match filename.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}.v{version}.{ext}"),
        None => format!("{filename}.v{version}"),
    }
}

/// SHA-256 hex of a file's bytes, streamed.
pub fn file_hash(path: &Path) -> Result<String> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open {} for hashing", path.display()))?;
    hash_reader(file)
}

fn hash_reader(mut reader: impl Read) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).context("read failed while hashing")?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Stream `reader` into a temp file under `staging_dir`, hashing as bytes
/// arrive and aborting past `max_bytes`. The temp file is cleaned up
/// automatically if it is never promoted.
fn stage_reader(
    mut reader: impl Read,
    staging_dir: &Path,
    filename: &str,
    max_bytes: u64,
    url: &str,
) -> Result<StagedFile> {
    fs::create_dir_all(staging_dir)
        .with_context(|| format!("failed to create {}", staging_dir.display()))?;
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!("{filename}."))
        .suffix(".part")
        .tempfile_in(staging_dir)
        .with_context(|| format!("failed to create staging file in {}", staging_dir.display()))?;

    let mut hasher = Sha256::new();
    let mut written: u64 = 0;
    let mut buf = [0u8; CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .with_context(|| format!("read failed while downloading {url}"))?;
        if n == 0 {
            break;
        }
        written += n as u64;
        if written > max_bytes {
            return Err(HarvestError::SizeLimitExceeded {
                url: url.to_string(),
                got: written,
                limit: max_bytes,
            }
            .into());
        }
        hasher.update(&buf[..n]);
        std::io::Write::write_all(tmp.as_file_mut(), &buf[..n])
            .context("write failed while staging download")?;
    }
    tmp.as_file().sync_all().context("failed to sync staged file")?;

    Ok(StagedFile {
        tmp,
        hash: format!("{:x}", hasher.finalize()),
        bytes: written,
    })
}

/// Rename the staged file into place; falls back to copy + remove when the
/// rename cannot cross a filesystem boundary.
fn promote(tmp: NamedTempFile, to: &Path) -> Result<()> {
    match tmp.persist(to) {
        Ok(_) => Ok(()),
        Err(err) => {
            fs::copy(err.file.path(), to).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    err.file.path().display(),
                    to.display()
                )
            })?;
            err.file.close().context("failed to remove staged file")?;
            Ok(())
        }
    }
}

/// Drop the staging subdirectory once a run is done with `outdir`. Only an
/// empty directory is removed; leftover partial files keep it in place.
pub fn cleanup_staging(outdir: &Path) {
    let _ = fs::remove_dir(outdir.join(STAGING_SUBDIR));
}

fn absolute(path: &Path) -> String {
    fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

impl<'a> Materializer<'a> {
    pub fn new(client: &'a HttpClient, ledger: &'a Ledger, max_file_bytes: u64) -> Self {
        Self {
            client,
            ledger,
            max_file_bytes,
        }
    }

    /// Fetch `url` and persist it under `outdir`, recording the result for
    /// (period, url). Returns `Ok(None)` when the downloaded content hashes
    /// identically to the current record — nothing is written in that case
    /// beyond refreshed validators, so the caller can tell "unchanged"
    /// apart from a failed write.
    pub fn download_and_record(
        &self,
        url: &str,
        outdir: &Path,
        period: &str,
        filename: &str,
        versioned: bool,
    ) -> Result<Option<PathBuf>> {
        let resp = self.client.get(url)?;
        let validators = RemoteValidators::from_response(&resp);

        if let Some(announced) = validators.content_length
            && announced > self.max_file_bytes
        {
            return Err(HarvestError::SizeLimitExceeded {
                url: url.to_string(),
                got: announced,
                limit: self.max_file_bytes,
            }
            .into());
        }

        let staging_dir = outdir.join(STAGING_SUBDIR);
        let staged = stage_reader(resp, &staging_dir, filename, self.max_file_bytes, url)?;

        let _guard = self.ledger.lock()?;
        let mut records = self.ledger.read()?;
        let index = LedgerIndex::build(&records);
        let now = now_rfc3339();

        if let Some(current) = index.current(period, url)
            && current.hash == staged.hash
        {
            // Unchanged content: no re-save of identical bytes, just a
            // metadata refresh on the existing row.
            let mut refreshed = current.clone();
            refreshed.etag = validators.etag;
            refreshed.last_modified = validators.last_modified;
            refreshed.content_length = validators.content_length.or(Some(staged.bytes));
            refreshed.last_seen_at = now;
            upsert(&mut records, refreshed);
            self.ledger.write(&records)?;
            debug!("content unchanged for {url}, staged bytes discarded");
            return Ok(None);
        }

        let current = index.current(period, url);
        let (version, final_name, final_path) = if versioned {
            let next = current.map_or(1, |c| c.version + 1);
            let name = version_filename(filename, next);
            let path = outdir.join(&name);
            (next, name, path)
        } else if let Some(current) = current {
            // Overwrite targets the current record's own path, which may
            // be a versioned filename, not the plain candidate name.
            (
                current.version,
                current.filename.clone(),
                PathBuf::from(&current.saved_path),
            )
        } else {
            (1, filename.to_string(), outdir.join(filename))
        };
        promote(staged.tmp, &final_path)?;

        upsert(
            &mut records,
            LedgerRecord {
                period: period.to_string(),
                url: url.to_string(),
                filename: final_name,
                saved_path: absolute(&final_path),
                hash: staged.hash,
                etag: validators.etag,
                last_modified: validators.last_modified,
                content_length: validators.content_length.or(Some(staged.bytes)),
                version,
                last_seen_at: now,
            },
        );
        self.ledger.write(&records)?;
        Ok(Some(final_path))
    }

    /// Adopt a file that exists on disk but is missing from the ledger
    /// (a prior run died between the file write and the ledger write).
    /// Hashes the on-disk bytes instead of re-downloading. Returns false
    /// when a current record already exists.
    pub fn register_existing_file(&self, period: &str, url: &str, path: &Path) -> Result<bool> {
        let hash = file_hash(path)?;
        let bytes = fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?
            .len();

        let _guard = self.ledger.lock()?;
        let mut records = self.ledger.read()?;
        let index = LedgerIndex::build(&records);
        if index.current(period, url).is_some() {
            return Ok(false);
        }

        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("download")
            .to_string();
        records.push(LedgerRecord {
            period: period.to_string(),
            url: url.to_string(),
            filename,
            saved_path: absolute(path),
            hash,
            etag: None,
            last_modified: None,
            content_length: Some(bytes),
            version: 1,
            last_seen_at: now_rfc3339(),
        });
        self.ledger.write(&records)?;
        Ok(true)
    }

    /// Point the current record for (period, url) at a new path, e.g. the
    /// directory an archive was expanded into. Returns false when there is
    /// no current record to redirect.
    pub fn update_saved_path(&self, period: &str, url: &str, new_path: &Path) -> Result<bool> {
        let _guard = self.ledger.lock()?;
        let mut records = self.ledger.read()?;
        let index = LedgerIndex::build(&records);
        let Some(current) = index.current(period, url) else {
            return Ok(false);
        };
        let version = current.version;

        for record in &mut records {
            if record.period == period && record.url == url && record.version == version {
                record.saved_path = absolute(new_path);
                record.filename = new_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(&record.filename)
                    .to_string();
                record.last_seen_at = now_rfc3339();
            }
        }
        self.ledger.write(&records)?;
        Ok(true)
    }
}
