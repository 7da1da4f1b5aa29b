use crate::error::HarvestError;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

pub fn is_zip(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("zip"))
}

fn resolve_unzip_bin() -> Result<PathBuf> {
    let found = which::which("unzip").context("unzip binary not found in PATH")?;
    Ok(found)
}

/// Expand `zip_path` into a sibling directory named after the zip stem
/// (`tables.zip` → `tables/`). The archive itself is left untouched; a
/// corrupt archive is a permanent per-item failure. Returns the directory.
pub fn expand_zip(zip_path: &Path) -> Result<PathBuf> {
    let stem = zip_path
        .file_stem()
        .and_then(|s| s.to_str())
        .context("zip path has no usable file stem")?;
    let target_dir = zip_path
        .parent()
        .context("zip path has no parent directory")?
        .join(stem);

    std::fs::create_dir_all(&target_dir)
        .with_context(|| format!("failed to create {}", target_dir.display()))?;

    let bin = resolve_unzip_bin()?;
    let out = Command::new(&bin)
        .arg("-o")
        .arg("-q")
        .arg(zip_path)
        .arg("-d")
        .arg(&target_dir)
        .output()
        .with_context(|| format!("failed to run `{}`", bin.display()))?;

    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
        let detail = if stderr.is_empty() { stdout } else { stderr };
        return Err(HarvestError::CorruptArchive {
            path: zip_path.to_path_buf(),
            detail,
        }
        .into());
    }

    info!(
        "expanded {} into {}/",
        zip_path.display(),
        target_dir.display()
    );
    Ok(target_dir)
}

#[cfg(test)]
mod tests {
    use super::is_zip;
    use std::path::Path;

    #[test]
    fn zip_detection_is_case_insensitive() {
        assert!(is_zip(Path::new("/x/tables.zip")));
        assert!(is_zip(Path::new("/x/TABLES.ZIP")));
        assert!(!is_zip(Path::new("/x/tables.xlsx")));
        assert!(!is_zip(Path::new("/x/zip")));
    }
}
