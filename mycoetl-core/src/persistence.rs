//! File persistence helpers shared by loaders and orchestrators.
//!
//! Run logs, metadata sidecars and stats files all go through
//! [`atomic_write_json`] so a crash mid-write never leaves a truncated JSON
//! file next to the data.

use crate::error::{EtlError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Serialize `data` as pretty JSON and write it atomically to `path`.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    atomic_write(path, json.as_bytes())
}

/// Write bytes to a `.tmp` sibling, then rename over `path`.
///
/// Parent directories are created as needed.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load and deserialize JSON from `path`. `Ok(None)` when the file is absent.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&data)?))
}

/// SHA-256 of a file's contents as lowercase hex.
pub fn hash_file(path: &Path) -> Result<String> {
    let content = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Most recently modified file in `dir` whose name ends with `suffix`.
pub fn latest_with_suffix(dir: &Path, suffix: &str) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Err(EtlError::not_found(format!(
            "directory {} does not exist",
            dir.display()
        )));
    }

    let mut latest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(suffix));
        if !matches {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        let newer = latest.as_ref().is_none_or(|(t, p)| {
            // Equal mtimes are common on fast filesystems; fall back to the name,
            // which embeds the run timestamp.
            modified > *t || (modified == *t && path > *p)
        });
        if newer {
            latest = Some((modified, path));
        }
    }
    Ok(latest.map(|(_, p)| p))
}
