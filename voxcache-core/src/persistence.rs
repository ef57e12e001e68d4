//! Shared persistence utilities: atomic file writes, JSON load/save.
//!
//! Cache entries, saved images and convergence traces all go through the
//! same write-to-`.tmp`-then-rename pattern.

use std::io;
use std::path::{Path, PathBuf};

/// Atomically write JSON data to a file.
///
/// Serializes `data` to pretty-printed JSON, writes to a `.tmp` sibling file,
/// then renames onto the target path. Creates parent directories if they
/// don't exist.
pub fn atomic_write_json<T: serde::Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(data).map_err(io::Error::other)?;
    atomic_write(path, json.as_bytes())
}

/// Atomically write raw bytes to a file.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = tmp_sibling(path);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// `img.nii.gz` must not collide with `img.nii.tmp`, so the suffix is appended
// rather than substituted for the extension.
fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Load and deserialize JSON from a file.
///
/// Returns `Ok(None)` if the file doesn't exist.
/// Returns `Err` on I/O errors or deserialization failures.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read_to_string(path)?;
    let value =
        serde_json::from_str(&data).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(value))
}
