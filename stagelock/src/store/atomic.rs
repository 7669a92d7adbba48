//! Crash-safe file writes.

use chrono::Utc;
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::errors::PersistenceError;

/// Writes `bytes` to `path` so readers see either the old or the new file.
///
/// The data goes to a sibling temp file, is fsynced, renamed over the target,
/// and the parent directory is fsynced. A failure leaves the target untouched.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
    }

    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("record");
    let tmp = path.with_file_name(format!(
        ".{name}.tmp.{}.{}",
        std::process::id(),
        Utc::now().timestamp_micros()
    ));

    let result = write_and_rename(&tmp, path, bytes);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result?;

    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

fn write_and_rename(tmp: &Path, path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    let mut file = fs::File::create(tmp).map_err(|e| PersistenceError::io(tmp, e))?;
    file.write_all(bytes).map_err(|e| PersistenceError::io(tmp, e))?;
    file.sync_all().map_err(|e| PersistenceError::io(tmp, e))?;
    fs::rename(tmp, path).map_err(|e| PersistenceError::io(path, e))
}
