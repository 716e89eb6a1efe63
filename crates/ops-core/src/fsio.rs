use crate::{CoreError, CoreResult};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn ensure_dir(path: &Path) -> CoreResult<()> {
    fs::create_dir_all(path).map_err(|e| CoreError::io(path, e))
}

fn temp_sibling(path: &Path) -> PathBuf {
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts))
}

fn write_synced(tmp: &Path, bytes: &[u8]) -> CoreResult<()> {
    let mut file = fs::File::create(tmp).map_err(|e| CoreError::io(tmp, e))?;
    file.write_all(bytes).map_err(|e| CoreError::io(tmp, e))?;
    file.sync_all().map_err(|e| CoreError::io(tmp, e))
}

fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

/// Write-to-temp then rename; readers see either the old file or the new one.
pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = temp_sibling(path);
    write_synced(&tmp, bytes)?;
    fs::rename(&tmp, path).map_err(|e| CoreError::io(path, e))?;
    sync_parent(path);
    Ok(())
}

/// Like [`atomic_write_bytes`] but fails when `path` already exists.
///
/// The final link is created with `hard_link`, which refuses to clobber, so two
/// writers racing on the same path cannot both succeed.
pub fn atomic_write_new(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    if path.exists() {
        return Err(CoreError::AlreadyExists(path.display().to_string()));
    }
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let tmp = temp_sibling(path);
    write_synced(&tmp, bytes)?;
    let linked = fs::hard_link(&tmp, path);
    let _ = fs::remove_file(&tmp);
    match linked {
        Ok(()) => {
            sync_parent(path);
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(CoreError::AlreadyExists(path.display().to_string()))
        }
        Err(e) => Err(CoreError::io(path, e)),
    }
}

/// Pretty JSON (two-space indent) with a trailing newline.
pub fn atomic_write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> CoreResult<()> {
    let mut bytes = serde_json::to_vec_pretty(value).map_err(|e| CoreError::Json {
        path: path.display().to_string(),
        source: e,
    })?;
    bytes.push(b'\n');
    atomic_write_bytes(path, &bytes)
}

pub fn read_json_file(path: &Path) -> CoreResult<Value> {
    let bytes = fs::read(path).map_err(|e| CoreError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| CoreError::Json {
        path: path.display().to_string(),
        source: e,
    })
}
