//! Local single-writer guard for remote session mutations.
//!
//! `tmux has-session || tmux new-session` is check-then-act on the remote host. Two
//! orchestrators on the same machine targeting one session name serialise here;
//! instances on different machines are not coordinated.

use crate::error::{OpsError, OpsResult};
use chrono::Utc;
use ops_core::{ensure_dir, sha256_bytes, short_digest};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{info, warn};

#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Sanitised names stay readable; the digest of the raw pair keeps distinct sessions apart.
fn lock_file_name(host: &str, session: &str) -> String {
    let clean = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || "._-".contains(c) { c } else { '-' })
            .collect()
    };
    let digest = sha256_bytes(format!("{}\0{}", host, session).as_bytes());
    format!(
        "{}__{}__{}.lock",
        clean(host),
        clean(session),
        short_digest(&digest, 8)
    )
}

fn holder_pid(path: &Path) -> Option<u32> {
    let raw = fs::read(path).ok()?;
    let doc: Value = serde_json::from_slice(&raw).ok()?;
    doc.get("pid")?.as_u64().and_then(|pid| u32::try_from(pid).ok())
}

fn process_alive(pid: u32) -> bool {
    if Path::new("/proc/self").is_dir() {
        return Path::new("/proc").join(pid.to_string()).exists();
    }
    Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(true)
}

/// A lock whose recorded holder no longer runs was left by a killed invocation.
/// Locks without a readable pid are treated as live.
fn is_stale(path: &Path) -> bool {
    match holder_pid(path) {
        Some(pid) => pid != std::process::id() && !process_alive(pid),
        None => false,
    }
}

fn try_create(path: &Path, host: &str, session: &str) -> std::io::Result<SessionLock> {
    let mut file = fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    let payload = format!(
        "{{\"pid\":{},\"host\":{:?},\"session\":{:?},\"acquired_at\":\"{}\"}}\n",
        std::process::id(),
        host,
        session,
        Utc::now().to_rfc3339()
    );
    let _ = file.write_all(payload.as_bytes());
    let _ = file.sync_all();
    Ok(SessionLock { path: path.to_path_buf() })
}

pub fn acquire_session_lock(lock_dir: &Path, host: &str, session: &str) -> OpsResult<SessionLock> {
    ensure_dir(lock_dir)?;
    let path = lock_dir.join(lock_file_name(host, session));
    match try_create(&path, host, session) {
        Ok(lock) => return Ok(lock),
        Err(e) if e.kind() != std::io::ErrorKind::AlreadyExists => return Err(e.into()),
        Err(_) => {}
    }
    if is_stale(&path) {
        info!(host, session, lock = %path.display(), "reclaiming lock left by a dead process");
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        match try_create(&path, host, session) {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() != std::io::ErrorKind::AlreadyExists => return Err(e.into()),
            Err(_) => {}
        }
    }
    warn!(host, session, lock = %path.display(), "session lock is held");
    Err(OpsError::OperationInProgress(format!(
        "session '{}' on {} is being modified by another invocation (lock: {})",
        session,
        host,
        path.display()
    )))
}
