//! Shared plumbing for the ops workspace: durable file writes, content digests,
//! shell quoting and timestamps.

mod digest;
mod fsio;
mod shell;

pub use digest::{sha256_bytes, sha256_file, short_digest};
pub use fsio::{
    atomic_write_bytes, atomic_write_json_pretty, atomic_write_new, ensure_dir, read_json_file,
};
pub use shell::{shell_join, shell_quote};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("refusing to overwrite existing file: {0}")]
    AlreadyExists(String),
}

impl CoreError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        CoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// UTC wall clock in the second-resolution form used by verdicts and evidence.
pub fn utc_now_compact() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
