//! The artifact set a training run leaves in its output directory.
//!
//! The engine only reads these files (`validate`, `report`, `runs status`, the sweep
//! aggregator). [`RunContractWriter`] is the run-side half of the contract and is
//! also what fixtures are built with.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ops_core::{atomic_write_bytes, atomic_write_json_pretty, shell_join, shell_quote};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const RUN_CONTRACT_VERSION: u32 = 1;

pub const COMMAND_SH: &str = "command.sh";
pub const RUN_METADATA_JSON: &str = "run_metadata.json";
pub const CONFIG_EFFECTIVE_JSON: &str = "config_effective.json";
pub const DATASET_MANIFEST_JSON: &str = "dataset_manifest.json";
pub const SUMMARY_JSON: &str = "summary.json";
pub const STDOUT_LOG: &str = "stdout.log";

/// Files a completed run directory must contain to be considered legible.
pub const REQUIRED_RUN_FILES: [&str; 4] = [COMMAND_SH, RUN_METADATA_JSON, SUMMARY_JSON, STDOUT_LOG];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    pub commit: String,
    pub branch: String,
    pub dirty: bool,
}

impl GitInfo {
    /// `None` when `repo_dir` is not a git checkout or git is unavailable.
    pub fn probe(repo_dir: &Path) -> Option<Self> {
        let git = |args: &[&str]| -> Option<std::process::Output> {
            Command::new("git")
                .arg("-C")
                .arg(repo_dir)
                .args(args)
                .stdin(Stdio::null())
                .stderr(Stdio::null())
                .output()
                .ok()
        };
        let text = |out: std::process::Output| -> Option<String> {
            out.status
                .success()
                .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
        };
        let commit = text(git(&["rev-parse", "HEAD"])?)?;
        let branch = text(git(&["rev-parse", "--abbrev-ref", "HEAD"])?)?;
        let dirty = !git(&["diff", "--quiet"])?.status.success();
        Some(Self {
            commit,
            branch,
            dirty,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub contract_version: u32,
    pub run_id: String,
    pub run_kind: String,
    pub out_dir: String,
    pub argv: Vec<String>,
    pub host: String,
    pub platform: String,
    pub ddp: bool,
    pub rank: u32,
    pub world_size: u32,
    pub device: String,
    pub device_type: String,
    pub git: Option<GitInfo>,
    pub ts: i64,
}

impl RunMetadata {
    /// Single-process metadata for the current machine; `git` is probed from `repo_dir`.
    pub fn local(
        run_id: &str,
        run_kind: &str,
        out_dir: &Path,
        argv: Vec<String>,
        repo_dir: Option<&Path>,
    ) -> Self {
        Self {
            contract_version: RUN_CONTRACT_VERSION,
            run_id: run_id.to_string(),
            run_kind: run_kind.to_string(),
            out_dir: out_dir.display().to_string(),
            argv,
            host: local_hostname(),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            ddp: false,
            rank: 0,
            world_size: 1,
            device: "cpu".to_string(),
            device_type: "cpu".to_string(),
            git: repo_dir.and_then(GitInfo::probe),
            ts: Utc::now().timestamp(),
        }
    }
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| fs::read_to_string("/etc/hostname").ok().map(|h| h.trim().to_string()))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: String,
    pub size_bytes: u64,
    pub mtime: f64,
}

impl ManifestEntry {
    pub fn stat(path: &Path) -> Result<Self> {
        let meta = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
        let mtime = meta
            .modified()
            .map(|t| DateTime::<Utc>::from(t).timestamp_micros() as f64 / 1_000_000.0)
            .unwrap_or(0.0);
        Ok(Self {
            path: path.display().to_string(),
            size_bytes: meta.len(),
            mtime,
        })
    }
}

/// Terminal outcome of a run. `ok` is the only field the engine classifies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub contract_version: u32,
    pub run_id: String,
    pub run_kind: String,
    pub ok: bool,
    pub start_time: f64,
    pub end_time: f64,
    pub elapsed_s: f64,
    pub iter_num: u64,
    pub max_iters: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_metrics: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunSummary {
    pub fn finished(run_id: &str, run_kind: &str, ok: bool, start_time: f64, end_time: f64) -> Self {
        Self {
            contract_version: RUN_CONTRACT_VERSION,
            run_id: run_id.to_string(),
            run_kind: run_kind.to_string(),
            ok,
            start_time,
            end_time,
            elapsed_s: end_time - start_time,
            iter_num: 0,
            max_iters: 0,
            final_metrics: None,
            error: None,
        }
    }
}

/// `Some(true)` only for a literal JSON `true`; `None` when the key is absent.
pub fn summary_ok(summary: &Value) -> Option<bool> {
    summary.get("ok").map(|v| v.as_bool() == Some(true))
}

pub struct RunContractWriter {
    out_dir: PathBuf,
}

impl RunContractWriter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    /// Serialise through `Value` so keys land in sorted order.
    fn write_sorted<T: Serialize>(&self, name: &str, payload: &T) -> Result<PathBuf> {
        let path = self.out_dir.join(name);
        let value = serde_json::to_value(payload)?;
        atomic_write_json_pretty(&path, &value)?;
        Ok(path)
    }

    pub fn write_command_sh<S: AsRef<str>>(&self, cwd: &Path, argv: &[S]) -> Result<PathBuf> {
        let path = self.out_dir.join(COMMAND_SH);
        let script = format!(
            "#!/usr/bin/env bash\nset -euo pipefail\ncd {}\n{}\n",
            shell_quote(&cwd.display().to_string()),
            shell_join(argv)
        );
        atomic_write_bytes(&path, script.as_bytes())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
                .with_context(|| format!("chmod {}", path.display()))?;
        }
        Ok(path)
    }

    pub fn write_run_metadata(&self, metadata: &RunMetadata) -> Result<PathBuf> {
        self.write_sorted(RUN_METADATA_JSON, metadata)
    }

    pub fn write_config_effective(&self, config: &Map<String, Value>) -> Result<PathBuf> {
        let mut effective = config.clone();
        effective.insert("contract_version".to_string(), Value::from(RUN_CONTRACT_VERSION));
        self.write_sorted(CONFIG_EFFECTIVE_JSON, &effective)
    }

    pub fn write_dataset_manifest(
        &self,
        dataset: &str,
        data_dir: &Path,
        train: &[PathBuf],
        val: &[PathBuf],
    ) -> Result<PathBuf> {
        let entries = |files: &[PathBuf]| -> Result<Vec<ManifestEntry>> {
            files.iter().map(|p| ManifestEntry::stat(p)).collect()
        };
        let payload = serde_json::json!({
            "contract_version": RUN_CONTRACT_VERSION,
            "dataset": dataset,
            "data_dir": data_dir.display().to_string(),
            "train": entries(train)?,
            "val": entries(val)?,
        });
        self.write_sorted(DATASET_MANIFEST_JSON, &payload)
    }

    pub fn write_summary(&self, summary: &RunSummary) -> Result<PathBuf> {
        self.write_sorted(SUMMARY_JSON, summary)
    }
}
