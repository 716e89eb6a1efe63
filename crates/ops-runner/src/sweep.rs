//! Sweep Status Aggregator: expected run ids from a sweep CSV against the per-run
//! directories under an output root.

use crate::error::{OpsError, OpsResult};
use crate::outcome::OpOutcome;
use crate::run_contract::{summary_ok, SUMMARY_JSON};
use crate::OpsContext;
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub const SWEEP_MANIFEST_NAME: &str = "fineweb10B_full_sweep.csv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunBucket {
    MissingDir,
    InProgress,
    ParseError,
    Failed,
    Ok,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepStatus {
    pub ok: Vec<String>,
    pub failed: Vec<String>,
    pub in_progress: Vec<String>,
    pub missing_dir: Vec<String>,
    pub parse_error: Vec<String>,
}

impl SweepStatus {
    fn push(&mut self, bucket: RunBucket, run_id: &str) {
        let list = match bucket {
            RunBucket::MissingDir => &mut self.missing_dir,
            RunBucket::InProgress => &mut self.in_progress,
            RunBucket::ParseError => &mut self.parse_error,
            RunBucket::Failed => &mut self.failed,
            RunBucket::Ok => &mut self.ok,
        };
        list.push(run_id.to_string());
    }

    pub fn counts(&self) -> Value {
        json!({
            "ok": self.ok.len(),
            "failed": self.failed.len(),
            "in_progress": self.in_progress.len(),
            "missing_dir": self.missing_dir.len(),
            "parse_error": self.parse_error.len(),
        })
    }
}

/// Buckets are checked in priority order; a directory without a summary is never a failure.
pub fn classify_run(run_dir: &Path) -> RunBucket {
    if !run_dir.is_dir() {
        return RunBucket::MissingDir;
    }
    let summary_path = run_dir.join(SUMMARY_JSON);
    if !summary_path.is_file() {
        return RunBucket::InProgress;
    }
    let parsed = fs::read(&summary_path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .filter(Value::is_object);
    match parsed {
        None => RunBucket::ParseError,
        Some(summary) if summary_ok(&summary) == Some(true) => RunBucket::Ok,
        Some(_) => RunBucket::Failed,
    }
}

pub fn compute_status(out_root: &Path, run_ids: &[String]) -> SweepStatus {
    let mut status = SweepStatus::default();
    for run_id in run_ids {
        status.push(classify_run(&out_root.join(run_id)), run_id);
    }
    status
}

/// Run ids in file order, trimmed of whitespace and surrounding quotes; blanks skipped.
///
/// A `"` only opens a quoted field at the start of the field; elsewhere it is literal.
pub fn load_run_ids(csv_path: &Path) -> OpsResult<Vec<String>> {
    let text = fs::read_to_string(csv_path)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let Some(column) = reader.headers()?.iter().position(|h| h == "run_id") else {
        return Ok(Vec::new());
    };
    let mut run_ids = Vec::new();
    for record in reader.records() {
        let record = record?;
        let Some(raw) = record.get(column) else {
            continue;
        };
        let id = raw.trim().trim_matches('"').trim_matches('\'');
        if !id.is_empty() {
            run_ids.push(id.to_string());
        }
    }
    Ok(run_ids)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepStatusArgs {
    pub csv: Option<PathBuf>,
    pub out_root: Option<PathBuf>,
}

/// The configured CSV, else the copy shipped into the output root.
fn resolve_csv(configured: &Path, out_root: &Path) -> OpsResult<PathBuf> {
    if configured.is_file() {
        return Ok(configured.to_path_buf());
    }
    let alt = out_root.join(SWEEP_MANIFEST_NAME);
    if alt.is_file() {
        return Ok(alt);
    }
    Err(OpsError::precondition(format!(
        "missing CSV: {}",
        configured.display()
    )))
}

pub fn sweep_status(args: &SweepStatusArgs, ctx: &OpsContext) -> OpsResult<OpOutcome> {
    let out_root = args
        .out_root
        .clone()
        .unwrap_or_else(|| ctx.settings.sweep_out_root.clone());
    let configured = args
        .csv
        .clone()
        .unwrap_or_else(|| ctx.settings.sweep_csv.clone());
    let csv = resolve_csv(&configured, &out_root)?;
    let run_ids = load_run_ids(&csv)?;
    let status = compute_status(&out_root, &run_ids);
    tracing::debug!(csv = %csv.display(), rows = run_ids.len(), "sweep status computed");
    Ok(OpOutcome::success(json!({
        "ok": true,
        "out_root": out_root.display().to_string(),
        "csv": csv.display().to_string(),
        "rows": run_ids.len(),
        "counts": status.counts(),
        "ok_runs": status.ok,
        "failed": status.failed,
        "in_progress": status.in_progress,
        "missing_dir": status.missing_dir,
        "parse_error": status.parse_error,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::testing::dry;
    use crate::run_contract::{RunContractWriter, RunSummary};
    use crate::settings::OpsSettings;
    use ops_court::PhaseTable;

    fn scratch(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ops_sweep_{}_{}_{}",
            tag,
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn buckets_follow_priority_order() {
        let root = scratch("buckets");
        RunContractWriter::new(root.join("A"))
            .write_summary(&RunSummary::finished("A", "nanogpt_train", true, 0.0, 1.0))
            .unwrap();
        fs::create_dir_all(root.join("B")).unwrap();
        fs::create_dir_all(root.join("D")).unwrap();
        fs::write(root.join("D").join(SUMMARY_JSON), "{not json").unwrap();
        fs::create_dir_all(root.join("E")).unwrap();
        fs::write(root.join("E").join(SUMMARY_JSON), "{\"ok\": false}").unwrap();
        fs::create_dir_all(root.join("F")).unwrap();
        fs::write(root.join("F").join(SUMMARY_JSON), "{\"elapsed_s\": 3}").unwrap();
        fs::create_dir_all(root.join("G")).unwrap();
        fs::write(root.join("G").join(SUMMARY_JSON), "[true]").unwrap();

        let ids: Vec<String> = ["A", "B", "C", "D", "E", "F", "G"].iter().map(|s| s.to_string()).collect();
        let status = compute_status(&root, &ids);
        assert_eq!(status.ok, vec!["A"]);
        assert_eq!(status.in_progress, vec!["B"]);
        assert_eq!(status.missing_dir, vec!["C"]);
        assert_eq!(status.parse_error, vec!["D", "G"]);
        assert_eq!(status.failed, vec!["E", "F"]);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn csv_run_ids_are_trimmed_and_quote_aware() {
        let root = scratch("csv");
        let csv = root.join("sweep.csv");
        fs::write(
            &csv,
            "run_id,config,seed,overrides,notes\r\n\
             \"r1\",c.py,1,\"lr=1e-3,wd=0.1\",\"multi\nline\"\n\
              'r2' ,c.py,2,,\n\
             ,c.py,3,,blank id\n\
             r3,c.py,4,,\"say \"\"hi\"\"\"\n",
        )
        .unwrap();
        assert_eq!(load_run_ids(&csv).unwrap(), vec!["r1", "r2", "r3"]);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn quote_inside_unquoted_field_is_literal() {
        let root = scratch("midquote");
        let csv = root.join("sweep.csv");
        fs::write(
            &csv,
            "run_id,config,seed,overrides,notes\n\
             r1,c.py,1,,27\" monitor\n\
             r2,c.py,2,,\n\
             r3,c.py,3,,\n",
        )
        .unwrap();
        assert_eq!(load_run_ids(&csv).unwrap(), vec!["r1", "r2", "r3"]);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn sweep_status_falls_back_to_manifest_in_out_root() {
        let root = scratch("fallback");
        fs::write(root.join(SWEEP_MANIFEST_NAME), "run_id,config\nA,x\nB,y\n").unwrap();
        fs::create_dir_all(root.join("A")).unwrap();
        let (executor, _) = dry();
        let settings = OpsSettings {
            sweep_csv: root.join("absent.csv"),
            sweep_out_root: root.clone(),
            ..OpsSettings::default()
        };
        let phases = PhaseTable::standard();
        let ctx = OpsContext::new(&executor, &settings, &phases);
        let outcome = sweep_status(&SweepStatusArgs::default(), &ctx).expect("status");
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.payload["rows"], json!(2));
        assert_eq!(outcome.payload["in_progress"], json!(["A"]));
        assert_eq!(outcome.payload["missing_dir"], json!(["B"]));
        assert_eq!(outcome.payload["counts"]["missing_dir"], json!(1));

        let missing = SweepStatusArgs {
            csv: Some(root.join("nope.csv")),
            out_root: Some(root.join("elsewhere")),
        };
        let err = sweep_status(&missing, &ctx).expect_err("no csv anywhere");
        assert_eq!(err.exit_code(), 2);
        let _ = fs::remove_dir_all(root);
    }
}
