//! `validate` and `report`: read-only scans over a local root of fetched run directories.

use crate::error::{OpsError, OpsResult};
use crate::outcome::OpOutcome;
use crate::run_contract::{REQUIRED_RUN_FILES, SUMMARY_JSON};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub const DEFAULT_ROOT: &str = "artifacts/pod_logs";

const REPORT_COLUMNS: [&str; 8] = [
    "run_id",
    "env_id",
    "model_id",
    "num_examples",
    "rollouts",
    "best_of",
    "avg_reward",
    "macro_avg_reward",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRootArgs {
    pub root: PathBuf,
}

impl Default for LocalRootArgs {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
        }
    }
}

/// Immediate subdirectories of `root`, sorted by name.
fn run_dirs(root: &Path) -> OpsResult<Vec<(String, PathBuf)>> {
    if !root.exists() {
        return Err(OpsError::precondition(format!("Root not found: {}", root.display())));
    }
    let mut dirs = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|e| OpsError::Other(e.into()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        dirs.push((name, entry.into_path()));
    }
    Ok(dirs)
}

pub fn validate(args: &LocalRootArgs) -> OpsResult<OpOutcome> {
    let mut complete = Vec::new();
    let mut missing: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for (name, dir) in run_dirs(&args.root)? {
        let absent: Vec<&str> = REQUIRED_RUN_FILES
            .iter()
            .copied()
            .filter(|file| !dir.join(file).exists())
            .collect();
        if absent.is_empty() {
            complete.push(name);
        } else {
            missing.insert(name, absent);
        }
    }
    debug!(complete = complete.len(), incomplete = missing.len(), "validated run root");
    Ok(OpOutcome::success(json!({
        "ok": true,
        "root": args.root.display().to_string(),
        "complete": complete,
        "missing": missing,
    })))
}

fn load_summary(dir: &Path) -> Option<Map<String, Value>> {
    let bytes = fs::read(dir.join(SUMMARY_JSON)).ok()?;
    match serde_json::from_slice(&bytes).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn report_row(run_id: String, summary: &Map<String, Value>) -> Map<String, Value> {
    let empty = Map::new();
    let meta = summary
        .get("run_metadata")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let field = |source: &Map<String, Value>, key: &str| source.get(key).cloned().unwrap_or(Value::Null);
    let mut row = Map::new();
    row.insert("run_id".to_string(), Value::String(run_id));
    row.insert("env_id".to_string(), field(meta, "env_id"));
    row.insert("model_id".to_string(), field(meta, "model_id"));
    row.insert("num_examples".to_string(), field(meta, "num_examples"));
    row.insert("rollouts".to_string(), field(meta, "rollouts_per_example"));
    row.insert("best_of".to_string(), field(meta, "best_of"));
    row.insert("avg_reward".to_string(), field(summary, "avg_reward"));
    row.insert("macro_avg_reward".to_string(), field(summary, "macro_avg_reward"));
    if let Some(ok) = summary.get("ok") {
        row.insert("ok".to_string(), ok.clone());
    }
    row
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn markdown_table(rows: &[Map<String, Value>]) -> String {
    let mut lines = vec![
        format!("| {} |", REPORT_COLUMNS.join(" | ")),
        format!("| {} |", vec!["---"; REPORT_COLUMNS.len()].join(" | ")),
    ];
    for row in rows {
        let cells: Vec<String> = REPORT_COLUMNS.iter().map(|key| cell(row.get(*key))).collect();
        lines.push(format!("| {} |", cells.join(" | ")));
    }
    lines.join("\n")
}

/// Runs without a parseable summary are left out of the report.
pub fn report(args: &LocalRootArgs) -> OpsResult<OpOutcome> {
    let rows: Vec<Map<String, Value>> = run_dirs(&args.root)?
        .into_iter()
        .filter_map(|(name, dir)| load_summary(&dir).map(|summary| report_row(name, &summary)))
        .collect();
    Ok(OpOutcome::success(json!({
        "ok": true,
        "root": args.root.display().to_string(),
        "count": rows.len(),
        "markdown": markdown_table(&rows),
        "rows": rows,
    })))
}
