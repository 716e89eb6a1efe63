//! Sweep submission and per-run status on the remote host.

use crate::artifacts::dry_run_echo;
use crate::error::{OpsError, OpsResult};
use crate::executor::ssh;
use crate::outcome::OpOutcome;
use crate::run_contract::{STDOUT_LOG, SUMMARY_JSON};
use crate::settings::remote_run_dir;
use crate::vllm::session_guard;
use crate::OpsContext;
use chrono::Local;
use ops_core::{shell_join, shell_quote};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_TMUX_SESSION: &str = "pilots";
pub const DEFAULT_TAIL_LINES: u32 = 60;
const DEFAULT_ENTRYPOINT: [&str; 2] = ["python", "inference/eval_gsm8k.py"];
const META_KEYS: [&str; 2] = ["run_id", "label"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitArgs {
    pub host: Option<String>,
    pub config: PathBuf,
    pub remote_repo: Option<String>,
    pub remote_outputs_dir: Option<String>,
    pub force: bool,
    pub no_tmux: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusArgs {
    pub host: Option<String>,
    pub run_id: String,
    pub remote_outputs_dir: Option<String>,
    pub tail_lines: u32,
}

/// Text form of a config value as it appears in run ids and flag values.
fn py_str(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn truthy_str(config: &Map<String, Value>, key: &str) -> Option<String> {
    config.get(key).filter(|v| truthy(v)).map(py_str)
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_alphanumeric() || "._-".contains(c) { c } else { '-' })
        .collect()
}

/// `<timestamp>_<env>_<model>_n<examples>_r<rollouts>_b<best_of>_seed<seed>`.
pub fn make_run_id(config: &Map<String, Value>, timestamp: &str) -> String {
    let text = |key: &str, default: &str| {
        config
            .get(key)
            .map(py_str)
            .unwrap_or_else(|| default.to_string())
    };
    let best_of = config
        .get("best_of")
        .filter(|v| truthy(v))
        .map(py_str)
        .unwrap_or_else(|| "0".to_string());
    format!(
        "{}_{}_{}_n{}_r{}_b{}_seed{}",
        timestamp,
        sanitize(&text("env_id", "env")),
        sanitize(&text("model_id", "model")),
        text("num_examples", "0"),
        text("rollouts_per_example", "0"),
        best_of,
        text("seed", "0"),
    )
}

fn flag_for_key(key: &str) -> String {
    format!("--{}", key.replace('_', "-"))
}

/// Entrypoint argv followed by one flag per config key in sorted order.
///
/// `true` becomes a bare flag; `false`, `null` and meta keys are dropped; arrays and
/// objects are passed as JSON.
pub fn build_eval_command(entrypoint: &[String], config: &Map<String, Value>) -> Vec<String> {
    let mut keys: Vec<&String> = config.keys().collect();
    keys.sort();
    let mut argv = entrypoint.to_vec();
    for key in keys {
        if META_KEYS.contains(&key.as_str()) {
            continue;
        }
        match &config[key.as_str()] {
            Value::Null | Value::Bool(false) => {}
            Value::Bool(true) => argv.push(flag_for_key(key)),
            value @ (Value::Array(_) | Value::Object(_)) => {
                argv.push(flag_for_key(key));
                argv.push(value.to_string());
            }
            value => {
                argv.push(flag_for_key(key));
                argv.push(py_str(value));
            }
        }
    }
    argv
}

fn load_submit_config(path: &Path) -> OpsResult<Map<String, Value>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        OpsError::precondition(format!("cannot read config {}: {}", path.display(), e))
    })?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let value: Value = if is_yaml {
        serde_yaml::from_str(&text).map_err(|e| {
            OpsError::precondition(format!("invalid YAML in {}: {}", path.display(), e))
        })?
    } else {
        serde_json::from_str(&text).map_err(|e| {
            OpsError::precondition(format!("invalid JSON in {}: {}", path.display(), e))
        })?
    };
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(OpsError::precondition("config must be an object")),
    }
}

fn entrypoint(config: &Map<String, Value>) -> OpsResult<Vec<String>> {
    match config.get("entrypoint") {
        None | Some(Value::Null) => Ok(DEFAULT_ENTRYPOINT.iter().map(|s| s.to_string()).collect()),
        Some(Value::Array(items)) if !items.is_empty() => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| OpsError::precondition("entrypoint must be a list of strings"))
            })
            .collect(),
        Some(_) => Err(OpsError::precondition("entrypoint must be a list of strings")),
    }
}

fn tmux_session(config: &Map<String, Value>, no_tmux: bool) -> Option<String> {
    if no_tmux {
        return None;
    }
    match config.get("tmux_session") {
        None => Some(DEFAULT_TMUX_SESSION.to_string()),
        Some(value) if truthy(value) => Some(py_str(value)),
        Some(_) => None,
    }
}

fn tmux_send(session: &str, command: &str) -> String {
    let session = shell_quote(session);
    format!(
        "tmux has-session -t {s} 2>/dev/null || tmux new-session -d -s {s}; tmux send-keys -t {s} {} C-m",
        shell_quote(command),
        s = session
    )
}

/// Queue every configured run that has not already produced a summary.
///
/// Stops at the first dispatch failure; runs queued before it stay queued.
pub fn submit(args: &SubmitArgs, ctx: &OpsContext) -> OpsResult<OpOutcome> {
    let host = ctx.settings.host(args.host.as_deref());
    let config = load_submit_config(&args.config)?;
    let defaults = match config.get("defaults") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(_) => return Err(OpsError::precondition("defaults must be an object")),
    };
    let runs = match config.get("runs") {
        None => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(_) => return Err(OpsError::precondition("runs must be a list")),
    };
    let remote_repo = truthy_str(&config, "remote_repo")
        .or_else(|| args.remote_repo.clone().filter(|r| !r.is_empty()))
        .or_else(|| ctx.settings.remote_repo.clone())
        .ok_or_else(|| {
            OpsError::precondition(
                "remote_repo not set. Provide in config, --remote-repo, or OPS_REMOTE_REPO.",
            )
        })?;
    let remote_outputs = truthy_str(&config, "remote_outputs_dir")
        .unwrap_or_else(|| ctx.settings.outputs_dir(args.remote_outputs_dir.as_deref()));
    let entrypoint = entrypoint(&config)?;
    let session = tmux_session(&config, args.no_tmux);
    let dry_run = ctx.executor.dry_run();
    let _guard = match &session {
        Some(name) => session_guard(ctx, &host, name)?,
        None => None,
    };
    let timestamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

    let mut queued: Vec<String> = Vec::new();
    let mut skipped: Vec<String> = Vec::new();
    let mut commands: Vec<String> = Vec::new();

    for run in runs.iter().filter_map(Value::as_object) {
        let mut merged = defaults.clone();
        merged.extend(run.iter().map(|(k, v)| (k.clone(), v.clone())));
        let run_id = truthy_str(&merged, "run_id").unwrap_or_else(|| make_run_id(&merged, &timestamp));
        let run_dir = truthy_str(&merged, "run_dir")
            .unwrap_or_else(|| remote_run_dir(&remote_outputs, &run_id));
        merged.insert("run_dir".to_string(), Value::String(run_dir.clone()));

        let stdout_log = format!("{}/{}", run_dir.trim_end_matches('/'), STDOUT_LOG);
        let base_cmd = format!(
            "mkdir -p {} && cd {} && {} | tee {}",
            shell_quote(&run_dir),
            shell_quote(&remote_repo),
            shell_join(&build_eval_command(&entrypoint, &merged)),
            shell_quote(&stdout_log)
        );

        if !args.force && !dry_run {
            let probe = ssh(
                &host,
                &format!("test -f {}/{}", shell_quote(&run_dir), SUMMARY_JSON),
            );
            if ctx.executor.execute(&probe).success() {
                info!(run_id = %run_id, "summary exists, skipping");
                skipped.push(run_id);
                continue;
            }
        }

        let remote_cmd = match &session {
            Some(name) => tmux_send(name, &base_cmd),
            None => base_cmd,
        };
        let result = ctx.executor.execute(&ssh(&host, &remote_cmd));
        commands.push(if dry_run { result.stdout.clone() } else { remote_cmd });
        if !result.success() {
            tracing::warn!(run_id = %run_id, returncode = result.returncode, "dispatch failed");
            return Ok(OpOutcome::reported(
                json!({
                    "ok": false,
                    "host": host,
                    "error": result.error_text(),
                    "failed_run_id": run_id,
                    "queued": queued,
                    "skipped": skipped,
                }),
                false,
            ));
        }
        info!(run_id = %run_id, "queued");
        queued.push(run_id);
    }

    Ok(OpOutcome::success(json!({
        "ok": true,
        "host": host,
        "queued": queued,
        "skipped": skipped,
        "commands": if dry_run { json!(commands) } else { Value::Null },
        "tmux_session": session,
    })))
}

/// Remote `summary.json` plus the tail of `stdout.log`; only the summary decides `ok`.
pub fn status(args: &StatusArgs, ctx: &OpsContext) -> OpsResult<OpOutcome> {
    if args.run_id.trim().is_empty() {
        return Err(OpsError::precondition("--run-id must not be empty"));
    }
    let host = ctx.settings.host(args.host.as_deref());
    let outputs = ctx.settings.outputs_dir(args.remote_outputs_dir.as_deref());
    let run_dir = shell_quote(&remote_run_dir(&outputs, &args.run_id));
    let summary_cmd = ssh(&host, &format!("cat {}/{}", run_dir, SUMMARY_JSON));
    let tail_cmd = ssh(
        &host,
        &format!("tail -n {} {}/{}", args.tail_lines, run_dir, STDOUT_LOG),
    );
    let summary = ctx.executor.execute(&summary_cmd);
    let tail = ctx.executor.execute(&tail_cmd);
    let dry_run = ctx.executor.dry_run();

    let parsed = if !dry_run && summary.success() {
        serde_json::from_str::<Value>(&summary.stdout).unwrap_or(Value::Null)
    } else {
        Value::Null
    };
    let ok = summary.success();
    Ok(OpOutcome::reported(
        json!({
            "ok": ok,
            "host": host,
            "run_id": args.run_id,
            "summary": parsed,
            "stdout_tail": if dry_run { Value::Null } else { Value::String(tail.stdout.clone()) },
            "commands": if dry_run {
                json!([dry_run_echo(ctx, &summary.stdout), dry_run_echo(ctx, &tail.stdout)])
            } else {
                Value::Null
            },
            "error": if ok { Value::Null } else { Value::String(summary.error_text()) },
        }),
        ok,
    ))
}
