use crate::error::{OpsError, OpsResult};
use crate::executor::{scp_recursive, ssh};
use crate::outcome::OpOutcome;
use crate::settings::remote_run_dir;
use crate::OpsContext;
use ops_core::{ensure_dir, shell_quote};
use serde_json::{json, Value};
use std::path::PathBuf;

pub const DEFAULT_LOCAL_ROOT: &str = "artifacts/pod_logs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveArgs {
    pub host: Option<String>,
    pub run_id: String,
    pub remote_outputs_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchArgs {
    pub host: Option<String>,
    pub run_id: String,
    pub remote_outputs_dir: Option<String>,
    pub local_root: PathBuf,
}

fn require_run_id(run_id: &str) -> OpsResult<()> {
    if run_id.trim().is_empty() {
        return Err(OpsError::precondition("--run-id must not be empty"));
    }
    Ok(())
}

fn transport_failure(host: &str, error: String) -> OpOutcome {
    OpOutcome::reported(json!({ "ok": false, "host": host, "error": error }), false)
}

/// Copy the pod's evaluation outputs into a per-run remote directory.
pub fn archive(args: &ArchiveArgs, ctx: &OpsContext) -> OpsResult<OpOutcome> {
    require_run_id(&args.run_id)?;
    let host = ctx.settings.host(args.host.as_deref());
    let outputs = ctx.settings.outputs_dir(args.remote_outputs_dir.as_deref());
    let remote_dir = remote_run_dir(&outputs, &args.run_id);
    let quoted = shell_quote(&remote_dir);
    let command = ssh(
        &host,
        &format!("mkdir -p {} && cp /mnt/eval_* {}/", quoted, quoted),
    );
    let result = ctx.executor.execute(&command);
    if !result.success() {
        return Ok(transport_failure(&host, result.error_text()));
    }
    Ok(OpOutcome::success(json!({
        "ok": true,
        "host": host,
        "remote_dir": remote_dir,
        "command": dry_run_echo(ctx, &result.stdout),
    })))
}

/// Copy a remote run directory under `local_root/<run_id>`. Re-running is safe.
pub fn fetch(args: &FetchArgs, ctx: &OpsContext) -> OpsResult<OpOutcome> {
    require_run_id(&args.run_id)?;
    let host = ctx.settings.host(args.host.as_deref());
    let local_dir = args.local_root.join(&args.run_id);
    if !ctx.executor.dry_run() {
        ensure_dir(&local_dir)?;
    }
    let outputs = ctx.settings.outputs_dir(args.remote_outputs_dir.as_deref());
    let remote_dir = format!("{}/", remote_run_dir(&outputs, &args.run_id));
    let command = scp_recursive(&host, &remote_dir, &local_dir.display().to_string());
    let result = ctx.executor.execute(&command);
    if !result.success() {
        return Ok(transport_failure(&host, result.error_text()));
    }
    Ok(OpOutcome::success(json!({
        "ok": true,
        "host": host,
        "local_dir": local_dir.display().to_string(),
        "remote_dir": remote_dir,
        "command": dry_run_echo(ctx, &result.stdout),
    })))
}

/// The would-be command line in dry-run mode, `null` otherwise.
pub(crate) fn dry_run_echo(ctx: &OpsContext, stdout: &str) -> Value {
    if ctx.executor.dry_run() {
        Value::String(stdout.to_string())
    } else {
        Value::Null
    }
}
