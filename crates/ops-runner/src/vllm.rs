//! Inference-server lifecycle on the remote host: HTTP probe, tmux start, tmux stop.

use crate::artifacts::dry_run_echo;
use crate::error::OpsResult;
use crate::executor::ssh;
use crate::outcome::OpOutcome;
use crate::session_lock::{acquire_session_lock, SessionLock};
use crate::OpsContext;
use ops_core::{shell_join, shell_quote};
use serde_json::{json, Value};

pub const DEFAULT_SESSION: &str = "vllm";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VllmStatusArgs {
    pub host: Option<String>,
    pub api_base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VllmStartArgs {
    pub host: Option<String>,
    pub model_id: String,
    pub vllm_bin: String,
    pub vllm_host: String,
    pub port: u16,
    pub tensor_parallel_size: u32,
    pub pipeline_parallel_size: u32,
    pub gpu_memory_utilization: Option<f64>,
    pub max_model_len: Option<u64>,
    pub dtype: Option<String>,
    pub quantization: Option<String>,
    pub trust_remote_code: bool,
    pub session: String,
}

impl VllmStartArgs {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            host: None,
            model_id: model_id.into(),
            vllm_bin: "vllm".to_string(),
            vllm_host: "127.0.0.1".to_string(),
            port: 8000,
            tensor_parallel_size: 1,
            pipeline_parallel_size: 1,
            gpu_memory_utilization: None,
            max_model_len: None,
            dtype: Some("auto".to_string()),
            quantization: None,
            trust_remote_code: false,
            session: DEFAULT_SESSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VllmStopArgs {
    pub host: Option<String>,
    pub session: String,
}

/// Strip trailing slashes and make sure the URL ends in `/v1`.
pub fn normalize_base_url(raw: &str) -> String {
    let base = raw.trim_end_matches('/');
    if base.ends_with("/v1") {
        base.to_string()
    } else {
        format!("{}/v1", base)
    }
}

pub fn status(args: &VllmStatusArgs, ctx: &OpsContext) -> OpsResult<OpOutcome> {
    let host = ctx.settings.host(args.host.as_deref());
    let raw = args
        .api_base_url
        .as_deref()
        .unwrap_or(&ctx.settings.vllm_base_url);
    let base_url = normalize_base_url(raw);
    let command = ssh(
        &host,
        &format!("curl -sS -o /dev/null -w '%{{http_code}}' {}/models", base_url),
    );
    let result = ctx.executor.execute(&command);
    let dry_run = ctx.executor.dry_run();
    let status_code = if !dry_run && result.success() {
        result.stdout.trim().parse::<u16>().ok()
    } else {
        None
    };
    let healthy = status_code.is_some_and(|code| (200..500).contains(&code));
    let ok = dry_run || healthy;
    let error = if healthy || dry_run {
        Value::Null
    } else {
        Value::String(result.error_text())
    };
    Ok(OpOutcome::reported(
        json!({
            "ok": ok,
            "host": host,
            "base_url": base_url,
            "status_code": status_code,
            "command": dry_run_echo(ctx, &result.stdout),
            "error": error,
        }),
        ok,
    ))
}

fn server_command(args: &VllmStartArgs) -> Vec<String> {
    let mut cmd = vec![args.vllm_bin.clone()];
    if args.vllm_bin.ends_with("python") {
        cmd.push("-m".to_string());
        cmd.push("vllm.entrypoints.openai.api_server".to_string());
    } else {
        cmd.push("serve".to_string());
    }
    cmd.push(args.model_id.clone());
    let mut flag = |name: &str, value: String| {
        cmd.push(name.to_string());
        cmd.push(value);
    };
    flag("--host", args.vllm_host.clone());
    flag("--port", args.port.to_string());
    flag("--tensor-parallel-size", args.tensor_parallel_size.to_string());
    if args.pipeline_parallel_size > 1 {
        flag("--pipeline-parallel-size", args.pipeline_parallel_size.to_string());
    }
    if let Some(fraction) = args.gpu_memory_utilization {
        // `{:?}` keeps the decimal point on integral values: 1.0, not 1.
        flag("--gpu-memory-utilization", format!("{:?}", fraction));
    }
    if let Some(len) = args.max_model_len.filter(|len| *len > 0) {
        flag("--max-model-len", len.to_string());
    }
    if let Some(dtype) = args.dtype.as_deref().filter(|d| !d.is_empty()) {
        flag("--dtype", dtype.to_string());
    }
    if let Some(q) = args.quantization.as_deref().filter(|q| !q.is_empty()) {
        flag("--quantization", q.to_string());
    }
    if args.trust_remote_code {
        cmd.push("--trust-remote-code".to_string());
    }
    cmd
}

/// Reuse-or-create: a live session with this name is left alone.
pub(crate) fn tmux_reuse_or_create(session: &str, command: &str) -> String {
    let session = shell_quote(session);
    format!(
        "tmux has-session -t {} 2>/dev/null || tmux new-session -d -s {} {}",
        session,
        session,
        shell_quote(command)
    )
}

/// Lock guarding a session mutation; `None` in dry-run.
pub(crate) fn session_guard(ctx: &OpsContext, host: &str, session: &str) -> OpsResult<Option<SessionLock>> {
    if ctx.executor.dry_run() {
        return Ok(None);
    }
    acquire_session_lock(&ctx.settings.lock_dir, host, session).map(Some)
}

fn session_outcome(ctx: &OpsContext, host: &str, session: &str, result: &crate::executor::CommandOutput) -> OpOutcome {
    let ok = result.success();
    OpOutcome::reported(
        json!({
            "ok": ok,
            "host": host,
            "session": session,
            "command": dry_run_echo(ctx, &result.stdout),
            "error": if ok { Value::Null } else { Value::String(result.error_text()) },
        }),
        ok,
    )
}

pub fn start(args: &VllmStartArgs, ctx: &OpsContext) -> OpsResult<OpOutcome> {
    let host = ctx.settings.host(args.host.as_deref());
    let remote_cmd = tmux_reuse_or_create(&args.session, &shell_join(&server_command(args)));
    let _guard = session_guard(ctx, &host, &args.session)?;
    let result = ctx.executor.execute(&ssh(&host, &remote_cmd));
    Ok(session_outcome(ctx, &host, &args.session, &result))
}

pub fn stop(args: &VllmStopArgs, ctx: &OpsContext) -> OpsResult<OpOutcome> {
    let host = ctx.settings.host(args.host.as_deref());
    let remote_cmd = format!("tmux kill-session -t {}", shell_quote(&args.session));
    let _guard = session_guard(ctx, &host, &args.session)?;
    let result = ctx.executor.execute(&ssh(&host, &remote_cmd));
    Ok(session_outcome(ctx, &host, &args.session, &result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpsError;
    use crate::executor::testing::{dry, scripted};
    use crate::executor::CommandOutput;
    use crate::settings::OpsSettings;
    use ops_court::PhaseTable;
    use std::path::PathBuf;

    fn lock_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "ops_vllm_{}_{}_{}",
            tag,
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ))
    }

    #[test]
    fn base_url_normalisation() {
        assert_eq!(normalize_base_url("http://h:8000"), "http://h:8000/v1");
        assert_eq!(normalize_base_url("http://h:8000/v1/"), "http://h:8000/v1");
        assert_eq!(normalize_base_url("http://h/v1"), "http://h/v1");
    }

    #[test]
    fn status_classifies_client_errors_as_healthy() {
        for (body, expected) in [("200", true), ("404", true), ("503", false), ("000", false)] {
            let reply = body.to_string();
            let (executor, _) = scripted(move |_| CommandOutput::ok(reply.clone()));
            let settings = OpsSettings::default();
            let phases = PhaseTable::standard();
            let ctx = OpsContext::new(&executor, &settings, &phases);
            let outcome = status(&VllmStatusArgs::default(), &ctx).expect("status");
            assert_eq!(outcome.ok(), expected, "http code {}", body);
        }
    }

    #[test]
    fn status_dry_run_is_ok_without_a_code() {
        let (executor, _) = dry();
        let settings = OpsSettings::default();
        let phases = PhaseTable::standard();
        let ctx = OpsContext::new(&executor, &settings, &phases);
        let args = VllmStatusArgs {
            host: None,
            api_base_url: Some("http://10.0.0.5:9000/".into()),
        };
        let outcome = status(&args, &ctx).expect("status");
        assert!(outcome.ok());
        assert_eq!(outcome.payload["status_code"], Value::Null);
        assert_eq!(outcome.payload["base_url"], "http://10.0.0.5:9000/v1");
        assert_eq!(
            outcome.payload["command"],
            "ssh lium 'curl -sS -o /dev/null -w '\"'\"'%{http_code}'\"'\"' http://10.0.0.5:9000/v1/models'"
        );
    }

    #[test]
    fn server_command_switches_on_python_binary() {
        let mut args = VllmStartArgs::new("Qwen/Qwen2.5-7B");
        assert_eq!(
            shell_join(&server_command(&args)),
            "vllm serve Qwen/Qwen2.5-7B --host 127.0.0.1 --port 8000 --tensor-parallel-size 1 --dtype auto"
        );
        args.vllm_bin = "/opt/venv/bin/python".into();
        args.pipeline_parallel_size = 2;
        args.trust_remote_code = true;
        let cmd = server_command(&args);
        assert_eq!(&cmd[1..3], ["-m", "vllm.entrypoints.openai.api_server"]);
        assert!(cmd.contains(&"--pipeline-parallel-size".to_string()));
        assert_eq!(cmd.last().map(String::as_str), Some("--trust-remote-code"));
    }

    #[test]
    fn gpu_memory_fraction_renders_as_a_float() {
        let mut args = VllmStartArgs::new("m");
        for (fraction, rendered) in [(1.0, "1.0"), (0.9, "0.9"), (0.85, "0.85")] {
            args.gpu_memory_utilization = Some(fraction);
            let cmd = server_command(&args);
            let at = cmd
                .iter()
                .position(|a| a == "--gpu-memory-utilization")
                .expect("flag present");
            assert_eq!(cmd[at + 1], rendered);
        }
    }

    #[test]
    fn start_reuses_existing_session() {
        let (executor, _) = dry();
        let settings = OpsSettings::default();
        let phases = PhaseTable::standard();
        let ctx = OpsContext::new(&executor, &settings, &phases);
        let outcome = start(&VllmStartArgs::new("m"), &ctx).expect("start");
        let command = outcome.payload["command"].as_str().unwrap_or_default().to_string();
        assert!(command.contains("tmux has-session -t vllm 2>/dev/null || tmux new-session -d -s vllm"));
        assert_eq!(outcome.payload["session"], "vllm");
    }

    #[test]
    fn concurrent_session_mutation_is_refused_locally() {
        let dir = lock_dir("contend");
        let (executor, calls) = scripted(|_| CommandOutput::ok(""));
        let settings = OpsSettings {
            lock_dir: dir.clone(),
            ..OpsSettings::default()
        };
        let phases = PhaseTable::standard();
        let ctx = OpsContext::new(&executor, &settings, &phases);
        let held = acquire_session_lock(&dir, "lium", "vllm").expect("lock");
        let err = stop(
            &VllmStopArgs {
                host: None,
                session: "vllm".into(),
            },
            &ctx,
        )
        .expect_err("lock is held");
        assert!(matches!(err, OpsError::OperationInProgress(_)));
        assert!(calls.borrow().is_empty(), "nothing runs while the lock is held");
        drop(held);
        let outcome = stop(
            &VllmStopArgs {
                host: None,
                session: "vllm".into(),
            },
            &ctx,
        )
        .expect("stop");
        assert!(outcome.ok());
        assert_eq!(calls.borrow()[0][2], "tmux kill-session -t vllm");
        let _ = std::fs::remove_dir_all(dir);
    }
}
