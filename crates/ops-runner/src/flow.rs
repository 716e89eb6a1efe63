//! Phase-executor side of the compliance loop: write evidence, then adjudicate it.

use crate::error::{OpsError, OpsResult};
use crate::outcome::OpOutcome;
use crate::OpsContext;
use ops_court::evidence::load_object;
use ops_court::{
    adjudicate, write_evidence, FlowIdentity, PhaseCourt, PhaseEvidence, PhaseId, TeardownMode,
    Verdict,
};
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const DEFAULT_TRANSPORT_HINT: &str = "ssh";
pub const FLOW_START_COMMAND: &str = "flow-precheck";

/// Optional target/repo fields shared by `flow start` and `flow record`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidenceExtras {
    pub lium_target: Option<String>,
    pub ops_default_host: Option<String>,
    pub repo_url: Option<String>,
    pub transport_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStartArgs {
    pub config: PathBuf,
    pub flow_start: PathBuf,
    pub out: PathBuf,
    pub flow_id: Option<String>,
    pub command_name: String,
    pub command_rc: i64,
    pub extras: EvidenceExtras,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRecordArgs {
    pub phase: String,
    pub flow_start: PathBuf,
    pub out: PathBuf,
    pub command_name: String,
    pub command_rc: i64,
    pub phase_status: String,
    pub config: Option<PathBuf>,
    pub teardown_mode: Option<String>,
    pub extras: EvidenceExtras,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourtArgs {
    pub evidence: PathBuf,
    pub phase: String,
    pub output: PathBuf,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn apply_extras(evidence: &mut PhaseEvidence, extras: &EvidenceExtras) {
    evidence.lium_target = non_empty(&extras.lium_target);
    evidence.ops_default_host = non_empty(&extras.ops_default_host);
    evidence.repo_url = non_empty(&extras.repo_url);
    if let Some(hint) = non_empty(&extras.transport_hint) {
        evidence.transport_hint = hint;
    }
}

fn refuse_existing(paths: &[&Path]) -> OpsResult<()> {
    for path in paths {
        if path.exists() {
            return Err(OpsError::precondition(format!(
                "evidence is append-only; {} already exists",
                path.display()
            )));
        }
    }
    Ok(())
}

fn identity_from_config(config: &Path, flow_id: Option<String>) -> OpsResult<FlowIdentity> {
    FlowIdentity::from_config(config, flow_id).map_err(|e| {
        OpsError::precondition(format!("cannot hash active config {}: {}", config.display(), e))
    })
}

fn store(ctx: &OpsContext, path: &Path, evidence: &PhaseEvidence) -> OpsResult<bool> {
    if ctx.executor.dry_run() {
        return Ok(false);
    }
    write_evidence(path, evidence)?;
    Ok(true)
}

fn evidence_outcome(evidence: &PhaseEvidence, out: &Path, written: bool) -> OpsResult<Value> {
    Ok(json!({
        "ok": true,
        "flow_id": evidence.flow_id,
        "phase": evidence.phase_id.as_str(),
        "evidence_path": out.display().to_string(),
        "written": written,
        "evidence": serde_json::to_value(evidence).map_err(anyhow::Error::from)?,
    }))
}

/// Open a flow: the P00 evidence doubles as the immutable flow-start snapshot.
pub fn start(args: &FlowStartArgs, ctx: &OpsContext) -> OpsResult<OpOutcome> {
    refuse_existing(&[args.out.as_path(), args.flow_start.as_path()])?;
    let flow = identity_from_config(&args.config, non_empty(&args.flow_id))?;
    let mut evidence = PhaseEvidence::for_phase(
        ctx.phases,
        PhaseId::P00,
        &flow,
        &args.flow_start,
        &args.command_name,
    )?;
    evidence.command_rc = args.command_rc;
    apply_extras(&mut evidence, &args.extras);
    let written = store(ctx, &args.flow_start, &evidence)?;
    if written {
        if let Err(err) = store(ctx, &args.out, &evidence) {
            // The snapshot alone would make every retry look like a second start.
            if let Err(cleanup) = fs::remove_file(&args.flow_start) {
                warn!(path = %args.flow_start.display(), error = %cleanup, "could not roll back flow-start snapshot");
            }
            return Err(err);
        }
    }
    info!(flow_id = %flow.flow_id, written, "flow started");
    let mut payload = evidence_outcome(&evidence, &args.out, written)?;
    payload["flow_start"] = Value::String(args.flow_start.display().to_string());
    Ok(OpOutcome::success(payload))
}

/// Record one phase's evidence against an existing flow-start snapshot.
pub fn record(args: &FlowRecordArgs, ctx: &OpsContext) -> OpsResult<OpOutcome> {
    let phase: PhaseId = args.phase.parse().map_err(OpsError::Precondition)?;
    let teardown_mode = match non_empty(&args.teardown_mode) {
        None => None,
        Some(raw) => Some(TeardownMode::parse(&raw).ok_or_else(|| {
            OpsError::precondition(format!("teardown mode must be keep or delete, got {}", raw))
        })?),
    };
    refuse_existing(&[args.out.as_path()])?;
    let snapshot = load_object(&args.flow_start).map_err(|e| {
        OpsError::precondition(format!("unreadable flow-start snapshot: {:#}", e))
    })?;
    let recorded = FlowIdentity::from_snapshot(&snapshot).map_err(|e| OpsError::precondition(e.to_string()))?;
    let flow = match &args.config {
        Some(config) => identity_from_config(config, Some(recorded.flow_id))?,
        None => recorded,
    };
    let mut evidence =
        PhaseEvidence::for_phase(ctx.phases, phase, &flow, &args.flow_start, &args.command_name)?;
    evidence.command_rc = args.command_rc;
    evidence.phase_status = args.phase_status.clone();
    evidence.teardown_mode = teardown_mode;
    apply_extras(&mut evidence, &args.extras);
    let written = store(ctx, &args.out, &evidence)?;
    info!(flow_id = %flow.flow_id, phase = %phase, written, "phase evidence recorded");
    Ok(OpOutcome::success(evidence_outcome(&evidence, &args.out, written)?))
}

/// Adjudicate one evidence file. Exits 0 whenever a verdict was produced.
pub fn court(args: &CourtArgs, ctx: &OpsContext) -> OpsResult<OpOutcome> {
    let verdict = if ctx.executor.dry_run() {
        let assessment = PhaseCourt::new(ctx.phases).assess_file(&args.evidence, &args.phase);
        Verdict::from_assessment(&args.phase, &assessment, &args.evidence)
    } else {
        adjudicate(ctx.phases, &args.evidence, &args.phase, &args.output)?
    };
    let payload = serde_json::to_value(&verdict).map_err(anyhow::Error::from)?;
    Ok(OpOutcome::success(payload))
}
