//! Ops surface for remote training runs.
//!
//! Every subcommand is one [`Operation`] variant with a typed argument struct.
//! [`dispatch`] runs it against an [`OpsContext`] and always yields one JSON
//! payload plus an exit code: 0 success, 1 reported failure, 2 precondition.

pub mod artifacts;
pub mod error;
pub mod executor;
pub mod flow;
pub mod local_runs;
mod outcome;
pub mod pod;
pub mod run_contract;
pub mod runs;
pub mod session_lock;
pub mod settings;
pub mod sweep;
pub mod vllm;

pub use error::{OpsError, OpsResult};
pub use executor::{CommandOutput, CommandRunner, Executor, ProcessRunner};
pub use outcome::OpOutcome;
pub use run_contract::{RunContractWriter, RunMetadata, RunSummary, RUN_CONTRACT_VERSION};
pub use settings::OpsSettings;

use ops_court::PhaseTable;
use tracing::debug;

/// Everything an operation may touch, resolved once at startup.
pub struct OpsContext<'a> {
    pub executor: &'a Executor,
    pub settings: &'a OpsSettings,
    pub phases: &'a PhaseTable,
}

impl<'a> OpsContext<'a> {
    pub fn new(executor: &'a Executor, settings: &'a OpsSettings, phases: &'a PhaseTable) -> Self {
        Self {
            executor,
            settings,
            phases,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    ArtifactsArchive(artifacts::ArchiveArgs),
    ArtifactsFetch(artifacts::FetchArgs),
    PodStatus(pod::PodStatusArgs),
    VllmStatus(vllm::VllmStatusArgs),
    VllmStart(vllm::VllmStartArgs),
    VllmStop(vllm::VllmStopArgs),
    RunsSubmit(runs::SubmitArgs),
    RunsStatus(runs::StatusArgs),
    Validate(local_runs::LocalRootArgs),
    Report(local_runs::LocalRootArgs),
    SweepStatus(sweep::SweepStatusArgs),
    Court(flow::CourtArgs),
    FlowStart(flow::FlowStartArgs),
    FlowRecord(flow::FlowRecordArgs),
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ArtifactsArchive(_) => "artifacts archive",
            Operation::ArtifactsFetch(_) => "artifacts fetch",
            Operation::PodStatus(_) => "pod status",
            Operation::VllmStatus(_) => "vllm status",
            Operation::VllmStart(_) => "vllm start",
            Operation::VllmStop(_) => "vllm stop",
            Operation::RunsSubmit(_) => "runs submit",
            Operation::RunsStatus(_) => "runs status",
            Operation::Validate(_) => "validate",
            Operation::Report(_) => "report",
            Operation::SweepStatus(_) => "sweep status",
            Operation::Court(_) => "court",
            Operation::FlowStart(_) => "flow start",
            Operation::FlowRecord(_) => "flow record",
        }
    }
}

pub fn dispatch(op: &Operation, ctx: &OpsContext) -> OpOutcome {
    debug!(operation = op.name(), dry_run = ctx.executor.dry_run(), "dispatch");
    let result = match op {
        Operation::ArtifactsArchive(args) => artifacts::archive(args, ctx),
        Operation::ArtifactsFetch(args) => artifacts::fetch(args, ctx),
        Operation::PodStatus(args) => pod::status(args, ctx),
        Operation::VllmStatus(args) => vllm::status(args, ctx),
        Operation::VllmStart(args) => vllm::start(args, ctx),
        Operation::VllmStop(args) => vllm::stop(args, ctx),
        Operation::RunsSubmit(args) => runs::submit(args, ctx),
        Operation::RunsStatus(args) => runs::status(args, ctx),
        Operation::Validate(args) => local_runs::validate(args),
        Operation::Report(args) => local_runs::report(args),
        Operation::SweepStatus(args) => sweep::sweep_status(args, ctx),
        Operation::Court(args) => flow::court(args, ctx),
        Operation::FlowStart(args) => flow::start(args, ctx),
        Operation::FlowRecord(args) => flow::record(args, ctx),
    };
    result.unwrap_or_else(|err| {
        tracing::warn!(operation = op.name(), code = err.code(), "{}", err);
        OpOutcome::from_error(&err)
    })
}
