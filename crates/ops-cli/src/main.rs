use clap::{Args, Parser, Subcommand, ValueEnum};
use ops_court::PhaseTable;
use ops_runner::flow::{CourtArgs, EvidenceExtras, FlowRecordArgs, FlowStartArgs};
use ops_runner::{artifacts, local_runs, pod, runs, sweep, vllm};
use ops_runner::{dispatch, Executor, Operation, OpsContext, OpsSettings};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ops", version, about = "Remote training-run operations and phase compliance")]
struct Cli {
    /// Print the commands that would run instead of running them.
    #[arg(long, global = true)]
    dry_run: bool,
    /// Pretty-printed JSON (default).
    #[arg(long, global = true, overrides_with = "json")]
    pretty: bool,
    /// Compact single-line JSON.
    #[arg(long, global = true, overrides_with = "pretty")]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(subcommand)]
    Artifacts(ArtifactsCommand),
    #[command(subcommand)]
    Pod(PodCommand),
    #[command(subcommand)]
    Vllm(VllmCommand),
    #[command(subcommand)]
    Runs(RunsCommand),
    /// Check fetched run directories for the required artifact set.
    Validate {
        #[arg(long, default_value = local_runs::DEFAULT_ROOT)]
        root: PathBuf,
    },
    /// Tabulate per-run metrics from fetched summaries.
    Report {
        #[arg(long, default_value = local_runs::DEFAULT_ROOT)]
        root: PathBuf,
    },
    #[command(subcommand)]
    Sweep(SweepCommand),
    /// Adjudicate one phase's evidence and write the verdict.
    Court {
        #[arg(long)]
        evidence: PathBuf,
        #[arg(long)]
        phase: String,
        #[arg(long)]
        output: PathBuf,
    },
    #[command(subcommand)]
    Flow(FlowCommand),
}

#[derive(Subcommand)]
enum ArtifactsCommand {
    Archive {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        remote_outputs_dir: Option<String>,
    },
    Fetch {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        remote_outputs_dir: Option<String>,
        #[arg(long, default_value = artifacts::DEFAULT_LOCAL_ROOT)]
        local_root: PathBuf,
    },
}

#[derive(Subcommand)]
enum PodCommand {
    Status {
        #[arg(long)]
        host: Option<String>,
    },
}

#[derive(Subcommand)]
enum VllmCommand {
    Status {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        api_base_url: Option<String>,
    },
    Start(VllmStartCli),
    Stop {
        #[arg(long)]
        host: Option<String>,
        #[arg(long, default_value = vllm::DEFAULT_SESSION)]
        session: String,
    },
}

#[derive(Args)]
struct VllmStartCli {
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    model_id: String,
    #[arg(long, default_value = "vllm")]
    vllm_bin: String,
    #[arg(long, default_value = "127.0.0.1")]
    vllm_host: String,
    #[arg(long, default_value_t = 8000)]
    port: u16,
    #[arg(long, default_value_t = 1)]
    tensor_parallel_size: u32,
    #[arg(long, default_value_t = 1)]
    pipeline_parallel_size: u32,
    #[arg(long)]
    gpu_memory_utilization: Option<f64>,
    #[arg(long)]
    max_model_len: Option<u64>,
    #[arg(long, default_value = "auto")]
    dtype: String,
    #[arg(long)]
    quantization: Option<String>,
    #[arg(long)]
    trust_remote_code: bool,
    #[arg(long, default_value = vllm::DEFAULT_SESSION)]
    session: String,
}

impl From<VllmStartCli> for vllm::VllmStartArgs {
    fn from(cli: VllmStartCli) -> Self {
        Self {
            host: cli.host,
            model_id: cli.model_id,
            vllm_bin: cli.vllm_bin,
            vllm_host: cli.vllm_host,
            port: cli.port,
            tensor_parallel_size: cli.tensor_parallel_size,
            pipeline_parallel_size: cli.pipeline_parallel_size,
            gpu_memory_utilization: cli.gpu_memory_utilization,
            max_model_len: cli.max_model_len,
            dtype: Some(cli.dtype),
            quantization: cli.quantization,
            trust_remote_code: cli.trust_remote_code,
            session: cli.session,
        }
    }
}

#[derive(Subcommand)]
enum RunsCommand {
    Submit {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        remote_repo: Option<String>,
        #[arg(long)]
        remote_outputs_dir: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        no_tmux: bool,
    },
    Status {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        run_id: String,
        #[arg(long)]
        remote_outputs_dir: Option<String>,
        #[arg(long, default_value_t = runs::DEFAULT_TAIL_LINES)]
        tail_lines: u32,
    },
}

#[derive(Subcommand)]
enum SweepCommand {
    Status {
        #[arg(long)]
        csv: Option<PathBuf>,
        #[arg(long)]
        out_root: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TeardownArg {
    Keep,
    Delete,
}

impl TeardownArg {
    fn as_str(self) -> &'static str {
        match self {
            TeardownArg::Keep => "keep",
            TeardownArg::Delete => "delete",
        }
    }
}

#[derive(Args)]
struct ExtrasCli {
    #[arg(long)]
    lium_target: Option<String>,
    #[arg(long)]
    ops_default_host: Option<String>,
    #[arg(long)]
    repo_url: Option<String>,
    #[arg(long)]
    transport_hint: Option<String>,
}

impl From<ExtrasCli> for EvidenceExtras {
    fn from(cli: ExtrasCli) -> Self {
        Self {
            lium_target: cli.lium_target,
            ops_default_host: cli.ops_default_host,
            repo_url: cli.repo_url,
            transport_hint: cli.transport_hint,
        }
    }
}

#[derive(Subcommand)]
enum FlowCommand {
    /// Hash the active config and write the P00 evidence and flow-start snapshot.
    Start {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        flow_start: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        flow_id: Option<String>,
        #[arg(long, default_value = ops_runner::flow::FLOW_START_COMMAND)]
        command_name: String,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        command_rc: i64,
        #[command(flatten)]
        extras: ExtrasCli,
    },
    /// Write one phase's evidence against an existing flow.
    Record {
        #[arg(long)]
        phase: String,
        #[arg(long)]
        flow_start: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        command_name: String,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        command_rc: i64,
        #[arg(long, default_value = "ok")]
        phase_status: String,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum)]
        teardown_mode: Option<TeardownArg>,
        #[command(flatten)]
        extras: ExtrasCli,
    },
}

fn into_operation(command: Commands) -> Operation {
    match command {
        Commands::Artifacts(ArtifactsCommand::Archive {
            host,
            run_id,
            remote_outputs_dir,
        }) => Operation::ArtifactsArchive(artifacts::ArchiveArgs {
            host,
            run_id,
            remote_outputs_dir,
        }),
        Commands::Artifacts(ArtifactsCommand::Fetch {
            host,
            run_id,
            remote_outputs_dir,
            local_root,
        }) => Operation::ArtifactsFetch(artifacts::FetchArgs {
            host,
            run_id,
            remote_outputs_dir,
            local_root,
        }),
        Commands::Pod(PodCommand::Status { host }) => {
            Operation::PodStatus(pod::PodStatusArgs { host })
        }
        Commands::Vllm(VllmCommand::Status { host, api_base_url }) => {
            Operation::VllmStatus(vllm::VllmStatusArgs { host, api_base_url })
        }
        Commands::Vllm(VllmCommand::Start(start)) => Operation::VllmStart(start.into()),
        Commands::Vllm(VllmCommand::Stop { host, session }) => {
            Operation::VllmStop(vllm::VllmStopArgs { host, session })
        }
        Commands::Runs(RunsCommand::Submit {
            host,
            config,
            remote_repo,
            remote_outputs_dir,
            force,
            no_tmux,
        }) => Operation::RunsSubmit(runs::SubmitArgs {
            host,
            config,
            remote_repo,
            remote_outputs_dir,
            force,
            no_tmux,
        }),
        Commands::Runs(RunsCommand::Status {
            host,
            run_id,
            remote_outputs_dir,
            tail_lines,
        }) => Operation::RunsStatus(runs::StatusArgs {
            host,
            run_id,
            remote_outputs_dir,
            tail_lines,
        }),
        Commands::Validate { root } => Operation::Validate(local_runs::LocalRootArgs { root }),
        Commands::Report { root } => Operation::Report(local_runs::LocalRootArgs { root }),
        Commands::Sweep(SweepCommand::Status { csv, out_root }) => {
            Operation::SweepStatus(sweep::SweepStatusArgs { csv, out_root })
        }
        Commands::Court {
            evidence,
            phase,
            output,
        } => Operation::Court(CourtArgs {
            evidence,
            phase,
            output,
        }),
        Commands::Flow(FlowCommand::Start {
            config,
            flow_start,
            out,
            flow_id,
            command_name,
            command_rc,
            extras,
        }) => Operation::FlowStart(FlowStartArgs {
            config,
            flow_start,
            out,
            flow_id,
            command_name,
            command_rc,
            extras: extras.into(),
        }),
        Commands::Flow(FlowCommand::Record {
            phase,
            flow_start,
            out,
            command_name,
            command_rc,
            phase_status,
            config,
            teardown_mode,
            extras,
        }) => Operation::FlowRecord(FlowRecordArgs {
            phase,
            flow_start,
            out,
            command_name,
            command_rc,
            phase_status,
            config,
            teardown_mode: teardown_mode.map(|m| m.as_str().to_string()),
            extras: extras.into(),
        }),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn emit_json(value: &Value, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match rendered {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":\"failed to serialize JSON payload\",\"code\":\"serialization_error\"}}"
        ),
    }
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let pretty = cli.pretty || !cli.json;
    let settings = OpsSettings::from_env();
    let phases = PhaseTable::standard();
    let executor = Executor::process(cli.dry_run);
    let ctx = OpsContext::new(&executor, &settings, &phases);
    let op = into_operation(cli.command);
    let outcome = dispatch(&op, &ctx);
    tracing::debug!(operation = op.name(), exit_code = outcome.exit_code, "finished");
    emit_json(&outcome.payload, pretty);
    std::process::exit(outcome.exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ops").chain(args.iter().copied())).expect("parse")
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_apply_after_the_subcommand() {
        let cli = parse(&["artifacts", "fetch", "--run-id", "r1", "--dry-run", "--json"]);
        assert!(cli.dry_run);
        assert!(cli.json);
        match into_operation(cli.command) {
            Operation::ArtifactsFetch(args) => {
                assert_eq!(args.local_root, PathBuf::from("artifacts/pod_logs"));
                assert_eq!(args.run_id, "r1");
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn pretty_and_json_override_each_other() {
        let cli = parse(&["--json", "--pretty", "validate"]);
        assert!(!cli.json);
        let cli = parse(&["--pretty", "--json", "validate"]);
        assert!(cli.json);
    }

    #[test]
    fn vllm_start_defaults_match_the_server_defaults() {
        let cli = parse(&["vllm", "start", "--model-id", "m"]);
        match into_operation(cli.command) {
            Operation::VllmStart(args) => assert_eq!(args, vllm::VllmStartArgs::new("m")),
            other => panic!("unexpected operation {:?}", other),
        }
    }

    #[test]
    fn flow_record_accepts_teardown_mode_and_negative_rc() {
        let cli = parse(&[
            "flow",
            "record",
            "--phase",
            "P90",
            "--flow-start",
            "fs.json",
            "--out",
            "P90.json",
            "--command-name",
            "pod-delete",
            "--command-rc",
            "-1",
            "--teardown-mode",
            "keep",
        ]);
        match into_operation(cli.command) {
            Operation::FlowRecord(args) => {
                assert_eq!(args.command_rc, -1);
                assert_eq!(args.teardown_mode.as_deref(), Some("keep"));
                assert_eq!(args.phase_status, "ok");
            }
            other => panic!("unexpected operation {:?}", other),
        }
        assert!(Cli::try_parse_from(["ops", "flow", "record", "--teardown-mode", "nuke"]).is_err());
    }

    #[test]
    fn missing_required_flag_is_a_usage_error() {
        let err = Cli::try_parse_from(["ops", "runs", "status"])
            .err()
            .expect("run id is required");
        assert_eq!(err.exit_code(), 2);
    }
}
