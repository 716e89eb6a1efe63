//! Remote command execution with a dry-run mode.
//!
//! Every remote operation goes through [`Executor::execute`]. In dry-run mode nothing
//! is spawned: the shell-quoted command line comes back as `stdout` with return
//! code 0, so operations can be exercised without a live target.

use ops_core::shell_join;
use std::process::{Command, Stdio};
use tracing::debug;

/// Return code reported when the program could not be started at all.
pub const SPAWN_FAILURE_RC: i32 = 127;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub returncode: i32,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            returncode: 0,
        }
    }

    pub fn failed(returncode: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            returncode,
        }
    }

    pub fn success(&self) -> bool {
        self.returncode == 0
    }

    /// Stderr when the command wrote any, stdout otherwise.
    pub fn error_text(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            self.stderr.clone()
        }
    }
}

/// Transport seam. Implementations must not panic or error on non-zero exits.
pub trait CommandRunner {
    fn run(&self, argv: &[String]) -> CommandOutput;
}

/// Runs argv as a local child process (`ssh`, `scp`, `lium`, ...).
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, argv: &[String]) -> CommandOutput {
        let Some((program, args)) = argv.split_first() else {
            return CommandOutput::failed(SPAWN_FAILURE_RC, "empty command");
        };
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();
        match output {
            Ok(output) => CommandOutput {
                stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
                returncode: output.status.code().unwrap_or(-1),
            },
            Err(e) => CommandOutput::failed(
                SPAWN_FAILURE_RC,
                format!("failed to start {}: {}", program, e),
            ),
        }
    }
}

pub struct Executor {
    runner: Box<dyn CommandRunner>,
    dry_run: bool,
}

impl Executor {
    pub fn new(runner: Box<dyn CommandRunner>, dry_run: bool) -> Self {
        Self { runner, dry_run }
    }

    pub fn process(dry_run: bool) -> Self {
        Self::new(Box::new(ProcessRunner), dry_run)
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn execute(&self, argv: &[String]) -> CommandOutput {
        let rendered = shell_join(argv);
        if self.dry_run {
            debug!(command = %rendered, "dry-run");
            return CommandOutput::ok(rendered);
        }
        debug!(command = %rendered, "executing");
        let output = self.runner.run(argv);
        debug!(returncode = output.returncode, "command finished");
        output
    }
}

pub fn ssh(host: &str, remote_cmd: &str) -> Vec<String> {
    vec!["ssh".to_string(), host.to_string(), remote_cmd.to_string()]
}

/// Recursive copy of `host:remote_path` into `local_path`.
pub fn scp_recursive(host: &str, remote_path: &str, local_path: &str) -> Vec<String> {
    vec![
        "scp".to_string(),
        "-r".to_string(),
        format!("{}:{}", host, remote_path),
        local_path.to_string(),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    pub(crate) type CallLog = Rc<RefCell<Vec<Vec<String>>>>;

    /// Records every argv and answers with a caller-supplied function.
    pub(crate) struct ScriptedRunner {
        calls: CallLog,
        respond: Box<dyn Fn(&[String]) -> CommandOutput>,
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&self, argv: &[String]) -> CommandOutput {
            self.calls.borrow_mut().push(argv.to_vec());
            (self.respond)(argv)
        }
    }

    pub(crate) fn scripted<F>(respond: F) -> (Executor, CallLog)
    where
        F: Fn(&[String]) -> CommandOutput + 'static,
    {
        let calls: CallLog = Rc::new(RefCell::new(Vec::new()));
        let runner = ScriptedRunner {
            calls: calls.clone(),
            respond: Box::new(respond),
        };
        (Executor::new(Box::new(runner), false), calls)
    }

    /// Dry-run executor whose runner fails the test if it is ever reached.
    pub(crate) fn dry() -> (Executor, CallLog) {
        let calls: CallLog = Rc::new(RefCell::new(Vec::new()));
        let runner = ScriptedRunner {
            calls: calls.clone(),
            respond: Box::new(|argv: &[String]| -> CommandOutput {
                panic!("dry-run reached the transport: {:?}", argv)
            }),
        };
        (Executor::new(Box::new(runner), true), calls)
    }
}
