//! External process execution.
//!
//! [`CommandExecutor`] is the seam between the orchestrator and the
//! operating system: the pipeline only ever asks it to run an
//! [`Invocation`] or to probe a [`ToolRequirement`]. [`ProcessExecutor`]
//! is the real implementation on top of `tokio::process`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::ExecError;
use crate::tools::{resolve_on_path, ToolRequirement};

/// Upper bound for a single `--version` style probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// A fully specified external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Executable name or path.
    pub program: String,

    /// Arguments after the executable.
    pub args: Vec<String>,

    /// Working directory.
    pub cwd: PathBuf,

    /// Extra environment variables layered over the inherited environment.
    pub env: BTreeMap<String, String>,

    /// Kill the process if it runs longer than this.
    pub timeout: Option<Duration>,
}

impl Invocation {
    /// Build an invocation from an argv-style command.
    pub fn from_command(command: &[String], cwd: &Path) -> Result<Self, ExecError> {
        let (program, args) = command.split_first().ok_or(ExecError::EmptyCommand)?;
        if program.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            cwd: cwd.to_path_buf(),
            env: BTreeMap::new(),
            timeout: None,
        })
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    /// Set the timeout; `0` disables it.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        self
    }

    /// Program and arguments as one display string.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a process that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Trait for process execution backends.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run the invocation to completion and capture its output.
    async fn execute(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError>;

    /// Check whether a tool is installed.
    async fn probe(&self, requirement: &ToolRequirement, cwd: &Path) -> bool {
        match requirement {
            ToolRequirement::OnPath { program, .. } => resolve_on_path(program).is_some(),
            ToolRequirement::Probe { command, .. } => {
                let invocation = match Invocation::from_command(command, cwd) {
                    Ok(inv) => Invocation {
                        timeout: Some(PROBE_TIMEOUT),
                        ..inv
                    },
                    Err(_) => return false,
                };
                match self.execute(&invocation).await {
                    Ok(output) => output.success(),
                    Err(e) => {
                        debug!(probe = %invocation.command_line(), error = %e, "Probe failed");
                        false
                    }
                }
            }
        }
    }
}

/// Executes invocations as child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, invocation: &Invocation) -> Result<CommandOutput, ExecError> {
        let start = Instant::now();

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ExecError::NotFound {
                    program: invocation.program.clone(),
                },
                _ => ExecError::Spawn {
                    program: invocation.program.clone(),
                    source: e,
                },
            })?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let waited = match invocation.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| ExecError::TimedOut {
                    program: invocation.program.clone(),
                    timeout,
                })?,
            None => child.wait_with_output().await,
        };

        let output = waited.map_err(|e| ExecError::Spawn {
            program: invocation.program.clone(),
            source: e,
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
