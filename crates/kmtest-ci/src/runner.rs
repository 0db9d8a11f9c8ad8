//! External command execution.
//!
//! Every stage reduces to one or more [`Invocation`]s handed to a
//! [`CommandRunner`]. The production runner is [`ProcessRunner`]; tests use
//! [`crate::fakes::RecordingRunner`].

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::env::EnvOverlay;
use crate::error::{HarnessError, HarnessResult};
use crate::stage::Stage;

/// A single external command: program, arguments, working directory and
/// environment overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invocation {
    /// Executable to run.
    pub program: String,

    /// Arguments, in order.
    pub args: Vec<String>,

    /// Working directory (caller's current directory when `None`).
    pub cwd: Option<PathBuf>,

    /// Variables layered over the ambient environment for this call only.
    pub env: EnvOverlay,

    /// Pipeline stage the command belongs to, for logs.
    pub stage: Option<Stage>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: EnvOverlay::new(),
            stage: None,
        }
    }

    /// Build from a `[program, args...]` vector as stored in configuration.
    pub fn from_command_line(command: &[String]) -> HarnessResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| HarnessError::Config("empty command line".to_string()))?;
        Ok(Self::new(program.clone()).args(args.iter().cloned()))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn for_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.set(key, value);
        self
    }

    pub fn envs(mut self, overlay: &EnvOverlay) -> Self {
        self.env.merge(overlay);
        self
    }

    /// Whether `arg` appears verbatim in the argument list.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", quote(arg))?;
        }
        Ok(())
    }
}

fn quote(word: &str) -> String {
    if !word.is_empty() && !word.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"') {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

/// Executes invocations. Implementations must fail on non-zero exit.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the invocation to completion.
    async fn run(&self, invocation: &Invocation) -> HarnessResult<()>;
}

/// Runs invocations as real child processes with inherited stdio.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
    echo: bool,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill and fail any command that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Log every command line before running it.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> HarnessResult<()> {
        let command_line = invocation.to_string();
        let stage = invocation.stage.map(|s| s.name()).unwrap_or("-");
        if self.echo {
            info!(stage, command = %command_line, "+ [running]");
        }
        debug!(
            command = %command_line,
            cwd = ?invocation.cwd,
            env = ?invocation.env,
            "spawning child process"
        );

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(
                invocation
                    .env
                    .iter()
                    .map(|(k, v)| (OsStr::new(k), OsStr::new(v))),
            )
            .kill_on_drop(true);
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| HarnessError::Spawn {
            command: command_line.clone(),
            source,
        })?;

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status?,
                Err(_elapsed) => {
                    child.kill().await.ok();
                    return Err(HarnessError::CommandTimedOut {
                        command: command_line,
                        timeout_secs: limit.as_secs(),
                    });
                }
            },
            None => child.wait().await?,
        };

        if status.success() {
            Ok(())
        } else {
            Err(HarnessError::CommandFailed {
                command: command_line,
                exit_code: status.code(),
            })
        }
    }
}
