//! Host command execution.
//!
//! Every external tool bootpool drives (`zpool`, `gpart`, `sgdisk`, `mount`,
//! `cp`, ...) goes through a [`CommandRunner`], so tests can substitute a
//! recording fake and `--dry-run` can print instead of execute.

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::common::shell::render_command;
use crate::ui::prelude::*;

/// A program invocation, built up argument by argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    program: String,
    args: Vec<String>,
    mutating: bool,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            mutating: false,
        }
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

    /// Mark the command as one that changes disks or pools. Dry runs skip these.
    pub fn mutating(mut self) -> Self {
        self.mutating = true;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn is_mutating(&self) -> bool {
        self.mutating
    }

    pub fn render(&self) -> String {
        render_command(&self.program, &self.args)
    }
}

impl std::fmt::Display for HostCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    #[cfg(test)]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// One-line description of a failure, for error messages and soft-failure reports.
    pub fn describe_failure(&self) -> String {
        let code = self
            .code
            .map(|c| format!("exit code {c}"))
            .unwrap_or_else(|| "terminated by signal".to_string());
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            code
        } else {
            format!("{code}: {stderr}")
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion. Only failing to start it is an error;
    /// a non-zero exit is reported through [`CommandOutput`].
    async fn run(&self, command: HostCommand) -> Result<CommandOutput>;

    /// Run the command and fail unless it exits with status 0. Returns stdout.
    async fn run_checked(&self, command: HostCommand) -> Result<String> {
        let rendered = command.render();
        let output = self.run(command).await?;
        if !output.success() {
            anyhow::bail!("`{}` failed with {}", rendered, output.describe_failure());
        }
        Ok(output.stdout)
    }
}

/// Runs commands on the host through `duct`.
pub struct SystemRunner {
    pub dry_run: bool,
}

impl SystemRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: HostCommand) -> Result<CommandOutput> {
        if self.dry_run && command.is_mutating() {
            emit(
                Level::Info,
                "command.dry_run",
                &format!("[DRY RUN] {}", command),
                None,
            );
            return Ok(CommandOutput::ok(""));
        }

        emit(Level::Debug, "command.run", &format!("$ {}", command), None);

        let program = which::which(command.program())
            .with_context(|| format!("`{}` not found in PATH", command.program()))?;
        let args = command.get_args().to_vec();
        let rendered = command.render();

        let output = tokio::task::spawn_blocking(move || {
            duct::cmd(program, args)
                .stdout_capture()
                .stderr_capture()
                .unchecked()
                .run()
        })
        .await
        .context("command task panicked")?
        .with_context(|| format!("Failed to execute `{}`", rendered))?;

        let result = CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !result.success() {
            emit(
                Level::Debug,
                "command.failed",
                &format!("`{}` {}", rendered, result.describe_failure()),
                None,
            );
        }

        Ok(result)
    }
}
