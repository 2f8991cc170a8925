//! External tool invocation (`wp`, `convert`, `montage`).
//!
//! Commands are always built as a program plus an argument list and executed without a
//! shell. Every invocation logs its exit status and captured output. In dry-run mode
//! the [`DryRunRunner`] logs the equivalent command line and spawns nothing.

use std::fmt;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
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

    /// `--name=value` flag.
    pub fn flag(self, name: &str, value: impl fmt::Display) -> Self {
        self.arg(format!("--{name}={value}"))
    }
}

/// Shell-equivalent rendering, for logs and dry-run output only.
impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in &self.args {
            if a.is_empty() || a.contains(|c: char| c.is_whitespace() || "'\"$`\\;&|<>*?".contains(c)) {
                write!(f, " '{}'", a.replace('\'', r"'\''"))?;
            } else {
                write!(f, " {a}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Last non-empty stdout line; porcelain ids come last after any warnings.
    pub fn last_line(&self) -> Option<&str> {
        self.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, cmd: &ToolCommand) -> Result<CommandOutput>;

    fn is_dry_run(&self) -> bool {
        false
    }

    /// Token that interrupts retry backoff, if the runner carries one.
    fn cancel_token(&self) -> Option<&CancellationToken> {
        None
    }
}

/// Runs commands for real via `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner {
    cancel: CancellationToken,
}

impl SystemRunner {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, cmd: &ToolCommand) -> Result<CommandOutput> {
        tracing::info!(target: "process", "executing: {cmd}");
        let output = tokio::process::Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| {
                counter!("themetest_commands_total", "program" => cmd.program.clone(), "outcome" => "spawn_error")
                    .increment(1);
                PipelineError::Spawn {
                    program: cmd.program.clone(),
                    source,
                }
            })?;

        let out = CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::debug!(
            target: "process",
            program = %cmd.program,
            status = out.status,
            stdout = %out.stdout.trim(),
            stderr = %out.stderr.trim(),
            "command finished"
        );

        if output.status.success() {
            counter!("themetest_commands_total", "program" => cmd.program.clone(), "outcome" => "ok")
                .increment(1);
            Ok(out)
        } else {
            counter!("themetest_commands_total", "program" => cmd.program.clone(), "outcome" => "failed")
                .increment(1);
            tracing::warn!(
                target: "process",
                program = %cmd.program,
                status = out.status,
                stderr = %out.stderr.trim(),
                "command exited non-zero"
            );
            Err(PipelineError::CommandFailed {
                program: cmd.program.clone(),
                status: out.status,
                stderr: out.stderr.trim().to_string(),
            })
        }
    }

    fn cancel_token(&self) -> Option<&CancellationToken> {
        Some(&self.cancel)
    }
}

/// Logs what would run and records it; never spawns anything.
#[derive(Debug, Default)]
pub struct DryRunRunner {
    calls: Mutex<Vec<ToolCommand>>,
}

impl DryRunRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands seen so far, in order.
    pub fn calls(&self) -> Vec<ToolCommand> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CommandRunner for DryRunRunner {
    async fn run(&self, cmd: &ToolCommand) -> Result<CommandOutput> {
        tracing::info!(target: "process", "dry run, would execute: {cmd}");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(cmd.clone());
        }
        Ok(CommandOutput::default())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

/// Run `cmd`, retrying non-zero exits up to `retries` extra times with backoff.
/// Spawn failures are not retried.
pub async fn run_with_retry(
    runner: &dyn CommandRunner,
    cmd: &ToolCommand,
    retries: u8,
) -> Result<CommandOutput> {
    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        match runner.run(cmd).await {
            Err(PipelineError::CommandFailed { status, .. }) if attempt <= retries => {
                tracing::warn!(
                    target: "process",
                    program = %cmd.program,
                    status,
                    attempt,
                    "retrying failed command"
                );
                let backoff = Duration::from_millis(500u64 << (attempt - 1));
                match runner.cancel_token() {
                    Some(cancel) => tokio::select! {
                        _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    },
                    None => tokio::time::sleep(backoff).await,
                }
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyRunner {
        failures_left: AtomicU32,
        calls: AtomicU32,
        cancel: Option<CancellationToken>,
    }

    #[async_trait]
    impl CommandRunner for FlakyRunner {
        async fn run(&self, cmd: &ToolCommand) -> Result<CommandOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(PipelineError::CommandFailed {
                    program: cmd.program.clone(),
                    status: 1,
                    stderr: "Error: database connection".into(),
                });
            }
            Ok(CommandOutput {
                status: 0,
                stdout: "42\n".into(),
                stderr: String::new(),
            })
        }

        fn cancel_token(&self) -> Option<&CancellationToken> {
            self.cancel.as_ref()
        }
    }

    #[test]
    fn display_quotes_only_when_needed() {
        let cmd = ToolCommand::new("wp")
            .flag("path", "/var/www/astra01")
            .args(["core", "install"])
            .flag("title", "Your Blog Title")
            .arg("it's");
        assert_eq!(
            cmd.to_string(),
            r#"wp --path=/var/www/astra01 core install '--title=Your Blog Title' 'it'\''s'"#
        );
    }

    #[test]
    fn last_line_skips_warnings_and_blank_lines() {
        let out = CommandOutput {
            status: 0,
            stdout: "Warning: something\n1234\n\n".into(),
            stderr: String::new(),
        };
        assert_eq!(out.last_line(), Some("1234"));
    }

    #[tokio::test]
    async fn one_retry_recovers_a_single_failure() {
        let r = FlakyRunner {
            failures_left: AtomicU32::new(1),
            calls: AtomicU32::new(0),
            cancel: None,
        };
        let out = run_with_retry(&r, &ToolCommand::new("wp"), 1).await.unwrap();
        assert_eq!(out.last_line(), Some("42"));
        assert_eq!(r.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_one_retry() {
        let r = FlakyRunner {
            failures_left: AtomicU32::new(5),
            calls: AtomicU32::new(0),
            cancel: None,
        };
        let err = run_with_retry(&r, &ToolCommand::new("wp"), 1).await.unwrap_err();
        assert!(matches!(err, PipelineError::CommandFailed { .. }));
        assert_eq!(r.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cancellation_cuts_the_backoff_short() {
        let cancel = CancellationToken::new();
        let r = FlakyRunner {
            failures_left: AtomicU32::new(5),
            calls: AtomicU32::new(0),
            cancel: Some(cancel.clone()),
        };
        cancel.cancel();
        let err = run_with_retry(&r, &ToolCommand::new("wp"), 3).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(r.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dry_run_records_without_spawning() {
        let r = DryRunRunner::new();
        let cmd = ToolCommand::new("definitely-not-a-real-binary").arg("x");
        let out = r.run(&cmd).await.unwrap();
        assert_eq!(out.status, 0);
        assert_eq!(r.calls(), vec![cmd]);
    }
}
