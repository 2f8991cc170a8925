// src/benchmark/mod.rs
//! Remote performance benchmarks: submit a URL, poll until terminal, keep the result.

pub mod client;
pub mod store;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio_util::sync::CancellationToken;

pub use client::{BenchmarkApi, DryRunBenchmark, GtmetrixClient, DRY_RUN_ID};
pub use store::ResultStore;
pub use types::{BenchmarkMetrics, BenchmarkResources, BenchmarkResult, RunHandle, RunState, TestStatus};

use crate::catalog::types::CatalogEntry;
use crate::config::BenchmarkSettings;
use crate::error::{PipelineError, Result};

/// Fixed-interval polling with an overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollPolicy {
    pub fn from_settings(s: &BenchmarkSettings) -> Self {
        Self {
            interval: Duration::from_secs(s.poll_interval_secs),
            timeout: Duration::from_secs(s.poll_timeout_secs),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(6),
            timeout: Duration::from_secs(900),
        }
    }
}

/// One status check.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending(RunState),
    Terminal(TestStatus),
}

/// Final status plus how many interval waits it took to get there.
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub status: TestStatus,
    pub waits: u32,
}

pub struct BenchmarkRunner {
    api: Arc<dyn BenchmarkApi>,
    store: ResultStore,
    images_dir: PathBuf,
    policy: PollPolicy,
    courtesy_delay: Duration,
    cancel: CancellationToken,
}

impl BenchmarkRunner {
    pub fn new(
        api: Arc<dyn BenchmarkApi>,
        store: ResultStore,
        images_dir: impl Into<PathBuf>,
        policy: PollPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            store,
            images_dir: images_dir.into(),
            policy,
            courtesy_delay: Duration::ZERO,
            cancel,
        }
    }

    /// Pause after each completed (non-dry) run.
    pub fn with_courtesy_delay(mut self, delay: Duration) -> Self {
        self.courtesy_delay = delay;
        self
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn screenshot_path(&self, slug: &str) -> PathBuf {
        self.images_dir.join(format!("{slug}-ss.png"))
    }

    pub async fn submit(&self, target_url: &str) -> Result<RunHandle> {
        counter!("themetest_benchmarks_total", "outcome" => "submitted").increment(1);
        self.api.submit(target_url).await
    }

    pub async fn poll(&self, handle: &RunHandle) -> Result<PollOutcome> {
        counter!("themetest_polls_total").increment(1);
        let status = self.api.status(handle).await?;
        tracing::debug!(run_id = %handle.run_id, state = %status.state, "polled");
        Ok(if status.state.is_terminal() {
            PollOutcome::Terminal(status)
        } else {
            PollOutcome::Pending(status.state)
        })
    }

    /// Poll until terminal. Exactly one interval wait follows each non-terminal state;
    /// a wait that would cross the deadline ends the loop with [`PipelineError::PollTimeout`].
    pub async fn wait_for_completion(&self, handle: &RunHandle) -> Result<PollReport> {
        let started = tokio::time::Instant::now();
        let deadline = started + self.policy.timeout;
        let mut waits = 0u32;
        loop {
            let state = match self.poll(handle).await? {
                PollOutcome::Terminal(status) => {
                    tracing::info!(run_id = %handle.run_id, state = %status.state, waits, "benchmark finished");
                    return Ok(PollReport { status, waits });
                }
                PollOutcome::Pending(state) => state,
            };
            if tokio::time::Instant::now() + self.policy.interval > deadline {
                return Err(PipelineError::PollTimeout {
                    run_id: handle.run_id.clone(),
                    last_state: state,
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(self.policy.interval) => {}
            }
            waits += 1;
        }
    }

    /// Full run for one theme: submit, poll, persist, then fetch the screenshot.
    pub async fn run(&self, theme: &CatalogEntry, target_url: &str) -> Result<BenchmarkResult> {
        let handle = self.submit(target_url).await?;
        let report = self.wait_for_completion(&handle).await?;
        let status = report.status;

        if self.api.is_dry_run() {
            tracing::info!(slug = %theme.slug, "dry run, result not stored");
        } else {
            self.store.save(&theme.instance_name(), &status)?;
        }

        if status.state == RunState::Error {
            counter!("themetest_benchmarks_total", "outcome" => "error").increment(1);
            return Err(PipelineError::BenchmarkFailed {
                run_id: handle.run_id,
                message: status
                    .error
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "unknown error".into()),
            });
        }
        counter!("themetest_benchmarks_total", "outcome" => "completed").increment(1);

        if !self.api.is_dry_run() {
            if let Some(url) = status.resources.screenshot.as_deref() {
                self.api.download(url, &self.screenshot_path(&theme.slug)).await?;
            }
            self.courtesy_pause().await?;
        }
        Ok(BenchmarkResult::from_status(&theme.slug, Some(handle.run_id), status))
    }

    /// In readonly mode the stored result is used and the vendor is never contacted.
    pub async fn fetch_result(
        &self,
        theme: &CatalogEntry,
        target_url: &str,
        readonly: bool,
    ) -> Result<BenchmarkResult> {
        if readonly {
            let status = self.store.load(&theme.slug, &theme.instance_name())?;
            tracing::debug!(slug = %theme.slug, state = %status.state, "using stored result");
            return Ok(BenchmarkResult::from_status(&theme.slug, None, status));
        }
        self.run(theme, target_url).await
    }

    async fn courtesy_pause(&self) -> Result<()> {
        if self.courtesy_delay.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(PipelineError::Cancelled),
            _ = tokio::time::sleep(self.courtesy_delay) => Ok(()),
        }
    }
}
