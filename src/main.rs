//! themetest binary entrypoint.
//! Loads `.env` and settings, installs logging and metrics, takes the run lock and
//! executes one action.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use themetest::config::{Settings, ENV_CONFIG_PATH};
use themetest::pipeline::{Action, Pipeline};
use themetest::run_lock::RunLock;
use themetest::telemetry::Telemetry;

const ENV_LOG_FORMAT: &str = "THEMETEST_LOG_FORMAT";

#[derive(Debug, Parser)]
#[command(name = "themetest", version, about = "Benchmark WordPress themes and publish the reports")]
struct Cli {
    /// Log every side effect instead of performing it.
    #[arg(long)]
    dry_run: bool,

    /// Settings file (TOML).
    #[arg(long, env = ENV_CONFIG_PATH)]
    config: Option<PathBuf>,

    /// Rundown look-back window in hours.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    lookback_hours: Option<u32>,

    #[arg(value_enum)]
    action: Action,
}

/// Compact logs by default, JSON when THEMETEST_LOG_FORMAT=json. RUST_LOG overrides the filter.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("themetest=info,warn"));
    let json = std::env::var(ENV_LOG_FORMAT).is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => Settings::load_default().context("loading settings")?,
    };
    if let Some(h) = cli.lookback_hours {
        settings.rundown.lookback_hours = h;
    }

    let telemetry = Telemetry::init().context("installing metrics recorder")?;
    let metrics_path = settings.metrics_path();
    let lock = RunLock::acquire(&settings.lock_path()).context("acquiring run lock")?;
    tracing::debug!(path = %lock.path().display(), "holding run lock");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping after the current step");
                cancel.cancel();
            }
        });
    }

    let pipeline = Pipeline::from_settings(settings, cli.dry_run, cancel)
        .context("building pipeline")?;
    let outcome = pipeline.run(cli.action).await;

    if let Err(e) = telemetry.write_textfile(&metrics_path) {
        tracing::warn!(error = %e, "could not write metrics file");
    }

    let report = outcome.with_context(|| format!("{} failed", cli.action.as_str()))?;
    let skipped: usize = report.batches.iter().map(|b| b.skipped.len()).sum();
    tracing::info!(
        action = cli.action.as_str(),
        skipped,
        rundown_post = ?report.rundown_post,
        promoted = report.promoted,
        "done"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
