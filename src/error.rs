//! Typed errors for the pipeline.
//!
//! Every failure is classified as either per-theme (the theme is skipped and the
//! batch continues) or batch-fatal (the run aborts). See [`PipelineError::is_batch_fatal`].

use std::path::PathBuf;

use thiserror::Error;

use crate::benchmark::RunState;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    // --- batch-fatal ---
    /// Invalid or unreadable configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Missing or malformed vendor credentials.
    #[error("credentials error: {0}")]
    Credentials(String),

    /// Another run holds the lock file.
    #[error("another run holds the lock at {}", path.display())]
    Locked { path: PathBuf },

    /// Operator interrupted the run.
    #[error("run cancelled")]
    Cancelled,

    // --- per-theme ---
    /// Request never produced a response.
    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-2xx response.
    #[error("HTTP {status} from {endpoint}: {body}")]
    Http {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// Response parsed but an expected field is missing or has the wrong shape.
    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    /// Vendor reported the run as failed.
    #[error("benchmark run {run_id} failed: {message}")]
    BenchmarkFailed { run_id: String, message: String },

    /// Run did not reach a terminal state in time.
    #[error("benchmark run {run_id} still {last_state} after {waited_secs}s")]
    PollTimeout {
        run_id: String,
        last_state: RunState,
        waited_secs: u64,
    },

    /// A record can only be derived from a completed run.
    #[error("benchmark for {slug} is {state}, not completed")]
    IncompleteBenchmark { slug: String, state: RunState },

    /// The catalog entry's own version is absent from its version map.
    #[error("no download link for {slug} version {version}")]
    MissingDownloadLink { slug: String, version: String },

    /// Readonly mode found no stored result.
    #[error("no stored benchmark result for {slug} at {}", path.display())]
    ResultNotCached { slug: String, path: PathBuf },

    /// External tool exited non-zero (after retries).
    #[error("`{program}` exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: i32,
        stderr: String,
    },

    /// External tool could not be started.
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error in {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl PipelineError {
    /// Batch-fatal errors abort the whole run; everything else only skips the current theme.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Credentials(_) | Self::Locked { .. } | Self::Cancelled
        )
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn transport(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            source,
        }
    }
}
