// src/benchmark/client.rs
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::benchmark::types::{RunHandle, RunState, TestStatus};
use crate::config::credentials::Credentials;
use crate::error::{PipelineError, Result};

/// Run id reported by [`DryRunBenchmark`].
pub const DRY_RUN_ID: &str = "dry-run";

/// The vendor API surface the runner depends on.
#[async_trait]
pub trait BenchmarkApi: Send + Sync {
    async fn submit(&self, target_url: &str) -> Result<RunHandle>;
    async fn status(&self, handle: &RunHandle) -> Result<TestStatus>;
    /// Download an authenticated resource to `dest`; returns bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;

    fn is_dry_run(&self) -> bool {
        false
    }
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    test_id: Option<String>,
    #[serde(default)]
    credits_left: Option<i64>,
    #[serde(default)]
    error: Option<String>,
}

/// GTmetrix REST API (v0.1), basic-auth.
pub struct GtmetrixClient {
    http: reqwest::Client,
    api_base: String,
    creds: Credentials,
    cookies: String,
}

impl GtmetrixClient {
    pub fn new(api_base: &str, creds: Credentials, cookies: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("themetest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            creds,
            cookies: cookies.to_string(),
        })
    }

    async fn read_body(endpoint: &str, resp: reqwest::Response) -> Result<(u16, String)> {
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| PipelineError::transport(endpoint, e))?;
        Ok((status, body))
    }
}

#[async_trait]
impl BenchmarkApi for GtmetrixClient {
    async fn submit(&self, target_url: &str) -> Result<RunHandle> {
        let endpoint = format!("{}/test", self.api_base);
        let mut form = vec![("url", target_url)];
        if !self.cookies.is_empty() {
            form.push(("x-metrix-cookies", self.cookies.as_str()));
        }
        tracing::info!(target_url, "submitting benchmark");
        let resp = self
            .http
            .post(&endpoint)
            .basic_auth(&self.creds.username, Some(&self.creds.password))
            .form(&form)
            .send()
            .await
            .map_err(|e| PipelineError::transport(&endpoint, e))?;
        let (status, body) = Self::read_body(&endpoint, resp).await?;
        tracing::debug!(status, body = %body, "submit responded");

        if !(200..300).contains(&status) {
            counter!("themetest_http_requests_total", "endpoint" => "benchmark_submit", "outcome" => "http_error")
                .increment(1);
            return Err(PipelineError::Http {
                endpoint,
                status,
                body,
            });
        }
        counter!("themetest_http_requests_total", "endpoint" => "benchmark_submit", "outcome" => "ok")
            .increment(1);

        let parsed: SubmitResponse =
            serde_json::from_str(&body).map_err(|e| PipelineError::MalformedResponse {
                endpoint: endpoint.clone(),
                reason: format!("{e}; body: {body}"),
            })?;
        let Some(run_id) = parsed.test_id.filter(|id| !id.is_empty()) else {
            tracing::error!(target_url, body = %body, "benchmark submit returned no test_id");
            return Err(PipelineError::MalformedResponse {
                endpoint,
                reason: match parsed.error {
                    Some(e) => format!("no test_id, vendor error: {e}"),
                    None => "no test_id in response".to_string(),
                },
            });
        };
        tracing::info!(run_id = %run_id, credits_left = ?parsed.credits_left, "benchmark queued");
        Ok(RunHandle {
            run_id,
            target_url: target_url.to_string(),
            credits_left: parsed.credits_left,
        })
    }

    async fn status(&self, handle: &RunHandle) -> Result<TestStatus> {
        let endpoint = format!("{}/test/{}", self.api_base, handle.run_id);
        let resp = self
            .http
            .get(&endpoint)
            .basic_auth(&self.creds.username, Some(&self.creds.password))
            .send()
            .await
            .map_err(|e| PipelineError::transport(&endpoint, e))?;
        let (status, body) = Self::read_body(&endpoint, resp).await?;
        tracing::trace!(status, body = %body, "poll responded");
        if !(200..300).contains(&status) {
            return Err(PipelineError::Http {
                endpoint,
                status,
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| PipelineError::MalformedResponse {
            endpoint,
            reason: format!("{e}; body: {body}"),
        })
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut resp = self
            .http
            .get(url)
            .basic_auth(&self.creds.username, Some(&self.creds.password))
            .send()
            .await
            .map_err(|e| PipelineError::transport(url, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PipelineError::Http {
                endpoint: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        write_stream(&mut resp, url, dest).await
    }
}

/// Stream a response body into `dest`, creating parent directories. The body goes to
/// `<dest>.part` first; `dest` only appears once the whole body arrived.
pub(crate) async fn write_stream(
    resp: &mut reqwest::Response,
    url: &str,
    dest: &Path,
) -> Result<u64> {
    if let Some(dir) = dest.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| PipelineError::io(format!("creating {}", dir.display()), e))?;
    }
    let part = part_path(dest);
    let written = match copy_body(resp, url, &part).await {
        Ok(n) => n,
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(&part).await {
                tracing::debug!(path = %part.display(), "no partial download to remove: {rm}");
            }
            return Err(e);
        }
    };
    tokio::fs::rename(&part, dest)
        .await
        .map_err(|e| PipelineError::io(format!("renaming onto {}", dest.display()), e))?;
    tracing::debug!(url, dest = %dest.display(), bytes = written, "downloaded");
    Ok(written)
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

async fn copy_body(resp: &mut reqwest::Response, url: &str, part: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(part)
        .await
        .map_err(|e| PipelineError::io(format!("creating {}", part.display()), e))?;
    let mut written = 0u64;
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| PipelineError::transport(url, e))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| PipelineError::io(format!("writing {}", part.display()), e))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| PipelineError::io(format!("flushing {}", part.display()), e))?;
    Ok(written)
}

/// Placeholder vendor: every run completes immediately with empty metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunBenchmark;

#[async_trait]
impl BenchmarkApi for DryRunBenchmark {
    async fn submit(&self, target_url: &str) -> Result<RunHandle> {
        tracing::info!(target_url, "dry run, not submitting benchmark");
        Ok(RunHandle {
            run_id: DRY_RUN_ID.to_string(),
            target_url: target_url.to_string(),
            credits_left: None,
        })
    }

    async fn status(&self, _handle: &RunHandle) -> Result<TestStatus> {
        Ok(TestStatus::pending(RunState::Completed))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        tracing::info!(url, dest = %dest.display(), "dry run, not downloading");
        Ok(0)
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}
