use std::fs;
use std::path::Path;

use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::error::{PipelineError, Result};

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Process-wide Prometheus recorder; counters are flushed to a text file at the end of a run.
#[derive(Clone)]
pub struct Telemetry {
    handle: PrometheusHandle,
}

impl Telemetry {
    /// Install the recorder on first call; later calls reuse it.
    pub fn init() -> Result<Self> {
        let handle = HANDLE.get_or_try_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| PipelineError::Config(format!("prometheus recorder: {e}")))?;
            describe();
            Ok::<_, PipelineError>(handle)
        })?;
        Ok(Self {
            handle: handle.clone(),
        })
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Write the exposition text atomically to `path`.
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| PipelineError::io(format!("creating {}", dir.display()), e))?;
        }
        let tmp = path.with_extension("prom.tmp");
        fs::write(&tmp, self.render())
            .map_err(|e| PipelineError::io(format!("writing {}", tmp.display()), e))?;
        fs::rename(&tmp, path)
            .map_err(|e| PipelineError::io(format!("renaming to {}", path.display()), e))?;
        tracing::debug!(path = %path.display(), "metrics written");
        Ok(())
    }
}

fn describe() {
    describe_counter!(
        "themetest_themes_total",
        Unit::Count,
        "Themes processed per stage, by outcome"
    );
    describe_counter!(
        "themetest_commands_total",
        Unit::Count,
        "External commands run, by program and outcome"
    );
    describe_counter!("themetest_polls_total", Unit::Count, "Benchmark status polls");
    describe_counter!(
        "themetest_http_requests_total",
        Unit::Count,
        "HTTP requests, by endpoint and outcome"
    );
    describe_counter!("themetest_benchmarks_total", Unit::Count, "Benchmark runs by outcome");
    describe_counter!("themetest_posts_total", Unit::Count, "Posts published by kind");
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics::counter;

    #[test]
    fn textfile_contains_recorded_counters() {
        let t = Telemetry::init().unwrap();
        // Second init reuses the installed recorder.
        let t2 = Telemetry::init().unwrap();
        counter!("themetest_polls_total").increment(3);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/metrics.prom");
        t2.write_textfile(&path).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("themetest_polls_total"));
        assert!(t.render().contains("themetest_polls_total"));
    }
}
