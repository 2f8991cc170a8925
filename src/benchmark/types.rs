// src/benchmark/types.rs
use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};

/// Lifecycle of a vendor run. `completed` and `error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Queued,
    #[serde(alias = "started")]
    Running,
    Completed,
    Error,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scores and timings reported under `results`. Times are milliseconds, sizes bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkMetrics {
    pub pagespeed_score: Option<Number>,
    pub yslow_score: Option<Number>,
    pub page_elements: Option<Number>,
    pub html_bytes: Option<Number>,
    pub page_bytes: Option<Number>,
    pub report_url: Option<String>,
    pub page_load_time: Option<Number>,
    pub fully_loaded_time: Option<Number>,
    pub rum_speed_index: Option<Number>,
    pub html_load_time: Option<Number>,
    pub first_paint_time: Option<Number>,
    pub dom_content_loaded_time: Option<Number>,
    pub onload_time: Option<Number>,
    pub backend_duration: Option<Number>,
    pub onload_duration: Option<Number>,
    pub connect_duration: Option<Number>,
    pub first_contentful_paint_time: Option<Number>,
    pub dom_content_loaded_duration: Option<Number>,
    pub redirect_duration: Option<Number>,
    pub dom_interactive_time: Option<Number>,
}

/// Artifact URLs reported under `resources`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkResources {
    pub screenshot: Option<String>,
    pub report_pdf: Option<String>,
    pub report_pdf_full: Option<String>,
    pub pagespeed: Option<String>,
    pub pagespeed_files: Option<String>,
    pub har: Option<String>,
    pub yslow: Option<String>,
}

/// Body of `GET /test/<id>`. Unknown fields are kept so the stored copy is complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStatus {
    pub state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, deserialize_with = "object_or_default")]
    pub results: BenchmarkMetrics,
    #[serde(default, deserialize_with = "object_or_default")]
    pub resources: BenchmarkResources,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TestStatus {
    pub fn pending(state: RunState) -> Self {
        Self {
            state,
            error: None,
            results: BenchmarkMetrics::default(),
            resources: BenchmarkResources::default(),
            extra: Map::new(),
        }
    }
}

// Before completion the vendor sends `[]` instead of `{}` for empty sections.
fn object_or_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let v = Value::deserialize(d)?;
    if v.is_object() {
        serde_json::from_value(v).map_err(serde::de::Error::custom)
    } else {
        Ok(T::default())
    }
}

/// Identifies a submitted run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub run_id: String,
    pub target_url: String,
    pub credits_left: Option<i64>,
}

/// A benchmark outcome tied to the theme it was run for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkResult {
    pub slug: String,
    pub run_id: Option<String>,
    pub state: RunState,
    pub metrics: BenchmarkMetrics,
    pub resources: BenchmarkResources,
    pub error: Option<String>,
}

impl BenchmarkResult {
    pub fn from_status(slug: &str, run_id: Option<String>, status: TestStatus) -> Self {
        Self {
            slug: slug.to_string(),
            run_id,
            state: status.state,
            metrics: status.results,
            resources: status.resources,
            error: status.error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_is_running_and_terminal_states_are_flagged() {
        let s: RunState = serde_json::from_str(r#""started""#).unwrap();
        assert_eq!(s, RunState::Running);
        assert!(!RunState::Queued.is_terminal());
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Error.is_terminal());
    }

    #[test]
    fn empty_array_sections_become_defaults_and_extras_survive() {
        let st: TestStatus = serde_json::from_str(
            r#"{"state": "queued", "results": [], "resources": [], "poll_state_url": "x"}"#,
        )
        .unwrap();
        assert_eq!(st.state, RunState::Queued);
        assert_eq!(st.results, BenchmarkMetrics::default());
        assert_eq!(st.extra.get("poll_state_url"), Some(&Value::from("x")));
        let back = serde_json::to_value(&st).unwrap();
        assert_eq!(back["poll_state_url"], "x");
    }
}
