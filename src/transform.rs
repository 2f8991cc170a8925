//! Catalog metadata + benchmark result -> one flat record of post-meta fields.

use std::collections::BTreeMap;

use once_cell::sync::OnceCell;
use regex::Regex;
use serde_json::{Number, Value};

use crate::benchmark::{BenchmarkResult, RunState};
use crate::catalog::types::CatalogEntry;
use crate::error::{PipelineError, Result};

/// Field name -> value, ordered by key so serialization is stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishedRecord {
    pub fields: BTreeMap<String, Value>,
}

impl PublishedRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn slug(&self) -> &str {
        self.get("theme_slug").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        self.get("theme_name").and_then(Value::as_str).unwrap_or_default()
    }

    pub fn description(&self) -> &str {
        self.get("theme_description")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.fields).map_err(|e| PipelineError::json("published record", e))
    }

    /// `(key, value)` pairs as they are written to post meta.
    pub fn meta_pairs(&self) -> impl Iterator<Item = (&str, String)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), meta_value(v)))
    }
}

/// Post meta is stored as plain ASCII text: objects and arrays as JSON, nulls empty,
/// line breaks flattened.
pub fn meta_value(v: &Value) -> String {
    let raw = match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => v.to_string(),
    };
    ascii_line(&raw)
}

/// Plain one-line text for a post excerpt: entities decoded, tags stripped, whitespace collapsed.
pub fn excerpt_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    let stripped = re_tags.replace_all(&decoded, " ");

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    let text = ascii_line(&stripped);
    re_ws.replace_all(&text, " ").trim().to_string()
}

/// Drop non-ASCII characters, turn `\n` into a space and remove `\r`.
pub fn ascii_line(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii() && *c != '\r')
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect()
}

fn num(n: Option<&Number>) -> Value {
    n.cloned().map(Value::Number).unwrap_or(Value::Null)
}

fn text(s: Option<&str>) -> Value {
    s.map(Value::from).unwrap_or(Value::Null)
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Merge one theme's catalog entry with its completed benchmark.
pub fn merge(entry: &CatalogEntry, result: &BenchmarkResult) -> Result<PublishedRecord> {
    if result.state != RunState::Completed {
        return Err(PipelineError::IncompleteBenchmark {
            slug: entry.slug.clone(),
            state: result.state,
        });
    }
    let download_link = entry
        .download_link()
        .ok_or_else(|| PipelineError::MissingDownloadLink {
            slug: entry.slug.clone(),
            version: entry.version.clone(),
        })?;

    let mut f: BTreeMap<String, Value> = BTreeMap::new();
    let mut put = |k: &str, v: Value| {
        f.insert(k.to_string(), v);
    };

    put("theme_name", entry.name.clone().into());
    put("theme_slug", entry.slug.clone().into());
    put("theme_author", entry.author.clone().into());
    put("theme_rating", float(entry.rating));
    put("theme_num_ratings", entry.num_ratings.into());
    put("theme_downloaded", entry.downloaded.into());
    put("theme_last_updated", entry.last_updated.clone().into());
    put("theme_homepage", entry.homepage.clone().into());
    put("theme_description", entry.long_description().into());
    put("theme_sections", serde_json::to_value(&entry.sections).unwrap_or_default());
    put("theme_version", entry.version.clone().into());
    put("theme_preview_url", entry.preview_url.clone().into());
    put("theme_versions", serde_json::to_value(&entry.versions).unwrap_or_default());
    put("theme_download_link", download_link.into());
    put("theme_tags", serde_json::to_value(&entry.tags).unwrap_or_default());
    put("theme_template", entry.template.clone().unwrap_or_default().into());
    put(
        "theme_parent_slug",
        entry
            .parent
            .as_ref()
            .map(|p| p.slug.clone())
            .unwrap_or_default()
            .into(),
    );
    put("theme_screenshot_url", entry.screenshot_url.clone().into());
    put("theme_active_installs", entry.active_installs.into());

    let m = &result.metrics;
    put("gt_pagespeed_score", num(m.pagespeed_score.as_ref()));
    put("gt_yslow_score", num(m.yslow_score.as_ref()));
    put("gt_page_elements", num(m.page_elements.as_ref()));
    put("gt_html_bytes", num(m.html_bytes.as_ref()));
    put("gt_page_bytes", num(m.page_bytes.as_ref()));
    put("gt_report_url", text(m.report_url.as_deref()));
    put("gt_page_load_time", num(m.page_load_time.as_ref()));
    put("gt_fully_loaded_time", num(m.fully_loaded_time.as_ref()));
    put("gt_rum_speed_index", num(m.rum_speed_index.as_ref()));
    put("gt_html_load_time", num(m.html_load_time.as_ref()));
    put("gt_first_paint_time", num(m.first_paint_time.as_ref()));
    put("gt_dom_content_loaded_time", num(m.dom_content_loaded_time.as_ref()));
    put("gt_onload_time", num(m.onload_time.as_ref()));
    put("gt_backend_duration", num(m.backend_duration.as_ref()));
    put("gt_onload_duration", num(m.onload_duration.as_ref()));
    put("gt_connect_duration", num(m.connect_duration.as_ref()));
    put("gt_first_contentful_paint_time", num(m.first_contentful_paint_time.as_ref()));
    put("gt_dom_content_loaded_duration", num(m.dom_content_loaded_duration.as_ref()));
    put("gt_redirect_duration", num(m.redirect_duration.as_ref()));
    put("gt_dom_interactive_time", num(m.dom_interactive_time.as_ref()));

    let r = &result.resources;
    put("gt_screenshot_url", text(r.screenshot.as_deref()));
    put("gt_report_pdf_url", text(r.report_pdf.as_deref()));
    put("gt_pagespeed_url", text(r.pagespeed.as_deref()));
    put("gt_report_pdf_full_url", text(r.report_pdf_full.as_deref()));
    put("gt_pagespeed_files_url", text(r.pagespeed_files.as_deref()));
    put("gt_har_url", text(r.har.as_deref()));
    put("gt_yslow_url", text(r.yslow.as_deref()));

    tracing::debug!(slug = %entry.slug, fields = f.len(), "record built");
    Ok(PublishedRecord { fields: f })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::TestStatus;
    use serde_json::json;

    fn entry() -> CatalogEntry {
        serde_json::from_value(json!({
            "slug": "neve",
            "name": "Neve",
            "version": "3.1",
            "versions": {"3.0": "https://downloads.wordpress.org/theme/neve.3.0.zip",
                         "3.1": "https://downloads.wordpress.org/theme/neve.3.1.zip"},
            "sections": {"description": "Fast\nand light"},
            "parent": false
        }))
        .unwrap()
    }

    fn completed() -> BenchmarkResult {
        let mut st = TestStatus::pending(RunState::Completed);
        st.results.page_load_time = Some(Number::from(1234));
        st.resources.har = Some("https://gtmetrix.com/api/0.1/test/x/har".into());
        BenchmarkResult::from_status("neve", Some("x".into()), st)
    }

    #[test]
    fn incomplete_states_are_rejected() {
        for state in [RunState::Queued, RunState::Running, RunState::Error] {
            let mut r = completed();
            r.state = state;
            let err = merge(&entry(), &r).unwrap_err();
            assert!(matches!(err, PipelineError::IncompleteBenchmark { .. }));
        }
    }

    #[test]
    fn record_carries_catalog_and_vendor_fields() {
        let rec = merge(&entry(), &completed()).unwrap();
        assert_eq!(rec.slug(), "neve");
        assert_eq!(
            rec.get("theme_download_link"),
            Some(&json!("https://downloads.wordpress.org/theme/neve.3.1.zip"))
        );
        assert_eq!(rec.get("theme_template"), Some(&json!("")));
        assert_eq!(rec.get("theme_parent_slug"), Some(&json!("")));
        assert_eq!(rec.get("gt_page_load_time"), Some(&json!(1234)));
        assert_eq!(rec.get("gt_yslow_url"), Some(&Value::Null));
        assert_eq!(rec.fields.len(), 46);
    }

    #[test]
    fn missing_version_link_is_an_error() {
        let mut e = entry();
        e.version = "9.9".into();
        let err = merge(&e, &completed()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingDownloadLink { ref version, .. } if version == "9.9"));
    }

    #[test]
    fn excerpt_is_plain_text() {
        assert_eq!(
            excerpt_text("<p>Fast &amp; light</p>\n<p>Caf\u{e9} ready</p>"),
            "Fast & light Caf ready"
        );
    }

    #[test]
    fn meta_values_are_flat_ascii() {
        assert_eq!(meta_value(&json!("caf\u{e9}\r\nbar")), "caf bar");
        assert_eq!(meta_value(&Value::Null), "");
        assert_eq!(meta_value(&json!({"a": 1})), r#"{"a":1}"#);
        assert_eq!(meta_value(&json!(4.5)), "4.5");
    }
}
