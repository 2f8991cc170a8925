// src/catalog/source.rs
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;

use crate::catalog::types::{CatalogEntry, CatalogResponse};
use crate::error::{PipelineError, Result};

/// Fields requested from `query_themes`; each is sent as `request[fields][<name>]=true`.
const REQUESTED_FIELDS: [&str; 15] = [
    "description",
    "sections",
    "rating",
    "ratings",
    "downloaded",
    "download_link",
    "last_updated",
    "homepage",
    "tags",
    "template",
    "parent",
    "versions",
    "screenshot_url",
    "active_installs",
    "preview_url",
];

#[async_trait]
pub trait ThemeSource: Send + Sync {
    async fn fetch_themes(&self) -> Result<Vec<CatalogEntry>>;
    fn name(&self) -> &'static str;
}

/// Live WordPress.org themes API.
pub struct WpOrgCatalog {
    client: reqwest::Client,
    endpoint: String,
    browse: String,
}

impl WpOrgCatalog {
    pub fn new(endpoint: &str, browse: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("themetest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            browse: browse.to_string(),
        })
    }

    fn form(&self) -> Vec<(String, String)> {
        let mut form = vec![
            ("action".to_string(), "query_themes".to_string()),
            ("request[page]".to_string(), "1".to_string()),
            ("request[browse]".to_string(), self.browse.clone()),
        ];
        for f in REQUESTED_FIELDS {
            form.push((format!("request[fields][{f}]"), "true".to_string()));
        }
        form
    }
}

#[async_trait]
impl ThemeSource for WpOrgCatalog {
    async fn fetch_themes(&self) -> Result<Vec<CatalogEntry>> {
        tracing::info!(endpoint = %self.endpoint, browse = %self.browse, "querying theme catalog");
        let resp = match self.client.post(&self.endpoint).form(&self.form()).send().await {
            Ok(r) => r,
            Err(e) => {
                counter!("themetest_http_requests_total", "endpoint" => "catalog", "outcome" => "transport_error")
                    .increment(1);
                return Err(PipelineError::transport(&self.endpoint, e));
            }
        };
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| PipelineError::transport(&self.endpoint, e))?;
        tracing::debug!(status = status.as_u16(), body_len = body.len(), "catalog responded");
        if !status.is_success() {
            counter!("themetest_http_requests_total", "endpoint" => "catalog", "outcome" => "http_error")
                .increment(1);
            return Err(PipelineError::Http {
                endpoint: self.endpoint.clone(),
                status: status.as_u16(),
                body,
            });
        }
        counter!("themetest_http_requests_total", "endpoint" => "catalog", "outcome" => "ok")
            .increment(1);
        parse_catalog(&self.endpoint, &body)
    }

    fn name(&self) -> &'static str {
        "wordpress.org"
    }
}

/// Parse a `query_themes` body.
pub fn parse_catalog(endpoint: &str, body: &str) -> Result<Vec<CatalogEntry>> {
    let resp: CatalogResponse =
        serde_json::from_str(body.trim()).map_err(|e| PipelineError::MalformedResponse {
            endpoint: endpoint.to_string(),
            reason: format!("catalog JSON: {e}"),
        })?;
    Ok(resp.themes)
}

/// In-memory source, for tests and offline runs.
pub struct FixtureCatalog {
    themes: Vec<CatalogEntry>,
}

impl FixtureCatalog {
    pub fn new(themes: Vec<CatalogEntry>) -> Self {
        Self { themes }
    }

    pub fn from_json(body: &str) -> Result<Self> {
        Ok(Self::new(parse_catalog("fixture", body)?))
    }
}

#[async_trait]
impl ThemeSource for FixtureCatalog {
    async fn fetch_themes(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self.themes.clone())
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_requests_every_field() {
        let c = WpOrgCatalog::new("https://api.wordpress.org/themes/info/1.1/", "featured").unwrap();
        let form = c.form();
        assert!(form.contains(&("action".into(), "query_themes".into())));
        assert!(form.contains(&("request[browse]".into(), "featured".into())));
        assert!(form.contains(&("request[fields][versions]".into(), "true".into())));
        assert_eq!(form.len(), 3 + REQUESTED_FIELDS.len());
    }

    #[test]
    fn malformed_body_is_a_typed_error() {
        let err = parse_catalog("x", "<html>nope</html>").unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse { .. }));
    }
}
