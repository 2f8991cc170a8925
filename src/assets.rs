//! Per-theme featured image cache: the catalog screenshot, re-encoded as JPEG.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::benchmark::client::write_stream;
use crate::catalog::types::CatalogEntry;
use crate::error::{PipelineError, Result};
use crate::process::{CommandRunner, ToolCommand};

const JPEG_QUALITY: &str = "75";

pub struct AssetCache {
    images_dir: PathBuf,
    http: Option<reqwest::Client>,
    runner: Arc<dyn CommandRunner>,
    convert: String,
}

impl AssetCache {
    /// `http` is `None` in dry runs; nothing is downloaded then.
    pub fn new(
        images_dir: impl Into<PathBuf>,
        http: Option<reqwest::Client>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            images_dir: images_dir.into(),
            http,
            runner,
            convert: "convert".into(),
        }
    }

    pub fn default_client() -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(concat!("themetest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))
    }

    pub fn png_path(&self, slug: &str) -> PathBuf {
        self.images_dir.join(format!("{slug}.png"))
    }

    pub fn jpg_path(&self, slug: &str) -> PathBuf {
        self.images_dir.join(format!("{slug}.jpg"))
    }

    pub fn convert_command(&self, png: &Path, jpg: &Path) -> ToolCommand {
        ToolCommand::new(&self.convert)
            .arg(png.display().to_string())
            .args(["-quality", JPEG_QUALITY])
            .arg(jpg.display().to_string())
    }

    /// Path of the theme's JPEG, fetching and converting it on first use.
    pub async fn ensure_theme_screenshot(&self, entry: &CatalogEntry) -> Result<PathBuf> {
        let jpg = self.jpg_path(&entry.slug);
        if jpg.exists() {
            tracing::debug!(slug = %entry.slug, path = %jpg.display(), "screenshot cached");
            return Ok(jpg);
        }
        let png = self.png_path(&entry.slug);
        let url = entry.screenshot_source_url();

        match &self.http {
            None => tracing::info!(slug = %entry.slug, %url, "dry run, not downloading screenshot"),
            Some(http) if !png.exists() => {
                let mut resp = http
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| PipelineError::transport(&url, e))?;
                if !resp.status().is_success() {
                    return Err(PipelineError::Http {
                        endpoint: url,
                        status: resp.status().as_u16(),
                        body: String::new(),
                    });
                }
                write_stream(&mut resp, &url, &png).await?;
            }
            Some(_) => {}
        }

        self.runner.run(&self.convert_command(&png, &jpg)).await?;
        Ok(jpg)
    }
}
