//! Periodic digest of recently published report posts.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, SecondsFormat, Utc};
use metrics::counter;
use serde::Deserialize;

use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::process::{run_with_retry, CommandRunner, ToolCommand};
use crate::publish::{PostDraft, Publisher};

/// A report post as returned by the site's REST API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublishedPost {
    pub id: u64,
    pub slug: String,
}

#[async_trait]
pub trait PostIndex: Send + Sync {
    /// Published posts in `category` created after `after`, newest first as the site returns them.
    async fn recent_reports(
        &self,
        after: DateTime<Utc>,
        category: u64,
        per_page: u32,
    ) -> Result<Vec<PublishedPost>>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PostsBody {
    List(Vec<PublishedPost>),
    Wrapped {
        #[serde(alias = "data")]
        posts: Vec<PublishedPost>,
    },
}

pub fn parse_posts(endpoint: &str, body: &str) -> Result<Vec<PublishedPost>> {
    match serde_json::from_str::<PostsBody>(body) {
        Ok(PostsBody::List(p)) | Ok(PostsBody::Wrapped { posts: p }) => Ok(p),
        Err(e) => Err(PipelineError::MalformedResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// WordPress REST API (`wp-json/wp/v2/posts`).
pub struct WpRestIndex {
    http: reqwest::Client,
    endpoint: String,
}

impl WpRestIndex {
    pub fn new(wp_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("themetest/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))?;
        let base = if wp_url.ends_with('/') {
            wp_url.to_string()
        } else {
            format!("{wp_url}/")
        };
        Ok(Self {
            http,
            endpoint: format!("{base}wp-json/wp/v2/posts"),
        })
    }
}

#[async_trait]
impl PostIndex for WpRestIndex {
    async fn recent_reports(
        &self,
        after: DateTime<Utc>,
        category: u64,
        per_page: u32,
    ) -> Result<Vec<PublishedPost>> {
        let after = after.to_rfc3339_opts(SecondsFormat::Secs, true);
        let category = category.to_string();
        let per_page = per_page.to_string();
        let resp = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("after", after.as_str()),
                ("categories", category.as_str()),
                ("per_page", per_page.as_str()),
                ("status", "publish"),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::transport(&self.endpoint, e))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| PipelineError::transport(&self.endpoint, e))?;
        tracing::info!(status, "post index responded");
        tracing::debug!(body = %body, "post index body");
        if !(200..300).contains(&status) {
            counter!("themetest_http_requests_total", "endpoint" => "wp_posts", "outcome" => "http_error")
                .increment(1);
            return Err(PipelineError::Http {
                endpoint: self.endpoint.clone(),
                status,
                body,
            });
        }
        counter!("themetest_http_requests_total", "endpoint" => "wp_posts", "outcome" => "ok")
            .increment(1);
        parse_posts(&self.endpoint, &body)
    }
}

/// In-memory post list.
#[derive(Debug, Clone, Default)]
pub struct FixtureIndex {
    posts: Vec<PublishedPost>,
}

impl FixtureIndex {
    pub fn new(posts: Vec<PublishedPost>) -> Self {
        Self { posts }
    }
}

#[async_trait]
impl PostIndex for FixtureIndex {
    async fn recent_reports(&self, _: DateTime<Utc>, _: u64, per_page: u32) -> Result<Vec<PublishedPost>> {
        Ok(self.posts.iter().take(per_page as usize).cloned().collect())
    }
}

/// `montage -tile` grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileLayout {
    pub columns: u32,
    pub rows: u32,
}

impl fmt::Display for TileLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.columns, self.rows)
    }
}

/// Grid for `count` thumbnails; `None` when there is nothing to show.
pub fn select_layout(count: usize) -> Option<TileLayout> {
    let (columns, rows) = match count {
        0 => return None,
        16..=18 => (4, 4),
        14..=15 => (5, 3),
        10..=13 => (4, 3),
        8..=9 => (3, 3),
        6..=7 => (3, 2),
        n => {
            let cols = (n as f64).sqrt().ceil() as usize;
            (cols, n.div_ceil(cols))
        }
    };
    Some(TileLayout {
        columns: columns as u32,
        rows: rows as u32,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestEntry {
    pub theme_slug: String,
    pub post_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RundownDigest {
    pub window_start: DateTime<Utc>,
    pub entries: Vec<DigestEntry>,
    pub layout: Option<TileLayout>,
    pub image: PathBuf,
}

impl RundownDigest {
    pub fn post_ids(&self) -> String {
        self.entries
            .iter()
            .map(|e| e.post_id.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn draft(&self, category: u64, today: DateTime<Local>) -> PostDraft {
        PostDraft {
            title: format!(
                "WordPress Theme Performance Rundown - {}",
                today.format("%B %d %Y")
            ),
            content: format!(
                r#"<p>Hey back with another rundown</p> <!--more--> [themetest_results_rundown post_ids="{}"]"#,
                self.post_ids()
            ),
            status: "publish".into(),
            category: category.to_string(),
            excerpt: String::new(),
        }
    }
}

pub struct RundownAggregator {
    index: Arc<dyn PostIndex>,
    publisher: Arc<Publisher>,
    runner: Arc<dyn CommandRunner>,
    images_dir: PathBuf,
    tmp_dir: PathBuf,
    report_category_id: u64,
    rundown_category_id: u64,
    per_page: u32,
    slug_suffix: String,
}

impl RundownAggregator {
    pub fn new(
        settings: &Settings,
        index: Arc<dyn PostIndex>,
        publisher: Arc<Publisher>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            index,
            publisher,
            runner,
            images_dir: settings.paths.images_dir.clone(),
            tmp_dir: settings.paths.tmp_dir.clone(),
            report_category_id: settings.wordpress.report_category_id,
            rundown_category_id: settings.wordpress.rundown_category_id,
            per_page: settings.rundown.per_page,
            slug_suffix: settings.rundown.slug_suffix.clone(),
        }
    }

    fn theme_slug<'a>(&self, post_slug: &'a str) -> &'a str {
        if self.slug_suffix.is_empty() {
            return post_slug;
        }
        post_slug
            .split_once(self.slug_suffix.as_str())
            .map(|(head, _)| head)
            .unwrap_or(post_slug)
    }

    pub async fn build_digest(&self, now: DateTime<Local>, lookback: chrono::Duration) -> Result<RundownDigest> {
        let window_start = now.with_timezone(&Utc) - lookback;
        let posts = self
            .index
            .recent_reports(window_start, self.report_category_id, self.per_page)
            .await?;
        let entries: Vec<DigestEntry> = posts
            .into_iter()
            .map(|p| {
                let theme_slug = self.theme_slug(&p.slug).to_string();
                tracing::info!(slug = %theme_slug, post_id = p.id, "rundown entry");
                DigestEntry {
                    theme_slug,
                    post_id: p.id,
                }
            })
            .collect();
        Ok(RundownDigest {
            window_start,
            layout: select_layout(entries.len()),
            image: self
                .tmp_dir
                .join(format!("rundown_featured-{}.jpg", now.format("%y%m%d"))),
            entries,
        })
    }

    pub fn montage_command(&self, digest: &RundownDigest, layout: TileLayout) -> ToolCommand {
        let mut cmd = ToolCommand::new("montage");
        // Ten tiles on a 4x3 grid get a leading blank for alignment.
        if digest.entries.len() == 10 {
            cmd = cmd.arg("null:");
        }
        cmd.args(digest.entries.iter().map(|e| {
            self.images_dir
                .join(format!("{}.jpg", e.theme_slug))
                .display()
                .to_string()
        }))
        .args([
            "-thumbnail", "240x240", "-sharpen", "10", "-background", "snow", "-geometry",
            "240x240-50-30", "+polaroid", "-resize", "100%", "-tile",
        ])
        .arg(layout.to_string())
        .arg(digest.image.display().to_string())
    }

    /// Post the digest, compose its image and attach it. Returns the post id, or
    /// `None` when the window held no reports.
    pub async fn publish_digest(&self, digest: &RundownDigest, today: DateTime<Local>) -> Result<Option<u64>> {
        let Some(layout) = digest.layout else {
            tracing::info!(since = %digest.window_start, "no reports in window, skipping rundown");
            return Ok(None);
        };
        let post_id = self
            .publisher
            .create_post(&digest.draft(self.rundown_category_id, today))
            .await?;

        if !self.runner.is_dry_run() {
            tokio::fs::create_dir_all(&self.tmp_dir)
                .await
                .map_err(|e| PipelineError::io(format!("creating {}", self.tmp_dir.display()), e))?;
        }
        run_with_retry(self.runner.as_ref(), &self.montage_command(digest, layout), 0).await?;
        self.publisher
            .import_featured_image(&digest.image, post_id)
            .await?;
        counter!("themetest_posts_total", "kind" => "rundown").increment(1);
        tracing::info!(post_id, themes = digest.entries.len(), %layout, "rundown published");
        Ok(Some(post_id))
    }
}
