//! Publishing to the content site through `wp post` / `wp media`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use metrics::counter;

use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::process::{run_with_retry, CommandOutput, CommandRunner, ToolCommand};
use crate::transform::{excerpt_text, PublishedRecord};

pub const DRY_RUN_POST_ID: u64 = 4321;
pub const DRY_RUN_MEDIA_ID: u64 = 5432;

const REPORT_SHORTCODE: &str = "[themetest_results_full]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub status: String,
    /// Category slug or numeric id, as `wp` accepts either.
    pub category: String,
    pub excerpt: String,
}

impl PostDraft {
    /// The per-theme report post.
    pub fn report(record: &PublishedRecord, category: &str) -> Self {
        Self {
            title: format!("{} - WordPress Theme Performance Report", record.name()),
            content: REPORT_SHORTCODE.to_string(),
            status: "publish".into(),
            category: category.to_string(),
            excerpt: excerpt_text(record.description()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOutcome {
    pub post_id: u64,
    pub media_id: u64,
}

pub struct Publisher {
    runner: Arc<dyn CommandRunner>,
    wp_cli: String,
    wp_path: PathBuf,
    report_category: String,
    retries: u8,
}

impl Publisher {
    pub fn new(settings: &Settings, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            wp_cli: settings.wordpress.cli.clone(),
            wp_path: settings.wordpress.path.clone(),
            report_category: settings.wordpress.report_category.clone(),
            retries: 1,
        }
    }

    fn wp(&self) -> ToolCommand {
        ToolCommand::new(&self.wp_cli).flag("path", self.wp_path.display())
    }

    pub fn create_post_command(&self, draft: &PostDraft) -> ToolCommand {
        self.wp()
            .args(["post", "create"])
            .flag("post_status", &draft.status)
            .flag("post_content", &draft.content)
            .flag("post_category", &draft.category)
            .flag("post_excerpt", &draft.excerpt)
            .flag("post_title", &draft.title)
            .arg("--porcelain")
    }

    pub fn set_meta_command(&self, post_id: u64, key: &str, value: &str) -> ToolCommand {
        self.wp()
            .args(["post", "meta", "set"])
            .arg(post_id.to_string())
            .arg(key)
            .arg(value)
    }

    pub fn media_import_command(&self, image: &Path, post_id: u64) -> ToolCommand {
        self.wp()
            .args(["media", "import"])
            .arg(image.display().to_string())
            .flag("post_id", post_id)
            .arg("--featured_image")
            .arg("--porcelain")
    }

    async fn run(&self, cmd: &ToolCommand) -> Result<CommandOutput> {
        run_with_retry(self.runner.as_ref(), cmd, self.retries).await
    }

    fn parse_id(cmd: &ToolCommand, out: &CommandOutput) -> Result<u64> {
        out.last_line()
            .and_then(|l| l.parse().ok())
            .ok_or_else(|| PipelineError::MalformedResponse {
                endpoint: cmd.program.clone(),
                reason: format!("expected an id on the last output line, got {:?}", out.stdout.trim()),
            })
    }

    pub async fn create_post(&self, draft: &PostDraft) -> Result<u64> {
        let cmd = self.create_post_command(draft);
        let out = self.run(&cmd).await?;
        let id = if self.runner.is_dry_run() {
            DRY_RUN_POST_ID
        } else {
            Self::parse_id(&cmd, &out)?
        };
        tracing::info!(post_id = id, title = %draft.title, "post created");
        Ok(id)
    }

    pub async fn set_meta(&self, post_id: u64, key: &str, value: &str) -> Result<()> {
        tracing::debug!(post_id, key, value, "setting meta");
        self.run(&self.set_meta_command(post_id, key, value)).await?;
        Ok(())
    }

    pub async fn import_featured_image(&self, image: &Path, post_id: u64) -> Result<u64> {
        let cmd = self.media_import_command(image, post_id);
        let out = self.run(&cmd).await?;
        let id = if self.runner.is_dry_run() {
            DRY_RUN_MEDIA_ID
        } else {
            Self::parse_id(&cmd, &out)?
        };
        tracing::info!(post_id, media_id = id, image = %image.display(), "featured image set");
        Ok(id)
    }

    /// Create the report post, write every record field as meta, attach the image.
    pub async fn publish_record(
        &self,
        record: &PublishedRecord,
        image: &Path,
    ) -> Result<PublishOutcome> {
        let draft = PostDraft::report(record, &self.report_category);
        let post_id = self.create_post(&draft).await?;
        tracing::info!(slug = record.slug(), post_id, "publishing report");
        for (key, value) in record.meta_pairs() {
            self.set_meta(post_id, key, &value).await?;
        }
        let media_id = self.import_featured_image(image, post_id).await?;
        counter!("themetest_posts_total", "kind" => "report").increment(1);
        Ok(PublishOutcome { post_id, media_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::DryRunRunner;
    use serde_json::json;

    fn record() -> PublishedRecord {
        let mut r = PublishedRecord::default();
        r.fields.insert("theme_name".into(), json!("Astra"));
        r.fields.insert("theme_slug".into(), json!("astra"));
        r.fields.insert("theme_description".into(), json!("Fast,\nlight \u{2013} theme"));
        r
    }

    #[test]
    fn report_draft_matches_site_conventions() {
        let d = PostDraft::report(&record(), "theme-performance-reports");
        assert_eq!(d.title, "Astra - WordPress Theme Performance Report");
        assert_eq!(d.content, "[themetest_results_full]");
        assert_eq!(d.excerpt, "Fast, light theme");
    }

    #[tokio::test]
    async fn dry_run_uses_placeholder_ids() {
        let runner = Arc::new(DryRunRunner::new());
        let p = Publisher::new(&Settings::default(), runner.clone());
        let out = p.publish_record(&record(), Path::new("images/astra.jpg")).await.unwrap();
        assert_eq!(out, PublishOutcome { post_id: 4321, media_id: 5432 });

        let calls = runner.calls();
        // create + 3 meta + media import
        assert_eq!(calls.len(), 5);
        assert!(calls[1].args.ends_with(&[
            "4321".to_string(),
            "theme_description".to_string(),
            "Fast, light  theme".to_string()
        ]));
        assert!(calls[4].args.contains(&"--post_id=4321".to_string()));
    }
}
