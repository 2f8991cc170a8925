//! Wires the stages together and runs one CLI action over the theme batch.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use clap::ValueEnum;
use metrics::counter;
use tokio_util::sync::CancellationToken;

use crate::assets::AssetCache;
use crate::benchmark::{
    BenchmarkApi, BenchmarkRunner, DryRunBenchmark, GtmetrixClient, PollPolicy, ResultStore,
};
use crate::catalog::source::{ThemeSource, WpOrgCatalog};
use crate::catalog::types::CatalogEntry;
use crate::catalog::{fetch_and_store, load_theme_data};
use crate::change_detector::{ChangeDetector, Detection, LastRunMarker};
use crate::config::credentials::Credentials;
use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::process::{CommandRunner, DryRunRunner, SystemRunner};
use crate::provision::{SiteProvisioner, TestSite};
use crate::publish::Publisher;
use crate::rundown::{PostIndex, RundownAggregator, WpRestIndex};
use crate::transform::merge;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Fetch the featured catalog and store it.
    #[value(alias = "get_featured")]
    GetFeatured,
    /// Install one test site per theme.
    #[value(alias = "generate_sites")]
    GenerateSites,
    /// Benchmark every test site.
    #[value(alias = "test_gt")]
    TestGt,
    /// Publish reports from stored benchmark results.
    #[value(alias = "post_pages")]
    PostPages,
    /// Reset the test database and delete all test sites.
    Cleanup,
    /// Publish the digest of recent reports.
    Rundown,
    /// Provision, benchmark and publish every theme, then the rundown.
    Auto,
    /// Run `auto` for themes new since the last check, at most once a day.
    #[value(alias = "detect_new")]
    DetectNew,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GetFeatured => "get-featured",
            Self::GenerateSites => "generate-sites",
            Self::TestGt => "test-gt",
            Self::PostPages => "post-pages",
            Self::Cleanup => "cleanup",
            Self::Rundown => "rundown",
            Self::Auto => "auto",
            Self::DetectNew => "detect-new",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTheme {
    pub slug: String,
    pub reason: String,
}

/// Outcome of one stage over the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub stage: &'static str,
    pub succeeded: Vec<String>,
    pub skipped: Vec<SkippedTheme>,
}

impl BatchSummary {
    fn new(stage: &'static str) -> Self {
        Self {
            stage,
            ..Self::default()
        }
    }

    pub fn log(&self) {
        tracing::info!(
            stage = self.stage,
            succeeded = self.succeeded.len(),
            skipped = self.skipped.len(),
            "batch finished: [{}]",
            self.succeeded.join(", ")
        );
        for s in &self.skipped {
            tracing::warn!(stage = self.stage, slug = %s.slug, reason = %s.reason, "skipped");
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub batches: Vec<BatchSummary>,
    pub rundown_post: Option<u64>,
    /// Non-fatal rundown failure after a batch.
    pub rundown_error: Option<String>,
    /// detect-new promoted the current snapshot.
    pub promoted: bool,
}

/// External collaborators. `benchmark: None` means "build the vendor client from the
/// credentials file when first needed".
pub struct Collaborators {
    pub source: Arc<dyn ThemeSource>,
    pub runner: Arc<dyn CommandRunner>,
    pub benchmark: Option<Arc<dyn BenchmarkApi>>,
    pub index: Arc<dyn PostIndex>,
    pub http: Option<reqwest::Client>,
}

impl Collaborators {
    /// Catalog and post index stay live in a dry run since they only read.
    pub fn from_settings(
        settings: &Settings,
        dry_run: bool,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let source: Arc<dyn ThemeSource> = Arc::new(WpOrgCatalog::new(
            &settings.catalog.endpoint,
            &settings.catalog.browse,
        )?);
        let index: Arc<dyn PostIndex> = Arc::new(WpRestIndex::new(&settings.wordpress.url)?);
        if dry_run {
            return Ok(Self {
                source,
                runner: Arc::new(DryRunRunner::new()),
                benchmark: Some(Arc::new(DryRunBenchmark)),
                index,
                http: None,
            });
        }
        Ok(Self {
            source,
            runner: Arc::new(SystemRunner::new(cancel.clone())),
            benchmark: None,
            index,
            http: Some(AssetCache::default_client()?),
        })
    }
}

pub struct Pipeline {
    settings: Settings,
    dry_run: bool,
    cancel: CancellationToken,
    parts: Collaborators,
    publisher: Arc<Publisher>,
}

impl Pipeline {
    pub fn new(
        settings: Settings,
        dry_run: bool,
        cancel: CancellationToken,
        parts: Collaborators,
    ) -> Self {
        let publisher = Arc::new(Publisher::new(&settings, parts.runner.clone()));
        Self {
            settings,
            dry_run,
            cancel,
            parts,
            publisher,
        }
    }

    pub fn from_settings(settings: Settings, dry_run: bool, cancel: CancellationToken) -> Result<Self> {
        let parts = Collaborators::from_settings(&settings, dry_run, &cancel)?;
        Ok(Self::new(settings, dry_run, cancel, parts))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Batch summaries are logged even when the action fails part way.
    pub async fn run(&self, action: Action) -> Result<RunReport> {
        tracing::info!(action = action.as_str(), dry_run = self.dry_run, "starting");
        let mut report = RunReport::default();
        let outcome = self.dispatch(action, &mut report).await;
        for b in &report.batches {
            b.log();
        }
        outcome.map(|()| report)
    }

    async fn dispatch(&self, action: Action, report: &mut RunReport) -> Result<()> {
        match action {
            Action::GetFeatured => {
                let snap = fetch_and_store(
                    self.parts.source.as_ref(),
                    &self.settings.featured_path(),
                    "featured",
                )
                .await?;
                tracing::info!(themes = snap.themes.len(), path = %self.settings.featured_path().display(), "catalog stored");
            }
            Action::GenerateSites => {
                let themes = self.themes().await?;
                report.batches.push(self.generate_sites(&themes).await?);
            }
            Action::TestGt => {
                let themes = self.themes().await?;
                report.batches.push(self.test_sites(&themes).await?);
            }
            Action::PostPages => {
                let themes = self.themes().await?;
                report.batches.push(self.post_pages(&themes).await?);
            }
            Action::Cleanup => {
                let removed = self.provisioner().cleanup().await?;
                tracing::info!(sites = removed.len(), "cleanup finished");
            }
            Action::Rundown => {
                report.rundown_post = self.rundown().await?;
            }
            Action::Auto => {
                let themes = self.themes().await?;
                report.batches.push(self.process_all(&themes).await?);
                self.rundown_after_batch(report).await?;
            }
            Action::DetectNew => {
                self.detect_new(report).await?;
            }
        }
        Ok(())
    }

    async fn themes(&self) -> Result<Vec<CatalogEntry>> {
        load_theme_data(
            self.parts.source.as_ref(),
            &self.settings.featured_path(),
            &self.settings.catalog.excluded_slugs,
        )
        .await
    }

    fn provisioner(&self) -> SiteProvisioner {
        SiteProvisioner::new(&self.settings, self.parts.runner.clone())
    }

    fn benchmark_api(&self) -> Result<Arc<dyn BenchmarkApi>> {
        if let Some(api) = &self.parts.benchmark {
            return Ok(api.clone());
        }
        let b = &self.settings.benchmark;
        let creds = Credentials::load(&b.credentials_file)?;
        Ok(Arc::new(GtmetrixClient::new(&b.api_base, creds, &b.cookies)?))
    }

    fn benchmark_runner(&self, api: Arc<dyn BenchmarkApi>) -> BenchmarkRunner {
        BenchmarkRunner::new(
            api,
            ResultStore::new(&self.settings.paths.data_dir),
            &self.settings.paths.images_dir,
            PollPolicy::from_settings(&self.settings.benchmark),
            self.cancel.clone(),
        )
        .with_courtesy_delay(Duration::from_secs(self.settings.benchmark.courtesy_delay_secs))
    }

    fn assets(&self) -> AssetCache {
        AssetCache::new(
            &self.settings.paths.images_dir,
            self.parts.http.clone(),
            self.parts.runner.clone(),
        )
    }

    /// Run `step` per theme. Per-theme errors are recorded and the batch moves on;
    /// batch-fatal errors and cancellation end the batch.
    async fn for_each_theme<'a, F, Fut>(
        &self,
        stage: &'static str,
        themes: &'a [CatalogEntry],
        mut step: F,
    ) -> Result<BatchSummary>
    where
        F: FnMut(&'a CatalogEntry) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut summary = BatchSummary::new(stage);
        for theme in themes {
            if self.cancel.is_cancelled() {
                tracing::warn!(stage, "cancelled between themes");
                return Err(PipelineError::Cancelled);
            }
            match step(theme).await {
                Ok(()) => {
                    counter!("themetest_themes_total", "stage" => stage, "outcome" => "ok").increment(1);
                    summary.succeeded.push(theme.slug.clone());
                }
                Err(e) if e.is_batch_fatal() => {
                    tracing::error!(stage, slug = %theme.slug, error = %e, "aborting batch");
                    return Err(e);
                }
                Err(e) => {
                    counter!("themetest_themes_total", "stage" => stage, "outcome" => "skipped").increment(1);
                    tracing::warn!(stage, slug = %theme.slug, error = %e, "theme skipped");
                    summary.skipped.push(SkippedTheme {
                        slug: theme.slug.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(summary)
    }

    async fn generate_sites(&self, themes: &[CatalogEntry]) -> Result<BatchSummary> {
        let prov = &self.provisioner();
        self.for_each_theme("generate-sites", themes, move |t| async move {
            prov.provision(t).await.map(drop)
        })
        .await
    }

    async fn test_sites(&self, themes: &[CatalogEntry]) -> Result<BatchSummary> {
        let bench = &self.benchmark_runner(self.benchmark_api()?);
        let settings = &self.settings;
        self.for_each_theme("test-gt", themes, move |t| async move {
            let site = TestSite::for_settings(settings, t);
            bench.fetch_result(t, &site.url, false).await.map(drop)
        })
        .await
    }

    async fn post_pages(&self, themes: &[CatalogEntry]) -> Result<BatchSummary> {
        // Readonly: results come from the store, the vendor is never contacted.
        let bench = &self.benchmark_runner(Arc::new(DryRunBenchmark));
        let assets = &self.assets();
        let publisher = self.publisher.as_ref();
        let settings = &self.settings;
        self.for_each_theme("post-pages", themes, move |t| async move {
            let site = TestSite::for_settings(settings, t);
            let result = bench.fetch_result(t, &site.url, true).await?;
            let record = merge(t, &result)?;
            let image = assets.ensure_theme_screenshot(t).await?;
            publisher.publish_record(&record, &image).await.map(drop)
        })
        .await
    }

    /// provision -> benchmark -> screenshot -> merge -> publish, per theme.
    async fn process_all(&self, themes: &[CatalogEntry]) -> Result<BatchSummary> {
        let prov = &self.provisioner();
        let bench = &self.benchmark_runner(self.benchmark_api()?);
        let assets = &self.assets();
        let publisher = self.publisher.as_ref();
        self.for_each_theme("auto", themes, move |t| async move {
            let site = prov.provision(t).await?;
            let result = bench.fetch_result(t, &site.url, false).await?;
            let image = assets.ensure_theme_screenshot(t).await?;
            let record = merge(t, &result)?;
            let out = publisher.publish_record(&record, &image).await?;
            tracing::info!(slug = %t.slug, post_id = out.post_id, media_id = out.media_id, "theme published");
            Ok::<(), PipelineError>(())
        })
        .await
    }

    async fn rundown(&self) -> Result<Option<u64>> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let agg = RundownAggregator::new(
            &self.settings,
            self.parts.index.clone(),
            self.publisher.clone(),
            self.parts.runner.clone(),
        );
        let now = Local::now();
        let lookback = chrono::Duration::hours(i64::from(self.settings.rundown.lookback_hours));
        let digest = agg.build_digest(now, lookback).await?;
        agg.publish_digest(&digest, now).await
    }

    /// A rundown that fails for a non-fatal reason does not undo the published batch.
    async fn rundown_after_batch(&self, report: &mut RunReport) -> Result<()> {
        match self.rundown().await {
            Ok(post) => report.rundown_post = post,
            Err(e) if e.is_batch_fatal() => return Err(e),
            Err(e) => {
                counter!("themetest_posts_total", "kind" => "rundown_failed").increment(1);
                tracing::warn!(error = %e, "rundown failed, batch results kept");
                report.rundown_error = Some(e.to_string());
            }
        }
        Ok(())
    }

    async fn detect_new(&self, report: &mut RunReport) -> Result<()> {
        let detector = ChangeDetector::new(
            self.parts.source.clone(),
            self.settings.previous_snapshot_path(),
            self.settings.current_snapshot_path(),
            self.settings.catalog.excluded_slugs.clone(),
            LastRunMarker::new(self.settings.last_run_marker_path()),
        );
        let today = Local::now().date_naive();
        match detector.check(today).await? {
            Detection::AlreadyRanToday | Detection::NoChanges => {}
            Detection::Baseline { snapshot } => {
                if self.dry_run {
                    tracing::info!("dry run, baseline not stored");
                } else {
                    detector.commit(&snapshot, today, &[])?;
                    report.promoted = true;
                }
            }
            Detection::NewThemes { snapshot, new } => {
                tracing::info!(count = new.len(), "new themes detected, beginning test");
                let batch = self.process_all(&new).await?;
                // Skipped themes stay out of `previous` so the next check retries them.
                let held_back: Vec<String> = batch.skipped.iter().map(|s| s.slug.clone()).collect();
                report.batches.push(batch);
                self.rundown_after_batch(report).await?;
                if self.dry_run {
                    tracing::info!("dry run, snapshot not promoted");
                } else {
                    detector.commit(&snapshot, today, &held_back)?;
                    report.promoted = true;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn underscore_spellings_parse() {
        assert_eq!(Action::from_str("post_pages", false).unwrap(), Action::PostPages);
        assert_eq!(Action::from_str("detect-new", false).unwrap(), Action::DetectNew);
        assert_eq!(Action::from_str("test_gt", false).unwrap(), Action::TestGt);
        assert!(Action::from_str("archive", false).is_err());
    }

    #[test]
    fn action_names_round_trip() {
        for a in Action::value_variants() {
            assert_eq!(Action::from_str(a.as_str(), false).unwrap(), *a);
        }
    }
}
