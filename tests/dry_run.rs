// tests/dry_run.rs
use std::path::Path;
use std::sync::Arc;

use themetest::benchmark::DryRunBenchmark;
use themetest::catalog::snapshot::CatalogSnapshot;
use themetest::catalog::source::{parse_catalog, FixtureCatalog};
use themetest::config::Settings;
use themetest::pipeline::Collaborators;
use themetest::process::DryRunRunner;
use themetest::publish::DRY_RUN_POST_ID;
use themetest::rundown::{FixtureIndex, PublishedPost};
use themetest::{Action, Pipeline};
use tokio_util::sync::CancellationToken;

const FEATURED: &str = include_str!("fixtures/featured.json");

fn settings(root: &Path) -> Settings {
    let mut s = Settings::default();
    s.paths.testsite_basedir = root.join("sites");
    s.paths.images_dir = root.join("theme-images");
    s.paths.data_dir = root.join("data");
    s.paths.tmp_dir = root.join("tmp");
    s.paths.state_dir = root.join("state");
    s
}

fn pipeline(root: &Path, runner: Arc<DryRunRunner>) -> Pipeline {
    let index = FixtureIndex::new(vec![
        PublishedPost {
            id: 101,
            slug: "astra-wordpress-theme-performance".into(),
        },
        PublishedPost {
            id: 102,
            slug: "kadence-child-wordpress-theme-performance".into(),
        },
    ]);
    let parts = Collaborators {
        source: Arc::new(FixtureCatalog::from_json(FEATURED).unwrap()),
        runner,
        benchmark: Some(Arc::new(DryRunBenchmark)),
        index: Arc::new(index),
        http: None,
    };
    Pipeline::new(settings(root), true, CancellationToken::new(), parts)
}

#[tokio::test]
async fn auto_touches_nothing_outside_the_command_log() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(DryRunRunner::new());
    let p = pipeline(dir.path(), runner.clone());

    let report = p.run(Action::Auto).await.unwrap();

    let batch = &report.batches[0];
    assert_eq!(batch.succeeded, vec!["astra", "kadence-child"]);
    assert_eq!(batch.skipped.len(), 1);
    assert_eq!(batch.skipped[0].slug, "neve");
    assert_eq!(report.rundown_post, Some(DRY_RUN_POST_ID));

    let calls = runner.calls();
    assert!(calls
        .iter()
        .all(|c| ["wp", "convert", "montage"].contains(&c.program.as_str())));
    // 6 provisioning steps + 1 conversion per theme, 1 post + 46 meta + 1 media per
    // published theme, then post + montage + media for the rundown.
    assert_eq!(calls.len(), 3 * 7 + 2 * 48 + 3);

    let data = dir.path().join("data");
    let logs: Vec<_> = std::fs::read_dir(&data)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with("-test.log"))
        .collect();
    assert!(logs.is_empty());
    assert!(!dir.path().join("sites").exists());
    assert!(!dir.path().join("tmp").exists());
}

#[tokio::test]
async fn post_pages_without_stored_results_skips_every_theme() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(DryRunRunner::new());
    let p = pipeline(dir.path(), runner.clone());

    let report = p.run(Action::PostPages).await.unwrap();
    let batch = &report.batches[0];
    assert!(batch.succeeded.is_empty());
    assert_eq!(batch.skipped.len(), 3);
    assert!(batch.skipped[0].reason.contains("no stored benchmark result"));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn detect_new_in_dry_run_never_promotes() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(DryRunRunner::new());
    let p = pipeline(dir.path(), runner.clone());

    let previous_path = p.settings().previous_snapshot_path();
    let mut first = parse_catalog("fixture", FEATURED).unwrap();
    first.truncate(1);
    CatalogSnapshot::new("previous", first).save(&previous_path).unwrap();

    let report = p.run(Action::DetectNew).await.unwrap();
    assert!(!report.promoted);
    let batch = &report.batches[0];
    assert_eq!(batch.succeeded, vec!["kadence-child"]);
    assert_eq!(batch.skipped[0].slug, "neve");

    let prev = CatalogSnapshot::load(&previous_path, "previous").unwrap().unwrap();
    assert_eq!(prev.slugs(), vec!["astra"]);
    assert!(!p.settings().last_run_marker_path().exists());
}

#[tokio::test]
async fn cleanup_with_no_sites_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(DryRunRunner::new());
    let p = pipeline(dir.path(), runner.clone());
    p.run(Action::Cleanup).await.unwrap();
    assert!(runner.calls().is_empty());
}
