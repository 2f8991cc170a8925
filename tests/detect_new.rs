// tests/detect_new.rs
use std::sync::Arc;

use chrono::NaiveDate;
use themetest::catalog::snapshot::CatalogSnapshot;
use themetest::catalog::source::FixtureCatalog;
use themetest::catalog::types::CatalogEntry;
use themetest::change_detector::{detect_new, ChangeDetector, Detection, LastRunMarker};

fn entry(slug: &str) -> CatalogEntry {
    serde_json::from_value(serde_json::json!({"slug": slug, "name": slug.to_uppercase()})).unwrap()
}

fn entries(slugs: &[&str]) -> Vec<CatalogEntry> {
    slugs.iter().map(|s| entry(s)).collect()
}

#[test]
fn added_entry_is_reported() {
    let new = detect_new(&entries(&["a", "b", "c"]), &entries(&["a", "b", "c", "d"]));
    let slugs: Vec<_> = new.iter().map(|t| t.slug.as_str()).collect();
    assert_eq!(slugs, vec!["d"]);
}

#[test]
fn removed_entries_are_not_reported() {
    assert!(detect_new(&entries(&["a", "b", "c"]), &entries(&["a", "b"])).is_empty());
}

#[tokio::test]
async fn new_themes_are_promoted_only_on_commit() {
    let dir = tempfile::tempdir().unwrap();
    let prev_path = dir.path().join("lastfeatured.json");
    let cur_path = dir.path().join("thisfeatured.json");
    CatalogSnapshot::new("previous", entries(&["a", "b", "c"]))
        .save(&prev_path)
        .unwrap();

    let marker = LastRunMarker::new(dir.path().join(".lastrun"));
    let det = ChangeDetector::new(
        Arc::new(FixtureCatalog::new(entries(&["a", "twentyseventeen", "b", "c", "d"]))),
        &prev_path,
        &cur_path,
        vec!["twentyseventeen".into()],
        marker.clone(),
    );
    let today = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

    let Detection::NewThemes { snapshot, new } = det.check(today).await.unwrap() else {
        panic!("expected new themes");
    };
    assert_eq!(new.len(), 1);
    assert_eq!(new[0].slug, "d");
    assert!(cur_path.exists());

    // Not committed yet: previous untouched, no marker.
    let prev = CatalogSnapshot::load(&prev_path, "previous").unwrap().unwrap();
    assert_eq!(prev.themes.len(), 3);
    assert_eq!(marker.read(), None);

    det.commit(&snapshot, today, &[]).unwrap();
    let prev = CatalogSnapshot::load(&prev_path, "previous").unwrap().unwrap();
    assert_eq!(prev.themes.len(), 5);
    assert_eq!(marker.read(), Some(today));
    assert!(matches!(det.check(today).await.unwrap(), Detection::AlreadyRanToday));
}
