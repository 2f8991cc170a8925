//! Daily check for themes that newly appeared in the catalog.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;

use crate::catalog::snapshot::CatalogSnapshot;
use crate::catalog::source::ThemeSource;
use crate::catalog::types::CatalogEntry;
use crate::catalog::{exclude_defaults, fetch_and_store};
use crate::error::{PipelineError, Result};

const MARKER_FORMAT: &str = "%Y%m%d";

/// Entries of `current` whose slug is absent from `previous`, in `current` order.
pub fn detect_new(previous: &[CatalogEntry], current: &[CatalogEntry]) -> Vec<CatalogEntry> {
    let seen: HashSet<&str> = previous.iter().map(|t| t.slug.as_str()).collect();
    current
        .iter()
        .filter(|t| !seen.contains(t.slug.as_str()))
        .cloned()
        .collect()
}

/// `YYYYMMDD` of the last day the detector acted on.
#[derive(Debug, Clone)]
pub struct LastRunMarker {
    path: PathBuf,
}

impl LastRunMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unparsable markers read as "never ran".
    pub fn read(&self) -> Option<NaiveDate> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let line = raw.lines().next()?.trim();
        match NaiveDate::parse_from_str(line, MARKER_FORMAT) {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), value = line, "ignoring bad last-run marker: {e}");
                None
            }
        }
    }

    pub fn write(&self, date: NaiveDate) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| PipelineError::io(format!("creating {}", dir.display()), e))?;
        }
        fs::write(&self.path, date.format(MARKER_FORMAT).to_string())
            .map_err(|e| PipelineError::io(format!("writing {}", self.path.display()), e))
    }
}

#[derive(Debug, Clone)]
pub enum Detection {
    /// The marker already holds today's date.
    AlreadyRanToday,
    /// No previous snapshot; `current` should become the baseline.
    Baseline { snapshot: CatalogSnapshot },
    NoChanges,
    NewThemes {
        snapshot: CatalogSnapshot,
        new: Vec<CatalogEntry>,
    },
}

pub struct ChangeDetector {
    source: Arc<dyn ThemeSource>,
    previous_path: PathBuf,
    current_path: PathBuf,
    excluded: Vec<String>,
    marker: LastRunMarker,
}

impl ChangeDetector {
    pub fn new(
        source: Arc<dyn ThemeSource>,
        previous_path: impl Into<PathBuf>,
        current_path: impl Into<PathBuf>,
        excluded: Vec<String>,
        marker: LastRunMarker,
    ) -> Self {
        Self {
            source,
            previous_path: previous_path.into(),
            current_path: current_path.into(),
            excluded,
            marker,
        }
    }

    /// Fetch the current catalog and diff it against the stored previous one.
    /// Nothing is promoted here; see [`ChangeDetector::commit`].
    pub async fn check(&self, today: NaiveDate) -> Result<Detection> {
        if let Some(last) = self.marker.read() {
            if last >= today {
                tracing::info!(%last, "already ran today, not checking");
                return Ok(Detection::AlreadyRanToday);
            }
        }

        let current = fetch_and_store(self.source.as_ref(), &self.current_path, "current").await?;
        let Some(previous) = CatalogSnapshot::load(&self.previous_path, "previous")? else {
            tracing::info!(path = %self.previous_path.display(), "no previous snapshot, taking a baseline");
            return Ok(Detection::Baseline { snapshot: current });
        };

        let new = exclude_defaults(detect_new(&previous.themes, &current.themes), &self.excluded);
        if new.is_empty() {
            tracing::info!(
                previous = previous.themes.len(),
                current = current.themes.len(),
                "no new themes detected"
            );
            return Ok(Detection::NoChanges);
        }
        for t in &new {
            tracing::info!(slug = %t.slug, "new theme detected");
        }
        Ok(Detection::NewThemes {
            snapshot: current,
            new,
        })
    }

    /// Make `snapshot` the new previous and stamp today's marker. Slugs in `held_back`
    /// are left out, so they are reported as new again on the next check.
    pub fn commit(&self, snapshot: &CatalogSnapshot, today: NaiveDate, held_back: &[String]) -> Result<()> {
        let mut promoted = snapshot.clone();
        promoted.name = "previous".into();
        promoted.themes.retain(|t| !held_back.contains(&t.slug));
        promoted.save(&self.previous_path)?;
        self.marker.write(today)?;
        tracing::info!(
            date = %today,
            themes = promoted.themes.len(),
            held_back = held_back.len(),
            "snapshot promoted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::source::FixtureCatalog;

    fn entry(slug: &str) -> CatalogEntry {
        serde_json::from_value(serde_json::json!({"slug": slug, "name": slug})).unwrap()
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn reports_current_minus_previous_in_order() {
        let prev = vec![entry("a"), entry("b")];
        let cur = vec![entry("c"), entry("a"), entry("d"), entry("b")];
        let slugs: Vec<_> = detect_new(&prev, &cur).into_iter().map(|t| t.slug).collect();
        assert_eq!(slugs, vec!["c", "d"]);
    }

    #[test]
    fn marker_round_trips_and_tolerates_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let m = LastRunMarker::new(dir.path().join("state/.lastrun"));
        assert_eq!(m.read(), None);
        m.write(day("2024-03-05")).unwrap();
        assert_eq!(fs::read_to_string(m.path()).unwrap(), "20240305");
        assert_eq!(m.read(), Some(day("2024-03-05")));
        fs::write(m.path(), "yesterday").unwrap();
        assert_eq!(m.read(), None);
    }

    #[tokio::test]
    async fn gate_and_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let marker = LastRunMarker::new(dir.path().join(".lastrun"));
        let det = ChangeDetector::new(
            Arc::new(FixtureCatalog::new(vec![entry("a")])),
            dir.path().join("lastfeatured.json"),
            dir.path().join("thisfeatured.json"),
            vec![],
            marker.clone(),
        );
        let today = day("2024-03-05");

        let Detection::Baseline { snapshot } = det.check(today).await.unwrap() else {
            panic!("expected baseline");
        };
        det.commit(&snapshot, today, &[]).unwrap();
        assert!(matches!(det.check(today).await.unwrap(), Detection::AlreadyRanToday));
        assert!(matches!(
            det.check(day("2024-03-06")).await.unwrap(),
            Detection::NoChanges
        ));
    }

    #[tokio::test]
    async fn held_back_slugs_are_reported_again() {
        let dir = tempfile::tempdir().unwrap();
        let prev = dir.path().join("lastfeatured.json");
        CatalogSnapshot::new("previous", vec![entry("a")]).save(&prev).unwrap();
        let det = ChangeDetector::new(
            Arc::new(FixtureCatalog::new(vec![entry("a"), entry("b"), entry("c")])),
            &prev,
            dir.path().join("thisfeatured.json"),
            vec![],
            LastRunMarker::new(dir.path().join(".lastrun")),
        );

        let Detection::NewThemes { snapshot, .. } = det.check(day("2024-03-05")).await.unwrap() else {
            panic!("expected new themes");
        };
        det.commit(&snapshot, day("2024-03-05"), &["c".to_string()]).unwrap();

        let Detection::NewThemes { new, .. } = det.check(day("2024-03-06")).await.unwrap() else {
            panic!("expected the held back theme");
        };
        let slugs: Vec<_> = new.iter().map(|t| t.slug.as_str()).collect();
        assert_eq!(slugs, vec!["c"]);
    }
}
