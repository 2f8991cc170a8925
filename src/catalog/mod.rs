// src/catalog/mod.rs
//! Theme catalog: fetching, filtering and persisting the candidate theme list.

pub mod snapshot;
pub mod source;
pub mod types;

use std::path::Path;

use crate::catalog::snapshot::CatalogSnapshot;
use crate::catalog::source::ThemeSource;
use crate::catalog::types::CatalogEntry;
use crate::error::Result;

use once_cell::sync::Lazy;
use regex::Regex;

// Slugs end up in file names, URLs and `wp` arguments.
static SAFE_SLUG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]*$").expect("valid slug regex"));

pub fn is_safe_slug(slug: &str) -> bool {
    SAFE_SLUG.is_match(slug) && !slug.contains("..")
}

/// Drop bundled default themes (case-insensitive slug match) and entries whose slug
/// is unusable as a path component, keeping order.
pub fn exclude_defaults(themes: Vec<CatalogEntry>, excluded: &[String]) -> Vec<CatalogEntry> {
    let before = themes.len();
    let kept: Vec<CatalogEntry> = themes
        .into_iter()
        .filter(|t| !excluded.iter().any(|x| x.eq_ignore_ascii_case(&t.slug)))
        .filter(|t| {
            let ok = is_safe_slug(&t.slug);
            if !ok {
                tracing::warn!(slug = %t.slug, "skipping theme with unusable slug");
            }
            ok
        })
        .collect();
    if kept.len() != before {
        tracing::debug!(excluded = before - kept.len(), "excluded themes");
    }
    kept
}

fn log_catalog(themes: &[CatalogEntry]) {
    for t in themes {
        tracing::info!(slug = %t.slug, updated = %t.last_updated, "{}", t.name);
    }
    tracing::info!(total = themes.len(), "catalog decoded");
}

/// Fetch the catalog and store it at `path` as a snapshot named `name`.
pub async fn fetch_and_store(
    source: &dyn ThemeSource,
    path: &Path,
    name: &str,
) -> Result<CatalogSnapshot> {
    let themes = source.fetch_themes().await?;
    tracing::debug!(source = source.name(), path = %path.display(), "catalog fetched");
    log_catalog(&themes);
    let snap = CatalogSnapshot::new(name, themes);
    snap.save(path)?;
    Ok(snap)
}

/// Themes to process: the stored catalog file when present, otherwise a fresh fetch
/// (which is then stored). Excluded slugs are always removed.
pub async fn load_theme_data(
    source: &dyn ThemeSource,
    path: &Path,
    excluded: &[String],
) -> Result<Vec<CatalogEntry>> {
    let snap = match CatalogSnapshot::load(path, "featured")? {
        Some(s) => s,
        None => fetch_and_store(source, path, "featured").await?,
    };
    Ok(exclude_defaults(snap.themes, excluded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::source::FixtureCatalog;

    fn entry(slug: &str) -> CatalogEntry {
        serde_json::from_value(serde_json::json!({"slug": slug, "name": slug})).unwrap()
    }

    #[test]
    fn default_theme_is_excluded_case_insensitively() {
        let out = exclude_defaults(
            vec![entry("astra"), entry("TwentySeventeen"), entry("neve")],
            &["twentyseventeen".to_string()],
        );
        let slugs: Vec<_> = out.iter().map(|t| t.slug.as_str()).collect();
        assert_eq!(slugs, vec!["astra", "neve"]);
    }

    #[tokio::test]
    async fn load_theme_data_fetches_once_then_reuses_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("featured.json");
        let source = FixtureCatalog::new(vec![entry("astra"), entry("twentyseventeen")]);

        let first = load_theme_data(&source, &path, &["twentyseventeen".into()])
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(path.exists());

        // An empty source proves the second call reads the stored file.
        let empty = FixtureCatalog::new(vec![]);
        let second = load_theme_data(&empty, &path, &["twentyseventeen".into()])
            .await
            .unwrap();
        assert_eq!(second, first);
    }
}
