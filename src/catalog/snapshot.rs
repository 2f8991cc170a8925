// src/catalog/snapshot.rs
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::types::{CatalogEntry, CatalogResponse};
use crate::error::{PipelineError, Result};

/// A named, timestamped copy of the whole catalog, kept on disk for diffing across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub name: String,
    pub taken_at: DateTime<Utc>,
    pub themes: Vec<CatalogEntry>,
}

// Older files hold the raw catalog response instead of a snapshot.
#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotFile {
    Snapshot(CatalogSnapshot),
    Raw(CatalogResponse),
}

impl CatalogSnapshot {
    pub fn new(name: &str, themes: Vec<CatalogEntry>) -> Self {
        Self {
            name: name.to_string(),
            taken_at: Utc::now(),
            themes,
        }
    }

    pub fn slugs(&self) -> Vec<&str> {
        self.themes.iter().map(|t| t.slug.as_str()).collect()
    }

    /// Returns `Ok(None)` when the file does not exist yet.
    pub fn load(path: &Path, name: &str) -> Result<Option<Self>> {
        let content = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PipelineError::io(
                    format!("reading snapshot {}", path.display()),
                    e,
                ))
            }
        };
        let file: SnapshotFile = serde_json::from_str(&content)
            .map_err(|e| PipelineError::json(path.display().to_string(), e))?;
        let snap = match file {
            SnapshotFile::Snapshot(mut s) => {
                s.name = name.to_string();
                s
            }
            SnapshotFile::Raw(raw) => {
                let taken_at = fs::metadata(path)
                    .and_then(|m| m.modified())
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                Self {
                    name: name.to_string(),
                    taken_at,
                    themes: raw.themes,
                }
            }
        };
        tracing::info!(
            path = %path.display(),
            themes = snap.themes.len(),
            "snapshot loaded"
        );
        Ok(Some(snap))
    }

    /// Write to a temp file next to `path`, then rename over it.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| PipelineError::io(format!("creating {}", dir.display()), e))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::json("serializing snapshot", e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .map_err(|e| PipelineError::io(format!("writing {}", tmp.display()), e))?;
        fs::rename(&tmp, path)
            .map_err(|e| PipelineError::io(format!("renaming onto {}", path.display()), e))?;
        tracing::debug!(path = %path.display(), themes = self.themes.len(), "snapshot saved");
        Ok(())
    }
}
