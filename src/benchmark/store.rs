// src/benchmark/store.rs
use std::fs;
use std::path::PathBuf;

use crate::benchmark::types::TestStatus;
use crate::error::{PipelineError, Result};

/// Raw vendor results on disk, one `<instance>-test.log` JSON file per test site.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, instance: &str) -> PathBuf {
        self.dir.join(format!("{instance}-test.log"))
    }

    pub fn save(&self, instance: &str, status: &TestStatus) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| PipelineError::io(format!("creating {}", self.dir.display()), e))?;
        let path = self.path_for(instance);
        let json = serde_json::to_string_pretty(status)
            .map_err(|e| PipelineError::json("serializing benchmark result", e))?;
        fs::write(&path, json)
            .map_err(|e| PipelineError::io(format!("writing {}", path.display()), e))?;
        tracing::info!(path = %path.display(), "benchmark result saved");
        Ok(path)
    }

    pub fn load(&self, slug: &str, instance: &str) -> Result<TestStatus> {
        let path = self.path_for(instance);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::ResultNotCached {
                    slug: slug.to_string(),
                    path,
                })
            }
            Err(e) => return Err(PipelineError::io(format!("reading {}", path.display()), e)),
        };
        serde_json::from_str(&content).map_err(|e| PipelineError::json(path.display().to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::types::RunState;

    #[test]
    fn save_and_load_by_instance() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let mut st = TestStatus::pending(RunState::Completed);
        st.results.report_url = Some("https://gtmetrix.com/reports/x/abc".into());
        store.save("astra01", &st).unwrap();
        assert!(dir.path().join("astra01-test.log").exists());
        assert_eq!(store.load("astra", "astra01").unwrap(), st);
    }

    #[test]
    fn missing_result_is_typed() {
        let dir = tempfile::tempdir().unwrap();
        let err = ResultStore::new(dir.path()).load("neve", "neve01").unwrap_err();
        assert!(matches!(err, PipelineError::ResultNotCached { ref slug, .. } if slug == "neve"));
        assert!(!err.is_batch_fatal());
    }
}
