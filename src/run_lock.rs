use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Exclusive lock file held for the lifetime of a run. Removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| PipelineError::io(format!("creating {}", dir.display()), e))?;
        }
        let mut file = match create(path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(path).unwrap_or_default();
                match holder.trim().parse::<u32>() {
                    Ok(pid) if !process_alive(pid) => {
                        tracing::warn!(path = %path.display(), pid, "removing stale run lock");
                        fs::remove_file(path).map_err(|e| {
                            PipelineError::io(format!("removing {}", path.display()), e)
                        })?;
                        create(path).map_err(|e| match e.kind() {
                            ErrorKind::AlreadyExists => PipelineError::Locked {
                                path: path.to_path_buf(),
                            },
                            _ => PipelineError::io(format!("creating {}", path.display()), e),
                        })?
                    }
                    _ => {
                        tracing::error!(path = %path.display(), holder = holder.trim(), "run lock is held");
                        return Err(PipelineError::Locked {
                            path: path.to_path_buf(),
                        });
                    }
                }
            }
            Err(e) => return Err(PipelineError::io(format!("creating {}", path.display()), e)),
        };
        // Holder pid, for whoever finds a stale lock.
        let _ = writeln!(file, "{}", std::process::id());
        tracing::debug!(path = %path.display(), "run lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn create(path: &Path) -> std::io::Result<fs::File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// Without /proc every holder counts as alive.
#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), "failed to remove run lock: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_first_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/themetest.lock");
        let first = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        assert!(err.is_batch_fatal());
        assert!(matches!(err, PipelineError::Locked { .. }));
        drop(first);
        assert!(!path.exists());
        let _again = RunLock::acquire(&path).unwrap();
    }

    #[test]
    fn unparseable_holder_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("themetest.lock");
        fs::write(&path, "").unwrap();
        assert!(matches!(RunLock::acquire(&path), Err(PipelineError::Locked { .. })));
        assert!(path.exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn lock_left_by_dead_process_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("themetest.lock");
        // Above the kernel's pid_max ceiling, so never a live process.
        fs::write(&path, "4194305\n").unwrap();
        let lock = RunLock::acquire(&path).unwrap();
        let holder = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(holder.trim(), std::process::id().to_string());
    }
}
