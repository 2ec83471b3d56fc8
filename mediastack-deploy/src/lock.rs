//! PID-file run lock: one mutating mediastack invocation at a time.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use mediastack_core::atomic::ensure_private_dir;
use mediastack_core::paths::lock_path;

use crate::error::{io_err, DeployError};

/// Held for the lifetime of the value; the PID file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock under `root`. A lock left by a process that no longer
    /// exists is reclaimed.
    pub fn acquire_at(root: &Path) -> Result<Self, DeployError> {
        let path = lock_path(root);
        if let Some(parent) = path.parent() {
            ensure_private_dir(parent)?;
        }

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id()).map_err(|e| io_err(&path, e))?;
                    tracing::debug!(path = %path.display(), "run lock acquired");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let holder = read_pid(&path);
                    match holder {
                        Some(pid) if pid_alive(pid) => {
                            return Err(DeployError::Locked { path, pid });
                        }
                        _ => {
                            tracing::warn!(
                                path = %path.display(),
                                pid = ?holder,
                                "reclaiming stale run lock"
                            );
                            std::fs::remove_file(&path).map_err(|e| io_err(&path, e))?;
                        }
                    }
                }
                Err(e) => return Err(io_err(&path, e)),
            }
        }
        Err(DeployError::Locked {
            pid: read_pid(&path).unwrap_or_default(),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // The root may already be gone after a hard reset.
        let _ = std::fs::remove_file(&self.path);
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn pid_alive(pid: u32) -> bool {
    pid == std::process::id() || Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_while_held() {
        let root = TempDir::new().unwrap();
        let lock = RunLock::acquire_at(root.path()).unwrap();
        assert!(lock.path().exists());
        let err = RunLock::acquire_at(root.path()).unwrap_err();
        assert!(matches!(err, DeployError::Locked { pid, .. } if pid == std::process::id()));
        drop(lock);
        assert!(!lock_path(root.path()).exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stale_lock_is_reclaimed() {
        let root = TempDir::new().unwrap();
        let path = lock_path(root.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        // PIDs are capped well below this on Linux.
        std::fs::write(&path, "4194304999\n").unwrap();
        let lock = RunLock::acquire_at(root.path()).unwrap();
        assert_eq!(read_pid(lock.path()), Some(std::process::id()));
    }

    #[test]
    fn garbage_lock_is_reclaimed() {
        let root = TempDir::new().unwrap();
        let path = lock_path(root.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not a pid").unwrap();
        assert!(RunLock::acquire_at(root.path()).is_ok());
    }
}
