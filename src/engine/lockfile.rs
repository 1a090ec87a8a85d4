use crate::error::Result;
use std::path::PathBuf;
use tracing::warn;

/// Advisory lock under the state directory holding the daemon's PID.
/// Cooperating tools (auto-committers and the like) check for its presence
/// before mutating the working tree. Released on shutdown and on drop.
pub struct Lockfile {
    path: PathBuf,
}

impl Lockfile {
    pub fn acquire(path: PathBuf) -> Result<Self> {
        if path.exists() {
            // a previous daemon crashed or is still running; the lock is
            // advisory, so take it over but say so
            warn!(path = %path.display(), "stale lockfile found, replacing it");
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, std::process::id().to_string())?;
        Ok(Self { path })
    }

    pub fn release(self) {
        // Drop does the work
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "could not remove lockfile");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lockfile_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".sync.lock");

        let lock = Lockfile::acquire(path.clone()).unwrap();
        let pid: u32 = std::fs::read_to_string(&path).unwrap().parse().unwrap();
        assert_eq!(pid, std::process::id());

        lock.release();
        assert!(!path.exists());
    }
}
