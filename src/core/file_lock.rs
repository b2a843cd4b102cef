//! flock(2) guards for the audit log and node counters.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Exclusive lock held until drop; closing the file releases it.
pub struct FileLock {
    _file: File,
}

impl FileLock {
    /// Block until the lock at `path` is ours.
    pub fn exclusive(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()
            .with_context(|| format!("acquire lock {}", path.display()))?;
        Ok(Self { _file: file })
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create lock directory {}", parent.display()))?;
        }
    }
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("open lock file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_second_holder_waits_for_release() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("counter.lock");
        let held = FileLock::exclusive(&lock_path).unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let waiter = {
            let lock_path = lock_path.clone();
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _lock = FileLock::exclusive(&lock_path).unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(100));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(held);
        waiter.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let lock_path = dir.path().join("nested/audit.lock");
        drop(FileLock::exclusive(&lock_path).unwrap());
        assert!(lock_path.exists());
    }
}
