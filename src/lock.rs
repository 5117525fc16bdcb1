//! File locking and atomic writes for the file-backed store.
//!
//! Collection files may be read and written by several processes embedding
//! the crate, so every write goes through:
//! 1. an exclusive flock on `<path>.lock` (fs2)
//! 2. write to a temp file in the same directory
//! 3. atomic rename onto the target

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{Error, Result};

/// Default lock timeout in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

const LOCK_RETRY_INTERVAL_MS: u64 = 50;

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    // On Windows, fs2 can surface lock/sharing violations as "Other".
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// A file lock guard that releases the lock when dropped
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Acquire an exclusive lock with a timeout, creating the lock file if
    /// needed. Fails with `LockFailed` once the timeout elapses.
    pub fn acquire(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        let retry_interval = Duration::from_millis(LOCK_RETRY_INTERVAL_MS);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(FileLock { file });
                }
                Err(e) if is_lock_contended(&e) => {
                    if start.elapsed() >= timeout {
                        return Err(Error::LockFailed(path.to_path_buf()));
                    }
                    std::thread::sleep(retry_interval);
                }
                Err(e) => {
                    return Err(Error::Io(e));
                }
            }
        }
    }

}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Write data to a temp file in the target's directory, then rename it onto
/// the target. The file is either fully written or untouched.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Temp file must live in the same directory for the rename to be atomic.
    let temp_path = path.with_extension(format!(
        "{}.tmp.{}",
        path.extension().and_then(|e| e.to_str()).unwrap_or(""),
        std::process::id()
    ));

    let mut temp_file = File::create(&temp_path)?;
    temp_file.write_all(data)?;
    temp_file.sync_all()?;
    drop(temp_file);

    fs::rename(&temp_path, path)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_replaces_contents() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("trackers.json");

        write_atomic(&file_path, b"[]").unwrap();
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "[]");

        write_atomic(&file_path, b"[{\"id\":\"t1\"}]").unwrap();
        assert_eq!(fs::read_to_string(&file_path).unwrap(), "[{\"id\":\"t1\"}]");
    }

    #[test]
    fn lock_is_exclusive_until_dropped() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("store.lock");

        let lock = FileLock::acquire(&lock_path, 1000).unwrap();
        let contended = FileLock::acquire(&lock_path, 50);
        assert!(matches!(contended, Err(Error::LockFailed(_))));

        drop(lock);
        assert!(FileLock::acquire(&lock_path, 1000).is_ok());
    }

    #[test]
    fn lock_serializes_read_modify_write_cycles() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("sub_tasks.json");
        let lock_path = temp_dir.path().join("sub_tasks.json.lock");
        write_atomic(&file_path, b"[]").unwrap();

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let mut handles = Vec::with_capacity(threads);

        for idx in 0..threads {
            let barrier = Arc::clone(&barrier);
            let file_path = file_path.clone();
            let lock_path = lock_path.clone();

            handles.push(thread::spawn(move || {
                barrier.wait();
                // Same shape as the JSON store: lock, read, rewrite, rename.
                let _lock = FileLock::acquire(&lock_path, 5000).unwrap();
                let raw = fs::read_to_string(&file_path).unwrap();
                let mut entries: Vec<usize> = serde_json::from_str(&raw).unwrap();
                entries.push(idx);
                let data = serde_json::to_vec(&entries).unwrap();
                write_atomic(&file_path, &data).unwrap();
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        // Every writer's entry survived; no read-modify-write was lost.
        let raw = fs::read_to_string(&file_path).unwrap();
        let mut entries: Vec<usize> = serde_json::from_str(&raw).unwrap();
        entries.sort_unstable();
        assert_eq!(entries, (0..threads).collect::<Vec<_>>());
    }
}
