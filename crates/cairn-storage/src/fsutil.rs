use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fs2::FileExt;

use crate::error::{Result, StorageError};

/// RAII guard around an advisory exclusive lock on a sibling `.lock` file
/// (§4.3 step 1/6: acquired before the read-modify-write, released on every
/// exit path including `Drop`).
pub struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Acquires an exclusive lock on `<path>.lock`, retrying up to `retries`
/// times with a `retry_delay` backoff before surfacing contention as
/// [`StorageError::ResourceUnavailable`] (§4.3: "`EAGAIN` on lock contention
/// surfaces as `INTERNAL_ERROR`"). The budget comes from
/// [`crate::StorageConfig`] rather than a fixed constant, so a host under
/// heavier lock contention can widen it.
///
/// Blocking: callers run this inside `spawn_blocking`.
pub fn lock_exclusive(path: &Path, retries: u32, retry_delay: Duration) -> Result<LockGuard> {
    let lock_path = lock_path_for(path);
    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)?;

    for attempt in 0..retries {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(LockGuard { file }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if attempt + 1 == retries {
                    return Err(StorageError::ResourceUnavailable(format!(
                        "lock on {} is held by another writer",
                        path.display()
                    )));
                }
                std::thread::sleep(retry_delay);
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("loop either returns or errors before exhausting retries")
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// Renames `tmp` onto `target`, tolerating platforms (Windows) where
/// renaming onto an existing file is rejected outright: on failure, moves
/// the previous target aside, retries the rename, then unlinks the
/// displaced file (§4.3 step 5, §9 "Windows rename quirk" — detected by
/// trying the plain rename first, never gated on `cfg(windows)`).
pub fn atomic_rename(tmp: &Path, target: &Path) -> Result<()> {
    match fs::rename(tmp, target) {
        Ok(()) => Ok(()),
        Err(_) if target.exists() => {
            let displaced = target.with_extension(format!(
                "displaced-{}",
                std::process::id()
            ));
            fs::rename(target, &displaced)?;
            fs::rename(tmp, target)?;
            let _ = fs::remove_file(&displaced);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Maps a filesystem error encountered while resolving `name` to the
/// taxonomy in §7 (`ENOENT` → `NotFound`, everything else passes through).
pub fn map_io_error(name: &str, err: io::Error) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(name.to_string())
    } else {
        StorageError::Io(err)
    }
}
