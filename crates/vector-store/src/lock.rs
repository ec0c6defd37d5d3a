use crate::error::Result;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Exclusive advisory lock on a file, shared with other processes.
///
/// The OS releases the lock when the holder exits, so a crashed process never
/// leaves the lock behind.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Takes the lock if it is free; `Ok(None)` when another holder has it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let file = open_lock_file(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                log::debug!("Acquired lock {}", path.display());
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(err) if err.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Waits for the lock without blocking the async runtime.
    pub async fn acquire(path: &Path) -> Result<Self> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || -> Result<Self> {
            let file = open_lock_file(&path)?;
            file.lock_exclusive()?;
            Ok(Self { file, path })
        })
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        log::debug!("Released lock {}", self.path.display());
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_holder_is_locked_out_until_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.lock");

        let first = FileLock::try_acquire(&path).unwrap().unwrap();
        assert!(FileLock::try_acquire(&path).unwrap().is_none());

        drop(first);
        assert!(FileLock::try_acquire(&path).unwrap().is_some());
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.lock");
        let held = FileLock::try_acquire(&path).unwrap().unwrap();

        let waiter = {
            let path = path.clone();
            tokio::spawn(async move { FileLock::acquire(&path).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        drop(held);
        let lock = waiter.await.unwrap().unwrap();
        assert_eq!(lock.path(), path.as_path());
    }
}
