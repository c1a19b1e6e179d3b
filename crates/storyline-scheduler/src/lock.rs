//! Advisory lock file guarding the state file.
//!
//! The lock is `<state>.lock`, created with `create_new` and held with an
//! `fs2` exclusive lock for as long as the guard lives. Its contents record
//! who took it and when, so a waiter can evict a lock whose holder crashed.
//! A waiter only evicts when it can take the `fs2` lock on the old file
//! itself, which a live holder prevents.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::StoreError;

/// Timing knobs for lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// Give up after waiting this long for another holder.
    pub wait: Duration,
    /// A lock older than this is assumed abandoned and evicted.
    pub stale_after: Duration,
    /// How often to re-check a held lock.
    pub poll_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(10),
            stale_after: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Contents of the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockMetadata {
    pid: u32,
    token: String,
    acquired_at: DateTime<Utc>,
}

/// What a waiter saw when it looked at someone else's lock.
#[derive(Debug, Clone)]
struct Observed {
    age: Duration,
    /// `None` when the contents could not be parsed (age is then by mtime).
    token: Option<String>,
}

/// A held lock.
///
/// Call [`FileLock::release`] on the normal path; dropping releases
/// synchronously, which covers early returns and panics.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: Option<File>,
    path: PathBuf,
    token: String,
}

impl FileLock {
    /// Acquire the lock, waiting up to `config.wait` and evicting stale holders.
    pub(crate) async fn acquire(path: &Path, config: &LockConfig) -> Result<Self, StoreError> {
        let started = Instant::now();

        loop {
            if let Some(lock) = blocking(path, try_acquire).await? {
                debug!(path = %path.display(), "acquired state lock");
                return Ok(lock);
            }

            if let Some(seen) = blocking(path, inspect).await?
                && seen.age >= config.stale_after
            {
                let stale_after = config.stale_after;
                if blocking(path, move |p| evict(p, &seen, stale_after)).await? {
                    continue;
                }
            }

            if started.elapsed() >= config.wait {
                return Err(StoreError::LockTimeout {
                    path: path.to_path_buf(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }

            sleep(config.poll_interval).await;
        }
    }

    /// Check that the lock file on disk is still ours.
    ///
    /// Fails if a waiter evicted us as stale; writing after that would race
    /// the new holder.
    pub(crate) async fn verify(&self) -> Result<(), StoreError> {
        let token = self.token.clone();
        let ours = blocking(&self.path, move |p| Ok(holds_token(p, &token))).await?;
        if ours {
            Ok(())
        } else {
            Err(StoreError::LockLost(self.path.clone()))
        }
    }

    /// Unlock and remove the lock file off the async runtime.
    pub(crate) async fn release(mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        let token = self.token.clone();
        let result = blocking(&self.path, move |p| {
            release_blocking(file, p, &token);
            Ok(())
        })
        .await;
        if let Err(e) = result {
            warn!(path = %self.path.display(), error = %e, "failed to release state lock");
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            release_blocking(file, &self.path, &self.token);
        }
    }
}

/// Run a filesystem step on the blocking pool.
async fn blocking<T, F>(path: &Path, f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&Path) -> Result<T, StoreError> + Send + 'static,
{
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || f(&owned))
        .await
        .map_err(|e| StoreError::io(path, std::io::Error::other(e)))?
}

fn try_acquire(path: &Path) -> Result<Option<FileLock>, StoreError> {
    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    if let Err(e) = FileExt::try_lock_exclusive(&file) {
        let _ = fs::remove_file(path);
        // A waiter checking whether this file is stale holds it briefly.
        if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
            return Ok(None);
        }
        return Err(StoreError::io(path, e));
    }

    let metadata = LockMetadata {
        pid: std::process::id(),
        token: uuid::Uuid::new_v4().to_string(),
        acquired_at: Utc::now(),
    };

    let written = serde_json::to_vec(&metadata)
        .map_err(std::io::Error::other)
        .and_then(|json| file.write_all(&json))
        .and_then(|()| file.sync_all());
    if let Err(e) = written {
        let _ = fs::remove_file(path);
        return Err(StoreError::io(path, e));
    }

    Ok(Some(FileLock {
        file: Some(file),
        path: path.to_path_buf(),
        token: metadata.token,
    }))
}

/// Look at an existing lock without touching it.
fn inspect(path: &Path) -> Result<Option<Observed>, StoreError> {
    match File::open(path) {
        Ok(file) => Ok(Some(observe(&file))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Age and token of an open lock file, by its recorded timestamp or else its mtime.
fn observe(mut file: &File) -> Observed {
    let mut bytes = Vec::new();
    let metadata = file
        .read_to_end(&mut bytes)
        .ok()
        .and_then(|_| serde_json::from_slice::<LockMetadata>(&bytes).ok());

    if let Some(meta) = metadata {
        return Observed {
            age: (Utc::now() - meta.acquired_at)
                .to_std()
                .unwrap_or(Duration::ZERO),
            token: Some(meta.token),
        };
    }

    let age = file
        .metadata()
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .unwrap_or(Duration::ZERO);
    Observed { age, token: None }
}

/// Remove an abandoned lock. Returns true if the path may now be free.
///
/// The old file must still be the one judged stale (same token, still old)
/// and nobody may hold its `fs2` lock. Holding that lock ourselves while
/// renaming means no other waiter can evict or replace it underneath us.
fn evict(path: &Path, seen: &Observed, stale_after: Duration) -> Result<bool, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    if FileExt::try_lock_exclusive(&file).is_err() {
        debug!(path = %path.display(), "old lock is still held, not evicting");
        return Ok(false);
    }

    let current = observe(&file);
    if current.token != seen.token || current.age < stale_after {
        let _ = FileExt::unlock(&file);
        return Ok(false);
    }

    let tombstone = path.with_extension(format!("stale-{}", uuid::Uuid::new_v4()));
    let renamed = fs::rename(path, &tombstone);
    let _ = FileExt::unlock(&file);

    match renamed {
        Ok(()) => {
            warn!(
                path = %path.display(),
                token = ?current.token,
                age_secs = current.age.as_secs(),
                "evicted stale state lock"
            );
            let _ = fs::remove_file(&tombstone);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to evict stale lock");
            Ok(false)
        }
    }
}

fn holds_token(path: &Path, token: &str) -> bool {
    File::open(path)
        .ok()
        .and_then(|file| observe(&file).token)
        .is_some_and(|t| t == token)
}

fn release_blocking(file: File, path: &Path, token: &str) {
    let _ = FileExt::unlock(&file);
    // Only remove the file if it is still ours.
    if holds_token(path, token)
        && let Err(e) = fs::remove_file(path)
    {
        warn!(path = %path.display(), error = %e, "failed to remove lock file");
    }
    debug!(path = %path.display(), "released state lock");
}
