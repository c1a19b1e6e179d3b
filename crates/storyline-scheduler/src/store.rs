//! JSON state file with locked read-modify-write.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::lock::{FileLock, LockConfig};
use crate::{StoreError, Story};

const STATE_VERSION: u32 = 1;

/// On-disk layout of the state file.
#[derive(Debug, Serialize, Deserialize)]
struct StateFile {
    version: u32,
    #[serde(default)]
    stories: Vec<Story>,
}

/// The shared story collection, persisted as one JSON file.
///
/// Every mutation rewrites the whole file through a temp file and rename,
/// so readers never see a partial write. Writers are serialized by an
/// advisory lock file next to the state file.
#[derive(Debug, Clone)]
pub struct StoryStore {
    path: PathBuf,
    lock_path: PathBuf,
    config: LockConfig,
}

impl StoryStore {
    pub fn new(path: impl Into<PathBuf>, config: LockConfig) -> Self {
        let path = path.into();
        let mut lock_name = path.clone().into_os_string();
        lock_name.push(".lock");

        Self {
            path,
            lock_path: PathBuf::from(lock_name),
            config,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Read the current snapshot. A missing file is an empty collection.
    pub async fn load(&self) -> Result<Vec<Story>, StoreError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let state: StateFile =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        Ok(state.stories)
    }

    /// Look up one story in the current snapshot.
    pub async fn get(&self, id: &str) -> Result<Story, StoreError> {
        self.load()
            .await?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Lock, read, apply `f`, write back, unlock.
    ///
    /// Nothing is written if `f` fails or leaves the collection unchanged.
    /// The lock is released on every path out of this function, including
    /// a panic inside `f`.
    pub async fn mutate<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Story>) -> Result<T, StoreError>,
    {
        self.ensure_parent_dir().await?;
        let lock = FileLock::acquire(&self.lock_path, &self.config).await?;
        let result = self.mutate_locked(&lock, f).await;
        lock.release().await;
        result
    }

    async fn mutate_locked<T, F>(&self, lock: &FileLock, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Story>) -> Result<T, StoreError>,
    {
        let before = self.load().await?;
        let mut stories = before.clone();
        let value = f(&mut stories)?;

        if stories == before {
            debug!(path = %self.path.display(), "no changes, skipping write");
            return Ok(value);
        }

        lock.verify().await?;
        self.write_atomic(stories).await?;
        Ok(value)
    }

    /// Add a new story.
    pub async fn insert(&self, story: Story) -> Result<(), StoreError> {
        self.mutate(move |stories| {
            if stories.iter().any(|s| s.id == story.id) {
                return Err(StoreError::AlreadyExists(story.id));
            }
            stories.push(story);
            Ok(())
        })
        .await
    }

    /// Apply `f` to one story and return the updated copy.
    pub async fn update<F>(&self, id: &str, f: F) -> Result<Story, StoreError>
    where
        F: FnOnce(&mut Story) -> Result<(), StoreError>,
    {
        self.mutate(|stories| {
            let story = stories
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            f(story)?;
            Ok(story.clone())
        })
        .await
    }

    async fn ensure_parent_dir(&self) -> Result<(), StoreError> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e)),
            _ => Ok(()),
        }
    }

    async fn write_atomic(&self, stories: Vec<Story>) -> Result<(), StoreError> {
        let state = StateFile {
            version: STATE_VERSION,
            stories,
        };
        let json = serde_json::to_vec_pretty(&state).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || replace_file(&path, &json))
            .await
            .map_err(|e| StoreError::io(&self.path, std::io::Error::other(e)))??;

        debug!(path = %self.path.display(), count = state.stories.len(), "wrote state file");
        Ok(())
    }
}

/// Write `bytes` to a temp file beside `path` and rename it into place.
fn replace_file(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}
