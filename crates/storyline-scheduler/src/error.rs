//! Error types for the scheduler.

use std::path::PathBuf;

use thiserror::Error;

use crate::StoryStatus;

/// Errors from the locked state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// State file could not be parsed or serialized.
    #[error("state file {path} is not valid JSON: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Another holder kept the lock for longer than the wait budget.
    #[error("timed out after {waited_ms}ms waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    /// Our lock was evicted as stale before we finished writing.
    #[error("lock {0} was taken over by another holder")]
    LockLost(PathBuf),

    /// Story not found.
    #[error("story not found: {0}")]
    NotFound(String),

    /// Story already exists.
    #[error("story already exists: {0}")]
    AlreadyExists(String),

    /// Status change not allowed from the current status.
    #[error("story {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: StoryStatus,
        to: StoryStatus,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors from submitting a story.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Rejected before any provider request was made.
    #[error("story {id} rejected: {reason}")]
    Validation { id: String, reason: String },

    /// Provider failed after the given number of attempts; recorded on the story.
    #[error("provider rejected story {id} after {attempts} attempt(s): {source}")]
    Provider {
        id: String,
        attempts: u32,
        #[source]
        source: storyline_provider::ProviderError,
    },

    /// The provider accepted the post but the outcome could not be stored.
    ///
    /// The post exists upstream; `post_id` is what to reconcile by hand.
    #[error("story {id} was accepted as provider post {post_id} but could not be recorded: {source}")]
    Unrecorded {
        id: String,
        post_id: String,
        #[source]
        source: StoreError,
    },

    /// State store error.
    #[error(transparent)]
    Store(#[from] StoreError),
}
