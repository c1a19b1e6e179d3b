//! Story scheduling and publish verification.
//!
//! This crate provides:
//! - A JSON story store guarded by an advisory lock file
//! - A retry helper with a fixed backoff schedule
//! - A submitter that hands stories to the scheduling provider
//! - A verifier that reconciles local status once publish time has passed

mod error;
mod lock;
pub mod retry;
mod store;
mod submit;
mod types;
mod verify;

pub use error::{StoreError, SubmitError};
pub use lock::LockConfig;
pub use retry::{Exhausted, Retried, RetryPolicy, retry, retry_all};
pub use store::StoryStore;
pub use submit::{SubmitConfig, Submitter};
pub use types::{Story, StoryError, StoryStatus};
pub use verify::{VerifyConfig, VerifyReport, Verifier, WatchSummary, map_post_status};
