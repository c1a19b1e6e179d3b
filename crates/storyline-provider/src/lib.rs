//! HTTP client for the story scheduling provider.
//!
//! This crate wraps the provider's REST API:
//! - Submitting a story post for a future publish time
//! - Looking up the status of a previously submitted post
//! - Checking that a media URL is reachable before submission

mod client;
mod error;
mod types;

pub use client::ProviderClient;
pub use error::ProviderError;
pub use types::*;
