//! Provider wire types.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::ProviderError;

/// Instagram caps captions at this many characters.
pub const MAX_CAPTION_CHARS: usize = 2200;

/// Platform the provider should publish to.
pub const INSTAGRAM_PLATFORM: &str = "instagram";

/// Post type for story images.
pub const STORY_POST_TYPE: &str = "story";

/// Request body for `POST /posts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub media_urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    pub platforms: Vec<String>,
    pub post_type: String,
    pub schedule_date: DateTime<Utc>,
}

impl CreatePostRequest {
    /// Build a story request for a single image.
    pub fn story(
        media_url: impl Into<String>,
        caption: Option<String>,
        schedule_date: DateTime<Utc>,
    ) -> Self {
        Self {
            media_urls: vec![media_url.into()],
            caption,
            platforms: vec![INSTAGRAM_PLATFORM.to_string()],
            post_type: STORY_POST_TYPE.to_string(),
            schedule_date,
        }
    }

    /// Check required fields and media URL shape.
    ///
    /// Media URLs must be HTTPS unless `allow_insecure_media` is set.
    pub fn validate(&self, allow_insecure_media: bool) -> Result<(), ProviderError> {
        if self.media_urls.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "at least one media URL is required".to_string(),
            ));
        }
        if self.platforms.is_empty() {
            return Err(ProviderError::InvalidRequest(
                "at least one platform is required".to_string(),
            ));
        }
        if self.post_type.trim().is_empty() {
            return Err(ProviderError::InvalidRequest(
                "post type is required".to_string(),
            ));
        }

        for raw in &self.media_urls {
            let url = Url::parse(raw).map_err(|e| {
                ProviderError::InvalidRequest(format!("invalid media URL '{}': {}", raw, e))
            })?;
            match url.scheme() {
                "https" => {}
                "http" if allow_insecure_media => {}
                scheme => {
                    return Err(ProviderError::InvalidRequest(format!(
                        "media URL must use https, got '{}'",
                        scheme
                    )));
                }
            }
        }

        if let Some(caption) = &self.caption {
            let chars = caption.chars().count();
            if chars > MAX_CAPTION_CHARS {
                return Err(ProviderError::InvalidRequest(format!(
                    "caption is {} characters, limit is {}",
                    chars, MAX_CAPTION_CHARS
                )));
            }
        }

        Ok(())
    }
}

/// Response from `POST /posts`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePostResponse {
    pub id: String,
    #[serde(default)]
    pub status: PostStatus,
}

/// Response from `GET /posts/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct PostStatusResponse {
    pub id: String,
    #[serde(default)]
    pub status: PostStatus,
    #[serde(default)]
    pub error: Option<String>,
}

/// Post lifecycle as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    Scheduled,
    Processing,
    Published,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Error body returned by the provider on non-success responses.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(alias = "error")]
    pub message: String,
}
