//! Story record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// One schedulable story image.
///
/// The status is private: callers outside this crate can only move a story
/// to `ready` or `archived`. `scheduled` and `published` are reachable only
/// through the submitter and verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Story {
    /// Unique identifier.
    pub id: String,
    status: StoryStatus,
    /// When the story should go live.
    pub publish_at: DateTime<Utc>,
    /// Public URL of the composed story image.
    pub media_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    /// Provider post id, set once scheduled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_post_id: Option<String>,
    /// Last terminal failure, cleared on successful scheduling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StoryError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// When the provider accepted the post.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When verification observed the post as published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Set while a submitter is talking to the provider for this story.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    submission_started_at: Option<DateTime<Utc>>,
}

/// Lifecycle status of a story.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    #[default]
    Draft,
    Ready,
    Scheduled,
    Failed,
    Published,
    Archived,
}

/// Failure details persisted on a story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub failed_at: DateTime<Utc>,
    /// Number of submission attempts made before giving up.
    pub retry_count: u32,
}

impl StoryStatus {
    /// Whether a story in this status may be handed to the provider.
    ///
    /// Failed stories can be resubmitted without going back through `ready`.
    pub fn is_submittable(self) -> bool {
        matches!(self, StoryStatus::Ready | StoryStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StoryStatus::Draft => "draft",
            StoryStatus::Ready => "ready",
            StoryStatus::Scheduled => "scheduled",
            StoryStatus::Failed => "failed",
            StoryStatus::Published => "published",
            StoryStatus::Archived => "archived",
        }
    }
}

impl std::fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StoryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(StoryStatus::Draft),
            "ready" => Ok(StoryStatus::Ready),
            "scheduled" => Ok(StoryStatus::Scheduled),
            "failed" => Ok(StoryStatus::Failed),
            "published" => Ok(StoryStatus::Published),
            "archived" => Ok(StoryStatus::Archived),
            _ => Err(format!("unknown story status '{}'", s)),
        }
    }
}

impl Story {
    /// Create a new draft story with a random id.
    pub fn draft(media_url: String, caption: Option<String>, publish_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            status: StoryStatus::Draft,
            publish_at,
            media_url,
            caption,
            external_post_id: None,
            error: None,
            created_at: now,
            updated_at: now,
            scheduled_at: None,
            published_at: None,
            submission_started_at: None,
        }
    }

    pub fn status(&self) -> StoryStatus {
        self.status
    }

    /// When the in-flight submission (if any) started.
    pub fn submission_started_at(&self) -> Option<DateTime<Utc>> {
        self.submission_started_at
    }

    /// Whether another submitter claimed this story less than `ttl` ago.
    pub fn has_submission_in_flight(&self, now: DateTime<Utc>, ttl: std::time::Duration) -> bool {
        self.submission_started_at.is_some_and(|started| {
            (now - started)
                .to_std()
                .map_or(true, |elapsed| elapsed < ttl)
        })
    }

    /// Check if this story has been handed off and its publish time has passed.
    pub fn is_awaiting_verification(&self, now: DateTime<Utc>) -> bool {
        self.status == StoryStatus::Scheduled
            && self.external_post_id.is_some()
            && self.publish_at <= now
    }

    /// Mark a draft (or failed) story as ready for submission.
    pub fn mark_ready(&mut self) -> Result<(), StoreError> {
        match self.status {
            StoryStatus::Draft | StoryStatus::Failed | StoryStatus::Ready => {
                if self.media_url.trim().is_empty() {
                    return Err(StoreError::InvalidTransition {
                        id: self.id.clone(),
                        from: self.status,
                        to: StoryStatus::Ready,
                    });
                }
                self.set_status(StoryStatus::Ready);
                Ok(())
            }
            from => Err(StoreError::InvalidTransition {
                id: self.id.clone(),
                from,
                to: StoryStatus::Ready,
            }),
        }
    }

    /// Archive a story. Scheduled stories must be verified first.
    pub fn archive(&mut self) -> Result<(), StoreError> {
        if self.status == StoryStatus::Scheduled {
            return Err(StoreError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: StoryStatus::Archived,
            });
        }
        self.set_status(StoryStatus::Archived);
        Ok(())
    }

    pub(crate) fn claim_submission(&mut self, now: DateTime<Utc>) {
        self.submission_started_at = Some(now);
        self.updated_at = now;
    }

    pub(crate) fn release_submission(&mut self) {
        if self.submission_started_at.take().is_some() {
            self.updated_at = Utc::now();
        }
    }

    pub(crate) fn mark_scheduled(&mut self, external_post_id: String) {
        let now = Utc::now();
        self.submission_started_at = None;
        self.external_post_id = Some(external_post_id);
        self.scheduled_at = Some(now);
        self.error = None;
        self.set_status(StoryStatus::Scheduled);
    }

    pub(crate) fn mark_failed(&mut self, error: StoryError) {
        self.submission_started_at = None;
        self.error = Some(error);
        self.set_status(StoryStatus::Failed);
    }

    pub(crate) fn mark_published(&mut self) {
        self.published_at = Some(Utc::now());
        self.error = None;
        self.set_status(StoryStatus::Published);
    }

    fn set_status(&mut self, status: StoryStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
