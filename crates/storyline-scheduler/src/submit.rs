//! Story submission to the scheduling provider.

use std::time::Duration;

use chrono::{DateTime, Utc};
use storyline_provider::{CreatePostRequest, ProviderClient, ProviderError};
use tracing::{error, info, warn};

use crate::retry::{Exhausted, RetryPolicy, retry};
use crate::{StoreError, Story, StoryError, StoryStatus, StoryStore, SubmitError};

/// Submission settings.
#[derive(Debug, Clone)]
pub struct SubmitConfig {
    pub retry: RetryPolicy,
    /// Budget for a single provider request.
    pub attempt_timeout: Duration,
    /// HEAD the media URL before submitting.
    pub check_media: bool,
    /// Accept plain `http` media URLs. Only meant for local testing.
    pub allow_insecure_media: bool,
    /// A submission claim older than this is treated as abandoned.
    pub claim_ttl: Duration,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(30),
            check_media: true,
            allow_insecure_media: false,
            claim_ttl: Duration::from_secs(600),
        }
    }
}

/// Hands stories to the provider and records the outcome.
pub struct Submitter {
    client: ProviderClient,
    store: StoryStore,
    config: SubmitConfig,
}

impl Submitter {
    pub fn new(client: ProviderClient, store: StoryStore, config: SubmitConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// Submit one story and persist the result.
    ///
    /// Validation failures leave the story untouched. Provider failures are
    /// recorded on the story as `failed` and returned. The story is claimed
    /// in the state file before the first provider request, so a second
    /// submitter racing on the same id is turned away instead of creating a
    /// duplicate post.
    #[tracing::instrument(skip(self))]
    pub async fn submit(&self, id: &str) -> Result<Story, SubmitError> {
        let story = self.store.get(id).await?;
        check_eligible(&story, Utc::now())?;

        let request = CreatePostRequest::story(
            story.media_url.clone(),
            story.caption.clone(),
            story.publish_at,
        );
        self.validate(&story, &request).await?;

        let claimed_at = self.claim(id).await?;
        info!(id, publish_at = %story.publish_at, "submitting story to provider");

        let publish_at = story.publish_at;
        let timeout = self.config.attempt_timeout;
        let result = retry(
            &self.config.retry,
            "create_post",
            |attempt| {
                let request = &request;
                async move {
                    // A retry after a long backoff may land after the slot.
                    if publish_at <= Utc::now() {
                        return Err(ProviderError::InvalidRequest(format!(
                            "publish time {} passed before the post was accepted",
                            publish_at
                        )));
                    }
                    info!(id, attempt, "provider attempt");
                    match tokio::time::timeout(timeout, self.client.create_post(request)).await {
                        Ok(result) => result,
                        Err(_) => Err(ProviderError::Timeout(timeout)),
                    }
                }
            },
            ProviderError::is_transient,
        )
        .await;

        match result {
            Ok(done) => self.record_scheduled(id, done.value.id, done.attempts).await,
            Err(Exhausted { error, attempts }) => {
                error!(id, attempts, error = %error, "story submission failed");
                let failure = StoryError {
                    message: failure_message(&error),
                    detail: Some(error.to_string()),
                    failed_at: Utc::now(),
                    retry_count: attempts,
                };
                self.store
                    .update(id, |story| {
                        // Someone else got it scheduled in the meantime.
                        if matches!(
                            story.status(),
                            StoryStatus::Scheduled | StoryStatus::Published | StoryStatus::Archived
                        ) {
                            warn!(id, status = %story.status(), "not recording failure over newer status");
                            if story.submission_started_at() == Some(claimed_at) {
                                story.release_submission();
                            }
                            return Ok(());
                        }
                        story.mark_failed(failure);
                        Ok(())
                    })
                    .await?;

                Err(SubmitError::Provider {
                    id: id.to_string(),
                    attempts,
                    source: error,
                })
            }
        }
    }

    /// Mark the story as being submitted, re-checking eligibility under the lock.
    async fn claim(&self, id: &str) -> Result<DateTime<Utc>, SubmitError> {
        let now = Utc::now();
        let ttl = self.config.claim_ttl;

        self.store
            .mutate(|stories| {
                let story = stories
                    .iter_mut()
                    .find(|s| s.id == id)
                    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

                if let Err(e) = check_eligible(story, now) {
                    return Ok(Err(e));
                }
                if story.has_submission_in_flight(now, ttl) {
                    warn!(id, "story is already being submitted");
                    return Ok(Err(SubmitError::Validation {
                        id: id.to_string(),
                        reason: "a submission is already in progress".to_string(),
                    }));
                }

                story.claim_submission(now);
                Ok(Ok(now))
            })
            .await?
    }

    async fn record_scheduled(
        &self,
        id: &str,
        post_id: String,
        attempts: u32,
    ) -> Result<Story, SubmitError> {
        let updated = self
            .store
            .mutate(|stories| {
                let story = stories
                    .iter_mut()
                    .find(|s| s.id == id)
                    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

                if !story.status().is_submittable() {
                    let from = story.status();
                    story.release_submission();
                    return Ok(Err(StoreError::InvalidTransition {
                        id: id.to_string(),
                        from,
                        to: StoryStatus::Scheduled,
                    }));
                }

                story.mark_scheduled(post_id.clone());
                Ok(Ok(story.clone()))
            })
            .await
            .and_then(|inner| inner);

        match updated {
            Ok(story) => {
                info!(id, post_id = %post_id, attempts, "story scheduled");
                Ok(story)
            }
            Err(source) => {
                error!(id, post_id = %post_id, error = %source, "provider accepted story but it could not be recorded");
                Err(SubmitError::Unrecorded {
                    id: id.to_string(),
                    post_id,
                    source,
                })
            }
        }
    }

    async fn validate(&self, story: &Story, request: &CreatePostRequest) -> Result<(), SubmitError> {
        let rejected = |e: ProviderError| {
            warn!(id = %story.id, error = %e, "story failed validation");
            SubmitError::Validation {
                id: story.id.clone(),
                reason: e.to_string(),
            }
        };

        request
            .validate(self.config.allow_insecure_media)
            .map_err(rejected)?;

        if self.config.check_media {
            for url in &request.media_urls {
                self.client.check_media(url).await.map_err(rejected)?;
            }
        }

        Ok(())
    }
}

/// Status and timing checks that need no network.
fn check_eligible(story: &Story, now: DateTime<Utc>) -> Result<(), SubmitError> {
    if !story.status().is_submittable() {
        return Err(SubmitError::Validation {
            id: story.id.clone(),
            reason: format!("status {} cannot be submitted", story.status()),
        });
    }

    if story.publish_at <= now {
        return Err(SubmitError::Validation {
            id: story.id.clone(),
            reason: format!("publish time {} is not in the future", story.publish_at),
        });
    }

    Ok(())
}

fn failure_message(error: &ProviderError) -> String {
    match error {
        ProviderError::Timeout(_) => "provider did not respond in time".to_string(),
        ProviderError::RateLimited { .. } => "provider rate limit exceeded".to_string(),
        ProviderError::Api { status, .. } if *status >= 500 => {
            "provider unavailable".to_string()
        }
        ProviderError::Api { .. } => "provider rejected the post".to_string(),
        ProviderError::Http(_) => "could not reach provider".to_string(),
        ProviderError::Json(_) => "unexpected provider response".to_string(),
        ProviderError::InvalidRequest(_) => "invalid post request".to_string(),
    }
}
