//! Publish verification for scheduled stories.

use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream;
use storyline_provider::{PostStatus, PostStatusResponse, ProviderClient, ProviderError};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{StoreError, StoryError, StoryStatus, StoryStore};

/// Verification settings.
#[derive(Debug, Clone)]
pub struct VerifyConfig {
    /// Maximum provider lookups in flight at once.
    pub concurrency: usize,
    /// Budget for a single provider lookup.
    pub request_timeout: Duration,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of one verification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Stories looked up at the provider.
    pub checked: usize,
    /// Stories whose local status changed.
    pub updated: usize,
    /// Stories whose provider status matched the stored one.
    pub unchanged: usize,
    /// Lookups that failed; retried on the next pass.
    pub errors: usize,
}

/// Totals for a [`Verifier::run`] loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    /// Verification passes started.
    pub passes: usize,
    /// Passes that ended in a store error.
    pub failed: usize,
}

/// A status change observed at the provider.
#[derive(Debug)]
struct Observed {
    id: String,
    post_id: String,
    status: StoryStatus,
    error: Option<String>,
}

/// Polls the provider for stories past their publish time.
pub struct Verifier {
    client: ProviderClient,
    store: StoryStore,
    config: VerifyConfig,
}

impl Verifier {
    pub fn new(client: ProviderClient, store: StoryStore, config: VerifyConfig) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// Check every scheduled story whose publish time has passed.
    ///
    /// The state file is only rewritten if at least one status changed.
    #[tracing::instrument(skip(self))]
    pub async fn verify(&self) -> Result<VerifyReport, StoreError> {
        let now = Utc::now();
        let due: Vec<(String, String)> = self
            .store
            .load()
            .await?
            .into_iter()
            .filter(|s| s.is_awaiting_verification(now))
            .filter_map(|s| s.external_post_id.map(|post_id| (s.id, post_id)))
            .collect();

        let mut report = VerifyReport {
            checked: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            debug!("no stories awaiting verification");
            return Ok(report);
        }

        let timeout = self.config.request_timeout;
        let lookups: Vec<(String, String, Result<PostStatusResponse, ProviderError>)> =
            stream::iter(due)
                .map(|(id, post_id)| async move {
                    let result =
                        match tokio::time::timeout(timeout, self.client.get_post(&post_id)).await {
                            Ok(result) => result,
                            Err(_) => Err(ProviderError::Timeout(timeout)),
                        };
                    (id, post_id, result)
                })
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;

        let mut observed = Vec::new();
        for (id, post_id, result) in lookups {
            match result {
                Ok(response) => match map_post_status(response.status) {
                    Some(status) => observed.push(Observed {
                        id,
                        post_id,
                        status,
                        error: response.error,
                    }),
                    None => {
                        warn!(id = %id, post_id = %post_id, "provider returned unknown post status");
                    }
                },
                Err(e) => {
                    warn!(id = %id, post_id = %post_id, error = %e, "failed to look up post status");
                    report.errors += 1;
                }
            }
        }

        let changed: Vec<Observed> = observed
            .into_iter()
            .filter(|o| o.status != StoryStatus::Scheduled)
            .collect();

        if !changed.is_empty() {
            report.updated = self.store.mutate(|stories| Ok(apply(stories, changed))).await?;
        }
        report.unchanged = report.checked - report.errors - report.updated;

        info!(
            checked = report.checked,
            updated = report.updated,
            unchanged = report.unchanged,
            errors = report.errors,
            "verification pass complete"
        );
        Ok(report)
    }

    /// Run verification every `interval` until shutdown is signalled.
    ///
    /// A failed pass is logged and the loop carries on. Dropping the sender
    /// also stops the loop.
    pub async fn run(
        &self,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> WatchSummary {
        info!(interval_ms = interval.as_millis() as u64, "verifier starting");
        let mut summary = WatchSummary::default();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            summary.passes += 1;
            if let Err(e) = self.verify().await {
                summary.failed += 1;
                error!(error = %e, "verification pass failed");
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = sleep(interval) => {}
            }
        }

        info!(passes = summary.passes, failed = summary.failed, "verifier shut down");
        summary
    }
}

/// Local status for a provider status, if there is one.
pub fn map_post_status(status: PostStatus) -> Option<StoryStatus> {
    match status {
        PostStatus::Published => Some(StoryStatus::Published),
        PostStatus::Failed => Some(StoryStatus::Failed),
        PostStatus::Pending | PostStatus::Scheduled | PostStatus::Processing => {
            Some(StoryStatus::Scheduled)
        }
        PostStatus::Unknown => None,
    }
}

/// Apply observed changes to stories that are still in the state we polled.
fn apply(stories: &mut [crate::Story], changes: Vec<Observed>) -> usize {
    let mut updated = 0;

    for change in changes {
        let Some(story) = stories.iter_mut().find(|s| s.id == change.id) else {
            debug!(id = %change.id, "story removed during verification");
            continue;
        };

        if story.status() != StoryStatus::Scheduled
            || story.external_post_id.as_deref() != Some(change.post_id.as_str())
            || story.status() == change.status
        {
            continue;
        }

        match change.status {
            StoryStatus::Published => {
                story.mark_published();
                info!(id = %story.id, post_id = %change.post_id, "story published");
            }
            StoryStatus::Failed => {
                let detail = change.error;
                warn!(id = %story.id, post_id = %change.post_id, detail = ?detail, "provider reports publish failure");
                story.mark_failed(StoryError {
                    message: "provider failed to publish the story".to_string(),
                    detail,
                    failed_at: Utc::now(),
                    retry_count: 0,
                });
            }
            _ => continue,
        }
        updated += 1;
    }

    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Story;
    use chrono::Duration as ChronoDuration;

    fn scheduled(post_id: &str) -> Story {
        let mut story = Story::draft(
            "https://cdn.example.com/a.png".to_string(),
            None,
            Utc::now() - ChronoDuration::minutes(5),
        );
        story.mark_scheduled(post_id.to_string());
        story
    }

    fn observed(story: &Story, status: StoryStatus) -> Observed {
        Observed {
            id: story.id.clone(),
            post_id: story.external_post_id.clone().unwrap_or_default(),
            status,
            error: None,
        }
    }

    fn broken_store_verifier(dir: &tempfile::TempDir) -> Verifier {
        let store = StoryStore::new(dir.path().join("stories.json"), crate::LockConfig::default());
        std::fs::write(store.path(), b"{ not json").unwrap();
        let client = ProviderClient::new("http://127.0.0.1:9", "k").unwrap();
        Verifier::new(client, store, VerifyConfig::default())
    }

    #[tokio::test]
    async fn test_run_survives_failed_passes_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = broken_store_verifier(&dir);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let run = tokio::spawn(async move {
            verifier.run(Duration::from_millis(20), shutdown_rx).await
        });
        sleep(Duration::from_millis(150)).await;
        shutdown_tx.send(true).unwrap();

        let summary = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("run should stop after shutdown")
            .unwrap();
        assert!(summary.passes >= 2, "only {} passes", summary.passes);
        assert_eq!(summary.failed, summary.passes);
    }

    #[tokio::test]
    async fn test_run_stops_when_sender_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = broken_store_verifier(&dir);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let run = tokio::spawn(async move {
            verifier.run(Duration::from_secs(3600), shutdown_rx).await
        });
        sleep(Duration::from_millis(50)).await;
        drop(shutdown_tx);

        let summary = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("run should stop once the sender is gone")
            .unwrap();
        assert_eq!(summary.passes, 1);
    }

    #[tokio::test]
    async fn test_run_does_nothing_if_already_shut_down() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = broken_store_verifier(&dir);
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);

        let summary = verifier.run(Duration::from_millis(10), shutdown_rx).await;
        assert_eq!(summary, WatchSummary::default());
    }

    #[test]
    fn test_map_post_status() {
        assert_eq!(
            map_post_status(PostStatus::Published),
            Some(StoryStatus::Published)
        );
        assert_eq!(map_post_status(PostStatus::Failed), Some(StoryStatus::Failed));
        assert_eq!(
            map_post_status(PostStatus::Processing),
            Some(StoryStatus::Scheduled)
        );
        assert_eq!(map_post_status(PostStatus::Unknown), None);
    }

    #[test]
    fn test_apply_published() {
        let mut stories = vec![scheduled("p1")];
        let change = observed(&stories[0], StoryStatus::Published);

        assert_eq!(apply(&mut stories, vec![change]), 1);
        assert_eq!(stories[0].status(), StoryStatus::Published);
        assert!(stories[0].published_at.is_some());
    }

    #[test]
    fn test_apply_failed_records_detail() {
        let mut stories = vec![scheduled("p1")];
        let mut change = observed(&stories[0], StoryStatus::Failed);
        change.error = Some("token expired".to_string());

        assert_eq!(apply(&mut stories, vec![change]), 1);
        assert_eq!(stories[0].status(), StoryStatus::Failed);
        let error = stories[0].error.as_ref().unwrap();
        assert_eq!(error.detail.as_deref(), Some("token expired"));
    }

    #[test]
    fn test_apply_skips_resubmitted_story() {
        let mut stories = vec![scheduled("p1")];
        let stale = observed(&stories[0], StoryStatus::Failed);
        stories[0].mark_scheduled("p2".to_string());

        assert_eq!(apply(&mut stories, vec![stale]), 0);
        assert_eq!(stories[0].status(), StoryStatus::Scheduled);
    }

    #[test]
    fn test_apply_same_status_is_noop() {
        let mut stories = vec![scheduled("p1")];
        let before = stories.clone();
        let change = observed(&stories[0], StoryStatus::Scheduled);

        assert_eq!(apply(&mut stories, vec![change]), 0);
        assert_eq!(stories, before);
    }
}
