//! Subcommand implementations.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use miette::Result;
use tokio::sync::watch;
use tracing::info;

use storyline_provider::ProviderClient;
use storyline_scheduler::{
    LockConfig, RetryPolicy, Story, StoryStatus, StoryStore, SubmitConfig, Submitter, Verifier,
    VerifyConfig,
};

pub fn open_store(path: &Path, lock_wait_secs: u64, stale_lock_secs: u64) -> StoryStore {
    StoryStore::new(
        path,
        LockConfig {
            wait: Duration::from_secs(lock_wait_secs),
            stale_after: Duration::from_secs(stale_lock_secs),
            ..LockConfig::default()
        },
    )
}

pub fn provider_client(url: &str, api_key: &str) -> Result<ProviderClient> {
    ProviderClient::new(url, api_key)
        .map_err(|e| miette::miette!("failed to build provider client: {}", e))
}

pub async fn create(
    store: &StoryStore,
    media_url: String,
    publish_at: DateTime<Utc>,
    caption: Option<String>,
    ready: bool,
) -> Result<()> {
    let mut story = Story::draft(media_url, caption, publish_at);
    if ready {
        story.mark_ready().map_err(|e| miette::miette!("{}", e))?;
    }

    let id = story.id.clone();
    let status = story.status();
    store
        .insert(story)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    info!(id = %id, %status, "created story");
    println!("{}", id);
    Ok(())
}

pub async fn ready(store: &StoryStore, id: &str) -> Result<()> {
    let story = store
        .update(id, |story| story.mark_ready())
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    println!("{} {}", story.id, story.status());
    Ok(())
}

pub async fn archive(store: &StoryStore, id: &str) -> Result<()> {
    let story = store
        .update(id, |story| story.archive())
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    println!("{} {}", story.id, story.status());
    Ok(())
}

pub async fn list(store: &StoryStore, status: Option<StoryStatus>) -> Result<()> {
    let stories = store.load().await.map_err(|e| miette::miette!("{}", e))?;

    for story in stories
        .iter()
        .filter(|s| status.is_none_or(|wanted| s.status() == wanted))
    {
        let post = story.external_post_id.as_deref().unwrap_or("-");
        let error = story
            .error
            .as_ref()
            .map(|e| format!(" ({})", e.message))
            .unwrap_or_default();
        println!(
            "{}  {:<9}  {}  {}{}",
            story.id,
            story.status(),
            story.publish_at.to_rfc3339(),
            post,
            error
        );
    }
    Ok(())
}

pub async fn submit(
    client: ProviderClient,
    store: StoryStore,
    id: &str,
    max_attempts: u32,
    attempt_timeout_secs: u64,
    check_media: bool,
) -> Result<()> {
    let config = SubmitConfig {
        retry: RetryPolicy {
            max_attempts,
            ..RetryPolicy::default()
        },
        attempt_timeout: Duration::from_secs(attempt_timeout_secs),
        check_media,
        ..SubmitConfig::default()
    };

    let story = Submitter::new(client, store, config)
        .submit(id)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!(
        "{} scheduled as {}",
        story.id,
        story.external_post_id.as_deref().unwrap_or("-")
    );
    Ok(())
}

pub async fn verify(client: ProviderClient, store: StoryStore, concurrency: usize) -> Result<()> {
    let verifier = Verifier::new(
        client,
        store,
        VerifyConfig {
            concurrency,
            ..VerifyConfig::default()
        },
    );

    let report = verifier
        .verify()
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!(
        "checked {}, updated {}, unchanged {}, errors {}",
        report.checked, report.updated, report.unchanged, report.errors
    );
    Ok(())
}

pub async fn watch(
    client: ProviderClient,
    store: StoryStore,
    interval_secs: u64,
    concurrency: usize,
) -> Result<()> {
    let verifier = Verifier::new(
        client,
        store,
        VerifyConfig {
            concurrency,
            ..VerifyConfig::default()
        },
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received Ctrl-C, shutting down");
        let _ = shutdown_tx.send(true);
    });

    let summary = verifier
        .run(Duration::from_secs(interval_secs.max(1)), shutdown_rx)
        .await;
    println!(
        "ran {} verification pass(es), {} failed",
        summary.passes, summary.failed
    );
    Ok(())
}
