//! Storyline: schedule Instagram stories and verify they went out.
//!
//! Main binary with subcommands:
//! - `create`, `ready`, `archive`, `list`: manage the story state file
//! - `submit`: hand a story to the scheduling provider
//! - `verify`: reconcile stories whose publish time has passed
//! - `watch`: run `verify` on an interval until interrupted

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "storyline")]
#[command(about = "Schedule Instagram stories and verify publication", long_about = None)]
struct Cli {
    /// Path to the story state file
    #[arg(long, global = true, env = "STORYLINE_STATE_FILE", default_value = "stories.json")]
    state_file: PathBuf,

    /// Seconds to wait for the state file lock
    #[arg(long, global = true, env = "STORYLINE_LOCK_WAIT_SECS", default_value = "10")]
    lock_wait_secs: u64,

    /// Seconds after which a lock is treated as abandoned
    #[arg(long, global = true, env = "STORYLINE_STALE_LOCK_SECS", default_value = "30")]
    stale_lock_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

/// Scheduling provider connection settings.
#[derive(clap::Args)]
struct ProviderArgs {
    /// Scheduling provider API base URL
    #[arg(long, env = "STORYLINE_PROVIDER_URL")]
    provider_url: String,

    /// Scheduling provider API key
    #[arg(long, env = "STORYLINE_API_KEY", hide_env_values = true)]
    api_key: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new story
    Create {
        /// Public HTTPS URL of the story image
        #[arg(long)]
        media_url: String,

        /// When to publish (RFC 3339, e.g. 2026-11-01T18:00:00Z)
        #[arg(long)]
        publish_at: chrono::DateTime<chrono::Utc>,

        /// Optional caption
        #[arg(long)]
        caption: Option<String>,

        /// Mark the story ready for submission immediately
        #[arg(long)]
        ready: bool,
    },

    /// Mark a draft or failed story ready for submission
    Ready {
        id: String,
    },

    /// Archive a story
    Archive {
        id: String,
    },

    /// List stories
    List {
        /// Only show stories with this status
        #[arg(long)]
        status: Option<storyline_scheduler::StoryStatus>,
    },

    /// Submit a story to the scheduling provider
    Submit {
        id: String,

        #[command(flatten)]
        provider: ProviderArgs,

        /// Total provider attempts
        #[arg(long, default_value = "3")]
        max_attempts: u32,

        /// Per-attempt timeout in seconds
        #[arg(long, default_value = "30")]
        attempt_timeout_secs: u64,

        /// Skip the HEAD check on the media URL
        #[arg(long)]
        skip_media_check: bool,
    },

    /// Check scheduled stories whose publish time has passed
    Verify {
        #[command(flatten)]
        provider: ProviderArgs,

        /// Concurrent provider lookups
        #[arg(long, default_value = "4")]
        concurrency: usize,
    },

    /// Run verification on an interval until Ctrl-C
    Watch {
        #[command(flatten)]
        provider: ProviderArgs,

        /// Seconds between verification passes
        #[arg(long, env = "STORYLINE_VERIFY_INTERVAL_SECS", default_value = "300")]
        interval_secs: u64,

        /// Concurrent provider lookups
        #[arg(long, default_value = "4")]
        concurrency: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "storyline=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let store = commands::open_store(&cli.state_file, cli.lock_wait_secs, cli.stale_lock_secs);

    match cli.command {
        Commands::Create {
            media_url,
            publish_at,
            caption,
            ready,
        } => commands::create(&store, media_url, publish_at, caption, ready).await,

        Commands::Ready { id } => commands::ready(&store, &id).await,

        Commands::Archive { id } => commands::archive(&store, &id).await,

        Commands::List { status } => commands::list(&store, status).await,

        Commands::Submit {
            id,
            provider,
            max_attempts,
            attempt_timeout_secs,
            skip_media_check,
        } => {
            let client = commands::provider_client(&provider.provider_url, &provider.api_key)?;
            commands::submit(
                client,
                store,
                &id,
                max_attempts,
                attempt_timeout_secs,
                !skip_media_check,
            )
            .await
        }

        Commands::Verify {
            provider,
            concurrency,
        } => {
            let client = commands::provider_client(&provider.provider_url, &provider.api_key)?;
            commands::verify(client, store, concurrency).await
        }

        Commands::Watch {
            provider,
            interval_secs,
            concurrency,
        } => {
            let client = commands::provider_client(&provider.provider_url, &provider.api_key)?;
            commands::watch(client, store, interval_secs, concurrency).await
        }
    }
}
