//! airtime-worker: long-running weekly notification worker.
//!
//! Default mode loads the tracked item file, arms one timer per entity, and
//! delivers webhook notifications as broadcast slots come around. The
//! one-shot flags (`--track`, `--untrack`, `--list`, `--test-notify`) perform
//! a single maintenance action against the same data file and exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use airtime_core::config::{load_dotenv, Config};
use airtime_core::{EntityId, RecipientId, TrackedItem};
use airtime_engine::ScheduleRegistry;
use airtime_fetch::{FetchClient, FetchOptions};
use airtime_notify::{Notifier, WebhookNotifier};
use airtime_store::{FileStore, Storage};

// ── CLI ─────────────────────────────────────────────────────────────

/// Weekly broadcast notification worker.
#[derive(Parser, Debug)]
#[command(name = "airtime-worker", version, about)]
struct Cli {
    /// Path to the tracked item file.
    #[arg(long, env = "AIRTIME_DATA_FILE")]
    data_file: Option<PathBuf>,

    /// Webhook endpoint notifications are POSTed to.
    #[arg(long, env = "AIRTIME_WEBHOOK_URL")]
    webhook_url: Option<String>,

    /// Base URL of the upstream entity API.
    #[arg(long, env = "AIRTIME_UPSTREAM_BASE_URL")]
    upstream_url: Option<String>,

    /// Fetch an entity upstream, start tracking it, and exit.
    #[arg(long, value_name = "ID")]
    track: Option<EntityId>,

    /// Recipient subscribed by `--track` (repeatable).
    #[arg(long, value_name = "RECIPIENT")]
    recipient: Vec<String>,

    /// Stop tracking an entity and exit.
    #[arg(long, value_name = "ID")]
    untrack: Option<EntityId>,

    /// Print the tracked item set and exit.
    #[arg(long)]
    list: bool,

    /// Send a test notification to a recipient and exit.
    #[arg(long, value_name = "RECIPIENT")]
    test_notify: Option<String>,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(path) = cli.data_file.clone() {
        config.store.data_file = path;
    }
    if let Some(url) = cli.webhook_url.clone() {
        config.notify.webhook_url = Some(url);
    }
    if let Some(url) = cli.upstream_url.clone() {
        config.upstream.base_url = url;
    }

    if let Some(id) = cli.track {
        return track_entity(&config, id, cli.recipient).await;
    }
    if let Some(id) = cli.untrack {
        return untrack_entity(&config, id).await;
    }
    if cli.list {
        return list_tracked(&config).await;
    }
    if let Some(recipient) = cli.test_notify {
        return send_test(&config, recipient).await;
    }

    run_worker(config).await
}

// ── One-shot modes ──────────────────────────────────────────────────

async fn track_entity(
    config: &Config,
    id: EntityId,
    recipients: Vec<RecipientId>,
) -> anyhow::Result<()> {
    if recipients.is_empty() {
        anyhow::bail!("at least one --recipient is required when tracking");
    }

    let client = FetchClient::over_http(&config.upstream, FetchOptions::from(&config.fetch))?;
    let entity = client
        .fetch_one(id)
        .await
        .with_context(|| format!("could not fetch entity {id} upstream"))?;
    let schedule = entity
        .weekly_schedule()
        .with_context(|| format!("'{}' has no usable broadcast slot", entity.title))?;

    let store = FileStore::new(&config.store.data_file)?;
    store
        .insert(TrackedItem {
            id,
            title: entity.title.clone(),
            image_url: entity.image_url.clone(),
            schedule,
            last_fired_at: None,
            subscribers: recipients,
        })
        .await?;

    println!("tracking '{}' ({id})", entity.title);
    Ok(())
}

async fn untrack_entity(config: &Config, id: EntityId) -> anyhow::Result<()> {
    let store = FileStore::new(&config.store.data_file)?;
    if store.remove_tracked_item(id).await? {
        println!("stopped tracking {id}");
    } else {
        println!("{id} was not tracked");
    }
    Ok(())
}

async fn list_tracked(config: &Config) -> anyhow::Result<()> {
    let store = FileStore::new(&config.store.data_file)?;
    let mut items = store.list_all_tracked_items().await?;
    items.sort_by_key(|i| i.id);

    if items.is_empty() {
        println!("no tracked items");
        return Ok(());
    }
    for item in items {
        let fired = item
            .last_fired_at
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:>8}  {:<40}  {}  [{} subscriber(s), last fired {}]",
            item.id,
            item.title,
            item.schedule,
            item.subscribers.len(),
            fired
        );
    }
    Ok(())
}

async fn send_test(config: &Config, recipient: RecipientId) -> anyhow::Result<()> {
    let notifier = WebhookNotifier::from_config(&config.notify)?;
    notifier.test(&recipient).await?;
    println!("test notification delivered to {recipient}");
    Ok(())
}

// ── Worker ──────────────────────────────────────────────────────────

async fn run_worker(config: Config) -> anyhow::Result<()> {
    config.log_summary();

    let notifier =
        WebhookNotifier::from_config(&config.notify).context("webhook notifier not configured")?;
    let store = FileStore::new(&config.store.data_file)?;
    let registry =
        ScheduleRegistry::start(Arc::new(store), Arc::new(notifier), config.driver.clone());

    let scheduled = registry.run_startup_sweep().await?;
    info!(scheduled, "startup sweep complete");
    info!("airtime-worker running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    registry.shutdown().await;
    info!("airtime-worker exited cleanly");

    Ok(())
}
