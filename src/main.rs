use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cid_anchor::chain::ethereum::EthereumChain;
use cid_anchor::clock::SystemClock;
use cid_anchor::config::Settings;
use cid_anchor::error::Result;
use cid_anchor::event::{EventProducer, NoopEventProducer, WebhookEventProducer};
use cid_anchor::merkle::MerkleBuilder;
use cid_anchor::pipeline::{
    AnchorCommitEmitter, AnchorCoordinator, GarbageCollector, ReadinessScheduler,
    StreamCandidateSelector,
};
use cid_anchor::state::postgres::{PgAnchorStore, PgRequestStore, PgTransactionStore};
use cid_anchor::state::Database;
use cid_anchor::storage::ipfs::IpfsStore;
use cid_anchor::stream::http::HttpStreamService;

#[derive(Parser)]
#[command(name = "cid-anchor")]
#[command(about = "Batch anchoring service: commits submitted CIDs to a blockchain")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler, anchor worker, and garbage collector
    Daemon,
    /// Run a single anchoring cycle
    Anchor,
    /// Run a single scheduler pass
    Schedule,
    /// Run a single garbage collection pass
    Gc,
    /// Apply pending database migrations
    Migrate,
}

struct Components {
    coordinator: AnchorCoordinator,
    scheduler: ReadinessScheduler,
    gc: GarbageCollector,
}

async fn wire(settings: &Settings) -> Result<(Database, Components)> {
    let db = Database::connect(&settings.database_url).await?;
    let clock = Arc::new(SystemClock);

    let requests = Arc::new(PgRequestStore::new(
        db.pool().clone(),
        settings.batch_policy(),
        clock.clone(),
    ));
    let anchors = Arc::new(PgAnchorStore::new(db.pool().clone()));
    let transactions = Arc::new(PgTransactionStore::new(db.pool().clone()));
    let content = Arc::new(IpfsStore::new(settings.ipfs.clone()));
    let streams = Arc::new(HttpStreamService::new(settings.stream_api.clone()));
    let chain = Arc::new(EthereumChain::new(settings.ethereum.clone()));
    let events: Arc<dyn EventProducer> = match &settings.event_webhook_url {
        Some(url) => Arc::new(WebhookEventProducer::new(url)),
        None => Arc::new(NoopEventProducer),
    };

    let selector = Arc::new(StreamCandidateSelector::new(
        streams.clone(),
        requests.clone(),
    ));
    let emitter = Arc::new(AnchorCommitEmitter::new(
        content.clone(),
        streams.clone(),
        clock.clone(),
        &settings.pubsub_topic,
    ));
    let builder = MerkleBuilder::new(content.clone(), settings.merkle_depth_limit);

    let coordinator = AnchorCoordinator::new(
        requests.clone(),
        anchors,
        transactions,
        selector,
        emitter,
        chain,
        content,
        builder,
        clock.clone(),
        settings.stream_limit(),
    );
    let scheduler = ReadinessScheduler::new(requests.clone(), events, settings.stream_limit());
    let gc = GarbageCollector::new(requests, streams, clock, settings.expiry_window());

    Ok((
        db,
        Components {
            coordinator,
            scheduler,
            gc,
        },
    ))
}

async fn run_daemon(settings: &Settings, components: &Components) -> Result<()> {
    let mut schedule_tick =
        tokio::time::interval(std::time::Duration::from_millis(settings.schedule_interval_ms));
    let mut anchor_tick =
        tokio::time::interval(std::time::Duration::from_millis(settings.anchor_interval_ms));
    let mut gc_tick =
        tokio::time::interval(std::time::Duration::from_millis(settings.gc_interval_ms));

    info!(
        schedule_ms = settings.schedule_interval_ms,
        anchor_ms = settings.anchor_interval_ms,
        gc_ms = settings.gc_interval_ms,
        "cid-anchor daemon started"
    );

    loop {
        tokio::select! {
            _ = schedule_tick.tick() => {
                if let Err(e) = components.scheduler.emit_anchor_event_if_ready().await {
                    warn!(error = %e, "Scheduler pass failed");
                }
            }
            _ = anchor_tick.tick() => {
                if let Err(e) = components.coordinator.anchor_requests().await {
                    error!(error = %e, "Anchoring cycle failed");
                }
            }
            _ = gc_tick.tick() => {
                if let Err(e) = components.gc.garbage_collect_pinned_streams().await {
                    warn!(error = %e, "Garbage collection failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env()?;

    match cli.command {
        Commands::Migrate => {
            let db = Database::connect(&settings.database_url).await?;
            db.migrate().await?;
            info!("Migrations applied");
        }
        Commands::Daemon => {
            let (_db, components) = wire(&settings).await?;
            run_daemon(&settings, &components).await?;
        }
        Commands::Anchor => {
            let (_db, components) = wire(&settings).await?;
            let summary = components.coordinator.anchor_requests().await?;
            info!(
                candidates = summary.candidates,
                anchored = summary.anchored,
                completed = summary.completed,
                failed = summary.failed,
                "Anchoring cycle complete"
            );
        }
        Commands::Schedule => {
            let (_db, components) = wire(&settings).await?;
            let promoted = components.scheduler.emit_anchor_event_if_ready().await?;
            info!(requests = promoted, "Scheduler pass complete");
        }
        Commands::Gc => {
            let (_db, components) = wire(&settings).await?;
            let released = components.gc.garbage_collect_pinned_streams().await?;
            info!(streams = released, "Garbage collection complete");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "cid-anchor failed");
        std::process::exit(1);
    }
}
