//! STAC processor service.
//!
//! Consumes asset events from a Redis stream and turns them into STAC
//! records in object storage and pgstac.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;
use uuid::Uuid;

use ingestion::{FeedEvent, ProcessorConfig, ProcessorKind, ProcessorRuntime};
use storage::{
    AssetStore, CatalogLoader, Feed, ObjectStorage, PgStacCatalog, RedisFeed, RedisFeedConfig,
};

#[derive(Parser, Debug)]
#[command(name = "stac-processor")]
#[command(about = "Raster ingestion processors for a STAC catalog")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level
    #[arg(long, default_value = "info", global = true, env = "LOG_LEVEL")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered processors
    List,

    /// Run a processor until interrupted
    Run {
        /// Processor name (see `list`)
        name: String,

        /// Number of parallel workers
        #[arg(short, long, default_value = "1", env = "WORKERS")]
        workers: usize,
    },

    /// Publish an asset event onto the configured topic
    Publish {
        /// Asset locator
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::List => {
            for kind in ProcessorKind::ALL {
                println!("{:<26} {}", kind.name(), kind.description());
            }
            Ok(())
        }
        Command::Run { name, workers } => {
            let kind: ProcessorKind = name.parse()?;
            let config = ProcessorConfig::from_env()?;
            run(kind, config, workers.max(1)).await
        }
        Command::Publish { url } => {
            let config = ProcessorConfig::from_env()?;
            publish(&config, &url).await
        }
    }
}

fn feed_config(config: &ProcessorConfig, consumer: String) -> RedisFeedConfig {
    RedisFeedConfig {
        url: config.feed.connection_string.clone(),
        topic: config.feed.topic.clone(),
        subscription: config.feed.subscription.clone(),
        consumer,
        lock_duration: config.feed.lock_duration,
    }
}

/// Run `workers` independent runtimes until Ctrl-C.
async fn run(kind: ProcessorKind, config: ProcessorConfig, workers: usize) -> Result<()> {
    if kind.requires_catalog() {
        config.require_database()?;
    }

    if let Some(addr) = config.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus metrics exporter listening");
    }

    let store: Arc<dyn AssetStore> = Arc::new(ObjectStorage::new(config.storage.clone())?);
    let (shutdown_tx, _) = broadcast::channel(1);

    info!(
        processor = kind.name(),
        workers,
        topic = %config.feed.topic,
        subscription = %config.feed.subscription,
        "Starting processor"
    );

    let mut handles = Vec::with_capacity(workers);
    for worker in 0..workers {
        let consumer = format!("{}-{}", kind.name(), Uuid::new_v4());
        let feed = RedisFeed::connect(feed_config(&config, consumer))
            .await
            .with_context(|| format!("worker {} failed to connect to the feed", worker))?;

        let catalog: Option<Box<dyn CatalogLoader>> = match &config.database {
            Some(db) => Some(Box::new(PgStacCatalog::new(db.clone())?)),
            None => None,
        };
        let processor = kind.build(&config, store.clone(), catalog)?;

        let scope_root = config.working_dir.join(format!("worker-{}", worker));
        let mut runtime =
            ProcessorRuntime::new(feed, processor, &config.feed, scope_root).with_worker(worker);
        let shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(async move { runtime.run(shutdown).await }));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested, finishing in-flight messages");
    if shutdown_tx.send(()).is_err() {
        debug!("No workers left listening for shutdown");
    }

    for (worker, handle) in handles.into_iter().enumerate() {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(worker, error = %e, "Worker failed"),
            Err(e) => error!(worker, error = %e, "Worker panicked"),
        }
    }

    info!("Processor stopped");
    Ok(())
}

/// Push one event onto the topic.
async fn publish(config: &ProcessorConfig, url: &str) -> Result<()> {
    let mut feed = RedisFeed::connect(feed_config(config, format!("publisher-{}", Uuid::new_v4())))
        .await
        .context("Failed to connect to the feed")?;
    let id = feed.publish(&FeedEvent::new(url).to_payload()?).await?;
    info!(id = %id, url, topic = %config.feed.topic, "Published event");
    println!("{}", id);
    Ok(())
}
