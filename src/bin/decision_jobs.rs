//! # decision-jobs
//!
//! Process entry point: workers, scheduler and producer API, alone or
//! together, plus one-shot maintenance commands.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use decision_jobs::alerts::LogNotifier;
use decision_jobs::backend::{BackendApi, BackendClient};
use decision_jobs::config::AppConfig;
use decision_jobs::dispatch::{Dispatcher, WorkerPool};
use decision_jobs::handlers::default_registry;
use decision_jobs::logging::{get_environment, init_structured_logging};
use decision_jobs::messaging::{MemoryQueueStore, PostgresQueueStore, QueueStore};
use decision_jobs::producer::JobProducer;
use decision_jobs::scheduler::Scheduler;
use decision_jobs::web::{create_app, AppState};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "decision-jobs")]
#[command(about = "Priority job dispatch for the decision-intelligence backend")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Keep queues in memory instead of PostgreSQL (nothing survives a restart)
    #[arg(long, global = true)]
    in_memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run workers, scheduler and producer API in one process
    Serve,
    /// Run the worker pool only
    Worker,
    /// Run the producer API only
    Api,
    /// Enqueue a scheduled job immediately
    RunScheduled {
        /// resolution-sync, network-refresh, batch-scoring, watchlist-sync or cleanup
        job: String,
    },
    /// Apply queue store migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load().context("failed to load configuration")?;
    init_structured_logging();

    let store = open_store(&config, cli.in_memory).await?;

    match cli.command {
        Commands::Serve => serve(&config, store, true, true, true).await,
        Commands::Worker => serve(&config, store, true, false, false).await,
        Commands::Api => serve(&config, store, false, false, true).await,
        Commands::RunScheduled { job } => {
            let scheduler = Scheduler::new(JobProducer::new(store));
            let queued = scheduler.trigger(&job).await?;
            println!("{}", serde_json::to_string_pretty(&queued)?);
            Ok(())
        }
        // migrations already ran in open_store
        Commands::Migrate => Ok(()),
    }
}

async fn open_store(config: &AppConfig, in_memory: bool) -> Result<Arc<dyn QueueStore>> {
    let lease = config.dispatcher.lease();
    if in_memory {
        info!("Using in-memory queue store");
        return Ok(Arc::new(MemoryQueueStore::new().with_lease(lease)));
    }

    let pool = PostgresQueueStore::connect(
        &config.database.url,
        config.database.max_connections,
        config.database.acquire_timeout(),
    )
    .await
    .context("failed to connect to the queue database")?;
    let store = PostgresQueueStore::new(pool).with_lease(lease);
    store.migrate().await.context("failed to apply migrations")?;
    Ok(Arc::new(store))
}

async fn serve(
    config: &AppConfig,
    store: Arc<dyn QueueStore>,
    run_workers: bool,
    run_scheduler: bool,
    run_api: bool,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pool = if run_workers {
        let backend: Arc<dyn BackendApi> = Arc::new(BackendClient::new(config.backend.clone())?);
        let registry = default_registry(
            backend,
            store.clone(),
            Arc::new(LogNotifier),
            config.retention,
        );
        let dispatcher = Arc::new(
            Dispatcher::new(store.clone(), Arc::new(registry))
                .with_lease_renewal(config.dispatcher.lease_renewal()),
        );
        Some(WorkerPool::spawn(
            config.dispatcher.workers,
            &config.dispatcher.service_id,
            dispatcher,
            config.dispatcher.poll_interval(),
        ))
    } else {
        None
    };

    let scheduler: Option<JoinHandle<()>> = if run_scheduler && config.scheduler.enabled {
        let scheduler = Scheduler::new(JobProducer::new(store.clone()));
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move { scheduler.run(rx).await }))
    } else {
        None
    };

    let api: Option<JoinHandle<()>> = if run_api {
        let app = create_app(
            AppState::new(store.clone(), get_environment()),
            config.web.request_timeout(),
        );
        let listener = tokio::net::TcpListener::bind(&config.web.bind_address)
            .await
            .with_context(|| format!("failed to bind {}", config.web.bind_address))?;
        info!(bind_address = %config.web.bind_address, "Producer API listening");

        let mut rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move {
                // sender dropped also means shut down
                let _ = rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "Producer API server failed");
            }
        }))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    // receivers may already be gone
    let _ = shutdown_tx.send(true);

    if let Some(pool) = pool {
        pool.shutdown_and_join().await;
    }
    for handle in [scheduler, api].into_iter().flatten() {
        if let Err(e) = handle.await {
            error!(error = %e, "Background task ended abnormally");
        }
    }
    info!("decision-jobs stopped");
    Ok(())
}
