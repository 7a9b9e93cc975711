//! Process entry point: loads configuration, wires a Redis-backed store,
//! spawns the reaper and worker-loop tasks, and serves the HTTP surface.
//!
//! The real project-generation engine is an external collaborator outside
//! this workspace's scope (§1); workers here are wired against
//! `generator_demo::DemoGenerator`, a deterministic stand-in, so the binary
//! is runnable end-to-end. A production deployment swaps it for the real
//! engine by providing another `queue_core::Generator` impl.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use generator_demo::DemoGenerator;
use queue_core::{AdmissionController, QueueManager, TimeoutReaper, WorkerLoop};
use queue_server::{routes, settings::Settings, state::AppState};
use queue_store_redis::RedisStoreAdapter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Overrides layered on top of `Settings::load()`'s defaults/file/env chain.
/// Each flag also reads its matching `QUEUE__*` environment variable, so a
/// container deployment can set either.
#[derive(Parser, Debug)]
#[command(name = "queue-server")]
#[command(about = "Multi-tenant job-queue service for project-generation requests")]
struct Args {
    #[arg(long, env = "QUEUE__HTTP_BIND_ADDR")]
    bind: Option<String>,

    #[arg(long, env = "QUEUE__REDIS_URL")]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut settings = Settings::load()?;
    if let Some(bind) = args.bind {
        settings.http_bind_addr = bind;
    }
    if let Some(redis_url) = args.redis_url {
        settings.redis_url = redis_url;
    }
    let config = settings.queue_config();

    let store = Arc::new(RedisStoreAdapter::connect(&settings.redis_url).await?);
    let queue = Arc::new(QueueManager::new(store.clone(), config.clone()));
    let admission = Arc::new(AdmissionController::new(store.clone(), config.clone()));

    let reaper = TimeoutReaper::new(store.clone(), config.clone());
    tokio::spawn(reaper.run());

    let generator = Arc::new(DemoGenerator::default());
    for i in 0..config.worker_count {
        let worker = WorkerLoop::new(
            format!("worker-{i}"),
            Arc::clone(&queue),
            Arc::clone(&generator),
        );
        tokio::spawn(worker.run());
    }

    let app = routes::build_router(AppState {
        admission,
        queue,
        config: config.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&settings.http_bind_addr).await?;
    tracing::info!(addr = %settings.http_bind_addr, workers = config.worker_count, "queue-server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
