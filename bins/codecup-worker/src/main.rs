mod config;
mod docker;
mod engine;
mod evaluator;
mod executor;
mod formatter;
mod harness;
mod sandbox;
mod worker;
mod workspace;


use codecup_common::config::Settings;
use codecup_common::redis::{RedisJobQueue, RedisJobStore};
use codecup_common::{JobCoordinator, JsonTaskProvider};
use config::{EngineKind, WorkerConfig};
use docker::DockerEngine;
use engine::{ExecutionEngine, ProcessEngine};
use executor::Grader;
use formatter::ResultFormatter;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Codecup Worker booting...");

    let settings = Settings::from_env();
    let config = WorkerConfig::load_default().map_err(|e| {
        error!("Failed to load worker configuration: {:#}", e);
        e
    })?;

    let tasks = Arc::new(JsonTaskProvider::load(&settings.tasks_path).map_err(|e| {
        error!("Failed to load tasks from {}: {}", settings.tasks_path.display(), e);
        e
    })?);
    info!(tasks = tasks.len(), path = %settings.tasks_path.display(), "Loaded tasks");

    let engine: Arc<dyn ExecutionEngine> = match config.engine {
        EngineKind::Process => Arc::new(
            ProcessEngine::new(config.python_bin.clone(), config.memory_limit_bytes())
                .with_workspace_root(config.workspace_root.clone()),
        ),
        EngineKind::Docker => {
            let engine = DockerEngine::new(
                config.docker_image.clone(),
                config.memory_limit_bytes(),
                config.cpu_limit,
            )?;
            engine.ensure_image().await?;
            Arc::new(engine)
        }
    };
    info!(
        engine = engine.name(),
        concurrency = config.concurrency,
        memory_mb = config.memory_limit_mb,
        "Sandbox configured"
    );

    let mut formatter = ResultFormatter::new(config.max_message_chars, config.max_output_chars);
    if let Some(root) = &config.workspace_root {
        formatter = formatter.with_scrubbed_root(root);
    }
    let grader = Arc::new(Grader::new(
        tasks.clone(),
        engine,
        formatter,
        config.max_output_chars,
    ));

    let client = ::redis::Client::open(settings.redis_url.as_str())?;
    let store_conn = ::redis::aio::ConnectionManager::new(client.clone()).await?;
    let store = Arc::new(RedisJobStore::new(store_conn, settings.job_ttl_seconds));
    info!("Connected to Redis: {}", settings.redis_url);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers = JoinSet::new();
    for worker_id in 0..config.concurrency {
        // BLPOP parks its connection, so every worker pops on its own
        let queue_conn = ::redis::aio::ConnectionManager::new(client.clone()).await?;
        let coordinator = JobCoordinator::new(
            store.clone(),
            Arc::new(RedisJobQueue::new(queue_conn)),
            tasks.clone(),
        );
        workers.spawn(worker::worker_loop(
            worker_id,
            coordinator,
            grader.clone(),
            shutdown_rx.clone(),
        ));
    }

    tokio::select! {
        _ = signal::ctrl_c() => {
            warn!("Received shutdown signal, finishing in-flight jobs...");
            let _ = shutdown_tx.send(true);
        }
        _ = workers.join_next() => {
            error!("A worker exited unexpectedly, shutting down");
            let _ = shutdown_tx.send(true);
        }
    }

    while workers.join_next().await.is_some() {}

    info!("Worker shutdown complete");
    Ok(())
}
