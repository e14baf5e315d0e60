mod handlers;
mod metrics;
mod routes;

use codecup_common::config::Settings;
use codecup_common::redis::{RedisJobQueue, RedisJobStore};
use codecup_common::{JobCoordinator, JsonTaskProvider};
use redis::aio::ConnectionManager;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: JobCoordinator,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if std::env::var("LOG_FORMAT").map(|v| v == "json").unwrap_or(false) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    info!("Codecup API booting...");

    let settings = Settings::from_env();

    let tasks = Arc::new(
        JsonTaskProvider::load(&settings.tasks_path).expect("Failed to load task file"),
    );
    info!(tasks = tasks.len(), path = %settings.tasks_path.display(), "Loaded tasks");

    let client = redis::Client::open(settings.redis_url.as_str())
        .expect("Failed to create Redis client");

    let redis_conn = ConnectionManager::new(client).await
        .expect("Failed to connect to Redis");

    info!("Connected to Redis: {}", settings.redis_url);

    let coordinator = JobCoordinator::new(
        Arc::new(RedisJobStore::new(redis_conn.clone(), settings.job_ttl_seconds)),
        Arc::new(RedisJobQueue::new(redis_conn)),
        tasks,
    )
    .with_max_source_bytes(settings.max_source_bytes);

    let state = Arc::new(AppState { coordinator });
    let app = routes::routes().with_state(state);

    let listener = TcpListener::bind(&settings.bind_addr).await
        .expect("Failed to bind to address");

    info!("HTTP server listening on {}", settings.bind_addr);
    info!("Ready to accept submissions");

    axum::serve(listener, app).await
        .expect("Server error");
}
