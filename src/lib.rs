pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::state::AppServices;
use crate::core::time::SystemClock;
use crate::core::{config::Settings, redis::RedisHandle, state::AppState, telemetry};
use crate::services::storage::{ObjectStore, StorageService};
use crate::services::submission_store::PgSubmissionStore;
use crate::tasks::queue::RedisJobQueue;

async fn bootstrap() -> anyhow::Result<(AppState, RedisHandle)> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let redis = RedisHandle::new(settings.redis().redis_url());
    if let Err(err) = redis.connect().await {
        tracing::error!(error = %err, "Failed to connect to Redis; queue and quota degraded");
    } else {
        tracing::info!("Redis connected successfully");
    }

    let clock = Arc::new(SystemClock);
    let objects = StorageService::from_settings(&settings)
        .await?
        .map(|storage| Arc::new(storage) as Arc<dyn ObjectStore>);
    let services = AppServices {
        store: Arc::new(PgSubmissionStore::new(db_pool.clone(), clock.clone())),
        queue: Arc::new(RedisJobQueue::new(redis.clone(), clock.clone())),
        objects,
        clock,
    };

    Ok((AppState::new(settings, db_pool, redis.clone(), services), redis))
}

pub async fn run() -> anyhow::Result<()> {
    let (state, redis) = bootstrap().await?;

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        "Essay grader API listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}

pub async fn run_worker() -> anyhow::Result<()> {
    let (state, redis) = bootstrap().await?;

    let result = tasks::scheduler::run(state).await;

    redis.disconnect().await;
    tracing::info!("Redis disconnected");

    result?;

    Ok(())
}
