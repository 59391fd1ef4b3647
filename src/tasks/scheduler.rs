use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::core::dynamic_config::DynamicConfig;
use crate::core::state::AppState;
use crate::repositories::system_config::PgConfigSource;
use crate::services::grading::GradingService;
use crate::services::llm::{ChatCompletionProvider, LlmConfigResolver};
use crate::services::ocr;
use crate::services::quota::QuotaTracker;
use crate::services::storage::ObjectStore;
use crate::tasks::grading::GradingPipeline;
use crate::tasks::queue::JobQueue;

/// Builds the grading pipeline from settings and runs the worker pool until shutdown.
pub(crate) async fn run(state: AppState) -> Result<()> {
    let settings = state.settings();
    let objects: Arc<dyn ObjectStore> =
        state.objects().ok_or_else(|| anyhow::anyhow!("S3 storage is not configured"))?;

    let config = DynamicConfig::new(
        Arc::new(PgConfigSource::new(state.db().clone())),
        state.clock(),
        Duration::from_secs(settings.worker().config_cache_ttl_seconds),
    );
    let quota = QuotaTracker::new(
        Arc::new(state.redis().clone()),
        config.clone(),
        state.clock(),
        settings.budget().clone(),
    );
    let llm = ChatCompletionProvider::new(
        LlmConfigResolver::new(config.clone(), settings.llm().clone()),
        state.clock(),
    )?;
    let ocr = ocr::from_settings(settings, config, state.clock())?;
    let grader = GradingService::new(Arc::new(llm), Arc::new(quota), settings.llm());
    let pipeline = GradingPipeline::new(state.store(), objects, ocr, grader);

    let worker_count = settings.worker().concurrency;
    let poll_interval = Duration::from_millis(settings.worker().poll_interval_ms);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        handles.push(tokio::spawn(grading_worker(
            worker_id,
            state.queue(),
            pipeline.clone(),
            poll_interval,
            shutdown_rx.clone(),
        )));
    }
    tracing::info!(workers = worker_count, "Grading workers started");

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to background tasks");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Background task join failed");
        }
    }

    Ok(())
}

pub(crate) async fn grading_worker(
    worker_id: usize,
    queue: Arc<dyn JobQueue>,
    pipeline: GradingPipeline,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.dequeue().await {
            Ok(Some(job)) => {
                tracing::debug!(
                    worker_id,
                    job_id = %job.id,
                    kind = job.kind.as_str(),
                    "Job claimed"
                );
                pipeline.process(&job).await;
                continue;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(worker_id, error = %err, "Failed to poll grading queue");
            }
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(poll_interval) => {}
        }
    }

    tracing::info!(worker_id, "Grading worker stopped");
}
