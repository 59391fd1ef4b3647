use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::redis::RedisHandle;
use crate::core::time::Clock;
use crate::services::llm::GradingMode;

pub(crate) const GRADING_QUEUE_KEY: &str = "queue:grading";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum JobKind {
    Grading,
    Regrade,
}

impl JobKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Grading => "grading",
            Self::Regrade => "regrade",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GradingJob {
    pub(crate) submission_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) mode: Option<GradingMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) need_rewrite: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueuedJob {
    pub(crate) id: String,
    pub(crate) kind: JobKind,
    pub(crate) payload: GradingJob,
    /// Unix seconds.
    pub(crate) enqueued_at: i64,
}

#[async_trait]
pub(crate) trait JobQueue: Send + Sync {
    async fn enqueue(&self, kind: JobKind, job: GradingJob) -> anyhow::Result<String>;
    async fn dequeue(&self) -> anyhow::Result<Option<QueuedJob>>;
    async fn len(&self) -> anyhow::Result<u64>;
}

/// FIFO queue on a Redis list: `LPUSH` on enqueue, `RPOP` on dequeue.
#[derive(Clone)]
pub(crate) struct RedisJobQueue {
    redis: RedisHandle,
    clock: Arc<dyn Clock>,
    key: String,
}

impl RedisJobQueue {
    pub(crate) fn new(redis: RedisHandle, clock: Arc<dyn Clock>) -> Self {
        Self { redis, clock, key: GRADING_QUEUE_KEY.to_string() }
    }
}

pub(crate) fn new_job(kind: JobKind, payload: GradingJob, enqueued_at: i64) -> QueuedJob {
    QueuedJob { id: Uuid::new_v4().to_string(), kind, payload, enqueued_at }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, kind: JobKind, job: GradingJob) -> anyhow::Result<String> {
        let job = new_job(kind, job, self.clock.now_utc().unix_timestamp());
        let message = serde_json::to_string(&job)?;
        self.redis.push_list(&self.key, &message).await?;

        metrics::counter!("jobs_enqueued_total", "kind" => kind.as_str()).increment(1);
        tracing::debug!(
            job_id = %job.id,
            submission_id = %job.payload.submission_id,
            kind = kind.as_str(),
            "Job enqueued"
        );
        Ok(job.id)
    }

    async fn dequeue(&self) -> anyhow::Result<Option<QueuedJob>> {
        while let Some(message) = self.redis.pop_list(&self.key).await? {
            match serde_json::from_str::<QueuedJob>(&message) {
                Ok(job) => return Ok(Some(job)),
                Err(err) => {
                    metrics::counter!("jobs_dropped_total").increment(1);
                    tracing::warn!(error = %err, message = %message, "Dropping malformed job");
                }
            }
        }
        Ok(None)
    }

    async fn len(&self) -> anyhow::Result<u64> {
        Ok(self.redis.list_len(&self.key).await?)
    }
}
