use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::core::time::{to_primitive_utc, Clock};
use crate::db::models::{Submission, SubmissionImage};
use crate::repositories::{images, submissions};

/// Persistence operations the grading pipeline and regrade flow need.
#[async_trait]
pub(crate) trait SubmissionStore: Send + Sync {
    async fn find(&self, id: &str) -> anyhow::Result<Option<Submission>>;
    async fn list_images(&self, submission_id: &str) -> anyhow::Result<Vec<SubmissionImage>>;
    async fn mark_processing(&self, id: &str) -> anyhow::Result<bool>;
    async fn save_ocr_text(&self, id: &str, text: &str) -> anyhow::Result<()>;
    async fn mark_done(&self, id: &str, grading_json: Value, total_score: f64)
        -> anyhow::Result<()>;
    async fn mark_failed(&self, id: &str, code: &str, message: &str) -> anyhow::Result<()>;
    /// Returns `false` when the submission is queued or still being processed.
    async fn reset_for_regrade(&self, id: &str, stale_after: Duration) -> anyhow::Result<bool>;
}

#[derive(Clone)]
pub(crate) struct PgSubmissionStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PgSubmissionStore {
    pub(crate) fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    fn now(&self) -> PrimitiveDateTime {
        to_primitive_utc(self.clock.now_utc())
    }
}

#[async_trait]
impl SubmissionStore for PgSubmissionStore {
    async fn find(&self, id: &str) -> anyhow::Result<Option<Submission>> {
        submissions::find_by_id(&self.pool, id)
            .await
            .with_context(|| format!("load submission {id}"))
    }

    async fn list_images(&self, submission_id: &str) -> anyhow::Result<Vec<SubmissionImage>> {
        images::list_by_submission(&self.pool, submission_id)
            .await
            .with_context(|| format!("list images for submission {submission_id}"))
    }

    async fn mark_processing(&self, id: &str) -> anyhow::Result<bool> {
        submissions::mark_processing(&self.pool, id, self.now())
            .await
            .with_context(|| format!("mark submission {id} processing"))
    }

    async fn save_ocr_text(&self, id: &str, text: &str) -> anyhow::Result<()> {
        submissions::save_ocr_text(&self.pool, id, text, self.now())
            .await
            .with_context(|| format!("save OCR text for submission {id}"))
    }

    async fn mark_done(
        &self,
        id: &str,
        grading_json: Value,
        total_score: f64,
    ) -> anyhow::Result<()> {
        submissions::mark_done(
            &self.pool,
            id,
            submissions::DoneUpdate { grading_json, total_score, completed_at: self.now() },
        )
        .await
        .with_context(|| format!("mark submission {id} done"))
    }

    async fn mark_failed(&self, id: &str, code: &str, message: &str) -> anyhow::Result<()> {
        submissions::mark_failed(&self.pool, id, code, message, self.now())
            .await
            .with_context(|| format!("mark submission {id} failed"))
    }

    async fn reset_for_regrade(&self, id: &str, stale_after: Duration) -> anyhow::Result<bool> {
        let now = self.clock.now_utc();
        let stale_before = to_primitive_utc(now - stale_after);
        submissions::reset_for_regrade(&self.pool, id, stale_before, to_primitive_utc(now))
            .await
            .with_context(|| format!("reset submission {id} for regrade"))
    }
}
