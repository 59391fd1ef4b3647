use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::core::time::{to_primitive_utc, Clock};
use crate::db::types::SubmissionStatus;
use crate::services::llm::GradingMode;
use crate::services::submission_store::SubmissionStore;
use crate::tasks::queue::{GradingJob, JobKind, JobQueue};

pub(crate) const ENQUEUE_FAILED_CODE: &str = "ENQUEUE_FAILED";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct RegradeRequest {
    pub(crate) mode: Option<GradingMode>,
    pub(crate) need_rewrite: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RegradeTicket {
    pub(crate) submission_id: String,
    pub(crate) job_id: String,
}

#[derive(Debug, Error)]
pub(crate) enum RegradeError {
    #[error("submission not found")]
    NotFound,
    #[error("submission is already {}", .0.as_str())]
    InProgress(SubmissionStatus),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Clone)]
pub(crate) struct RegradeService {
    store: Arc<dyn SubmissionStore>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl RegradeService {
    pub(crate) fn new(
        store: Arc<dyn SubmissionStore>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        stale_after: Duration,
    ) -> Self {
        Self { store, queue, clock, stale_after }
    }

    /// Puts a finished submission back on the queue. OCR text is kept so the
    /// rerun only repeats grading.
    pub(crate) async fn request_regrade(
        &self,
        id: &str,
        request: RegradeRequest,
    ) -> Result<RegradeTicket, RegradeError> {
        let submission = self.store.find(id).await?.ok_or(RegradeError::NotFound)?;

        let stale_before = to_primitive_utc(self.clock.now_utc() - self.stale_after);
        match submission.status {
            SubmissionStatus::Queued => {
                return Err(RegradeError::InProgress(SubmissionStatus::Queued));
            }
            SubmissionStatus::Processing if submission.updated_at >= stale_before => {
                return Err(RegradeError::InProgress(SubmissionStatus::Processing));
            }
            _ => {}
        }

        if !self.store.reset_for_regrade(id, self.stale_after).await? {
            return Err(RegradeError::InProgress(submission.status));
        }

        let job = GradingJob {
            submission_id: id.to_string(),
            mode: request.mode,
            need_rewrite: request.need_rewrite,
        };
        let job_id = match self.queue.enqueue(JobKind::Regrade, job).await {
            Ok(job_id) => job_id,
            Err(err) => {
                self.release(id, &err).await;
                return Err(err.into());
            }
        };

        metrics::counter!("regrade_requests_total").increment(1);
        tracing::info!(
            submission_id = %id,
            job_id = %job_id,
            previous_status = submission.status.as_str(),
            "Submission queued for regrade"
        );

        Ok(RegradeTicket { submission_id: id.to_string(), job_id })
    }

    /// Parks the submission as FAILED so a later regrade can pick it up.
    async fn release(&self, id: &str, err: &anyhow::Error) {
        tracing::error!(submission_id = %id, error = %err, "Failed to enqueue regrade job");
        let message = format!("Failed to enqueue regrade job: {err}");
        if let Err(update_err) = self.store.mark_failed(id, ENQUEUE_FAILED_CODE, &message).await {
            tracing::error!(
                submission_id = %id,
                error = %update_err,
                "Failed to release submission after enqueue error"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use time::macros::datetime;

    use super::{RegradeError, RegradeRequest, RegradeService, ENQUEUE_FAILED_CODE};
    use crate::db::types::SubmissionStatus;
    use crate::services::llm::GradingMode;
    use crate::tasks::queue::JobKind;
    use crate::test_support::{self, InMemoryJobQueue, InMemorySubmissionStore, ManualClock};

    struct Fixture {
        store: Arc<InMemorySubmissionStore>,
        queue: Arc<InMemoryJobQueue>,
        clock: Arc<ManualClock>,
        service: RegradeService,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::at(datetime!(2025-03-10 12:00:00 UTC)));
        let store = Arc::new(InMemorySubmissionStore::new(clock.clone()));
        let queue = Arc::new(InMemoryJobQueue::default());
        let service = RegradeService::new(
            store.clone(),
            queue.clone(),
            clock.clone(),
            Duration::from_secs(15 * 60),
        );
        Fixture { store, queue, clock, service }
    }

    #[tokio::test]
    async fn missing_submission_is_not_found() {
        let fixture = fixture();

        let err = fixture
            .service
            .request_regrade("missing", RegradeRequest::default())
            .await
            .expect_err("not found");

        assert!(matches!(err, RegradeError::NotFound));
    }

    #[tokio::test]
    async fn done_submission_is_requeued_with_ocr_text() {
        let fixture = fixture();
        let mut submission = test_support::submission("sub-1", SubmissionStatus::Done);
        submission.ocr_text = Some("cached text".to_string());
        submission.total_score = Some(72.0);
        submission.grading_json = Some(sqlx::types::Json(test_support::grading_result_json()));
        fixture.store.insert(submission);

        let ticket = fixture
            .service
            .request_regrade(
                "sub-1",
                RegradeRequest { mode: Some(GradingMode::Quality), need_rewrite: Some(true) },
            )
            .await
            .expect("requeued");

        let stored = fixture.store.get("sub-1").expect("stored");
        assert_eq!(stored.status, SubmissionStatus::Queued);
        assert_eq!(stored.ocr_text.as_deref(), Some("cached text"));
        assert!(stored.grading_json.is_none());
        assert!(stored.total_score.is_none());

        let jobs = fixture.queue.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, ticket.job_id);
        assert_eq!(jobs[0].kind, JobKind::Regrade);
        assert_eq!(jobs[0].payload.mode, Some(GradingMode::Quality));
        assert_eq!(jobs[0].payload.need_rewrite, Some(true));
    }

    #[tokio::test]
    async fn queued_or_fresh_processing_is_rejected() {
        let fixture = fixture();
        fixture.store.insert(test_support::submission("queued", SubmissionStatus::Queued));
        fixture.store.insert(test_support::submission("busy", SubmissionStatus::Processing));

        for id in ["queued", "busy"] {
            let err = fixture
                .service
                .request_regrade(id, RegradeRequest::default())
                .await
                .expect_err("in progress");
            assert!(matches!(err, RegradeError::InProgress(_)));
        }
        assert!(fixture.queue.jobs().is_empty());
    }

    #[tokio::test]
    async fn stale_processing_can_be_regraded() {
        let fixture = fixture();
        fixture.store.insert(test_support::submission("stuck", SubmissionStatus::Processing));
        fixture.clock.advance(Duration::from_secs(16 * 60));

        fixture
            .service
            .request_regrade("stuck", RegradeRequest::default())
            .await
            .expect("requeued");

        assert_eq!(fixture.store.get("stuck").expect("stored").status, SubmissionStatus::Queued);
        assert_eq!(fixture.queue.jobs().len(), 1);
    }

    #[tokio::test]
    async fn enqueue_failure_leaves_submission_regradable() {
        let fixture = fixture();
        fixture.store.insert(test_support::submission("sub-2", SubmissionStatus::Failed));
        fixture.queue.fail_enqueue(true);

        let err = fixture
            .service
            .request_regrade("sub-2", RegradeRequest::default())
            .await
            .expect_err("queue down");
        assert!(matches!(err, RegradeError::Internal(_)));

        let stored = fixture.store.get("sub-2").expect("stored");
        assert_eq!(stored.status, SubmissionStatus::Failed);
        assert_eq!(stored.error_code.as_deref(), Some(ENQUEUE_FAILED_CODE));
        assert!(fixture.queue.jobs().is_empty());

        fixture.queue.fail_enqueue(false);
        fixture
            .service
            .request_regrade("sub-2", RegradeRequest::default())
            .await
            .expect("requeued once the queue recovers");

        assert_eq!(fixture.store.get("sub-2").expect("stored").status, SubmissionStatus::Queued);
        assert_eq!(fixture.queue.jobs().len(), 1);
    }
}
