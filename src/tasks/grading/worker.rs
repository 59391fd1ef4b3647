use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use thiserror::Error;

use crate::db::models::Submission;
use crate::services::grading::errors::GradingError;
use crate::services::grading::{GradeOptions, GradingService};
use crate::services::ocr::OcrProvider;
use crate::services::storage::ObjectStore;
use crate::services::submission_store::SubmissionStore;
use crate::tasks::queue::QueuedJob;

#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    #[error("Submission not found")]
    SubmissionNotFound,
    #[error("OCR returned empty text")]
    OcrEmpty,
    #[error(transparent)]
    Grading(#[from] GradingError),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl PipelineError {
    pub(crate) fn code(&self) -> &'static str {
        match self {
            Self::SubmissionNotFound => "SUBMISSION_NOT_FOUND",
            Self::OcrEmpty => "OCR_EMPTY",
            Self::Grading(err) => err.code.as_str(),
            Self::Unexpected(_) => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum JobOutcome {
    Done { total_score: f64 },
    Failed { code: &'static str },
    Skipped,
    NotFound,
}

impl JobOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
            Self::Skipped => "skipped",
            Self::NotFound => "not_found",
        }
    }
}

/// Drives one submission through OCR and grading and records the terminal state.
#[derive(Clone)]
pub(crate) struct GradingPipeline {
    store: Arc<dyn SubmissionStore>,
    objects: Arc<dyn ObjectStore>,
    ocr: Arc<dyn OcrProvider>,
    grader: GradingService,
}

impl GradingPipeline {
    pub(crate) fn new(
        store: Arc<dyn SubmissionStore>,
        objects: Arc<dyn ObjectStore>,
        ocr: Arc<dyn OcrProvider>,
        grader: GradingService,
    ) -> Self {
        Self { store, objects, ocr, grader }
    }

    pub(crate) async fn process(&self, job: &QueuedJob) -> JobOutcome {
        let started = Instant::now();
        let submission_id = job.payload.submission_id.as_str();

        let outcome = match self.store.find(submission_id).await {
            Ok(Some(submission)) if submission.status.is_terminal() => {
                tracing::info!(
                    job_id = %job.id,
                    submission_id,
                    status = submission.status.as_str(),
                    "Skipping job for finished submission"
                );
                JobOutcome::Skipped
            }
            Ok(Some(submission)) => match self.execute(job, &submission).await {
                Ok(total_score) => JobOutcome::Done { total_score },
                Err(err) => self.fail(job, submission_id, err).await,
            },
            Ok(None) => {
                tracing::warn!(
                    job_id = %job.id,
                    submission_id,
                    code = PipelineError::SubmissionNotFound.code(),
                    "Submission not found"
                );
                JobOutcome::NotFound
            }
            Err(err) => self.fail(job, submission_id, PipelineError::Unexpected(err)).await,
        };

        metrics::counter!("grading_jobs_total", "status" => outcome.label()).increment(1);
        metrics::histogram!("grading_job_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        outcome
    }

    async fn execute(
        &self,
        job: &QueuedJob,
        submission: &Submission,
    ) -> Result<f64, PipelineError> {
        let submission_id = submission.id.as_str();
        if !self.store.mark_processing(submission_id).await? {
            return Err(PipelineError::SubmissionNotFound);
        }

        let text = match submission.cached_ocr_text() {
            Some(cached) => {
                tracing::debug!(submission_id, "Using cached OCR text");
                cached.trim().to_string()
            }
            None => {
                let text = self.recognize_images(submission_id).await?;
                self.store.save_ocr_text(submission_id, &text).await?;
                text
            }
        };

        let options = GradeOptions {
            need_rewrite: job.payload.need_rewrite,
            mode: job.payload.mode,
            rubric: None,
        };
        let llm_started = Instant::now();
        let graded = self.grader.grade(&text, options).await?;
        let total_score = graded.result.total_score;
        let grading_json =
            serde_json::to_value(&graded.result).context("serialize grading result")?;

        self.store.mark_done(submission_id, grading_json, total_score).await?;

        if let Some(reason) = graded.meta.degrade_reason {
            metrics::counter!("grading_degraded_total", "reason" => reason.as_str()).increment(1);
        }
        tracing::info!(
            job_id = %job.id,
            kind = job.kind.as_str(),
            submission_id,
            total_score,
            provider = %graded.meta.provider_name,
            model = %graded.meta.model,
            degraded = graded.meta.degraded,
            degrade_reason = graded.meta.degrade_reason.map(|reason| reason.as_str()),
            attempts = graded.meta.attempt_count,
            llm_ms = llm_started.elapsed().as_millis() as u64,
            "Submission graded"
        );

        Ok(total_score)
    }

    /// OCRs every image in upload order. Unreadable images are skipped.
    async fn recognize_images(&self, submission_id: &str) -> Result<String, PipelineError> {
        let started = Instant::now();
        let images = self.store.list_images(submission_id).await?;
        let mut texts = Vec::with_capacity(images.len());

        for image in &images {
            let bytes = match self.objects.get(&image.object_key).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(
                        submission_id,
                        object_key = %image.object_key,
                        error = %err,
                        "Failed to load submission image"
                    );
                    continue;
                }
            };

            match self.ocr.recognize(&bytes).await {
                Ok(text) if !text.trim().is_empty() => texts.push(text.trim().to_string()),
                Ok(_) => {
                    tracing::warn!(
                        submission_id,
                        object_key = %image.object_key,
                        "OCR returned no text for image"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        submission_id,
                        object_key = %image.object_key,
                        provider = self.ocr.name(),
                        code = err.code(),
                        error = %err,
                        "OCR failed for image"
                    );
                }
            }
        }

        metrics::histogram!("ocr_duration_seconds").record(started.elapsed().as_secs_f64());
        if texts.is_empty() {
            return Err(PipelineError::OcrEmpty);
        }

        tracing::info!(
            submission_id,
            images = images.len(),
            recognized = texts.len(),
            "OCR finished"
        );
        Ok(texts.join("\n"))
    }

    async fn fail(&self, job: &QueuedJob, submission_id: &str, err: PipelineError) -> JobOutcome {
        let code = err.code();
        let message = err.to_string();
        tracing::error!(
            job_id = %job.id,
            submission_id,
            code,
            error = %message,
            "Grading job failed"
        );

        if let Err(update_err) = self.store.mark_failed(submission_id, code, &message).await {
            tracing::error!(
                submission_id,
                error = %update_err,
                "Failed to record submission failure"
            );
        }

        JobOutcome::Failed { code }
    }
}
