use serde::{Deserialize, Serialize};

use crate::core::time::format_primitive;
use crate::db::models::Submission;
use crate::db::types::SubmissionStatus;
use crate::services::llm::GradingMode;
use crate::services::regrade::{RegradeRequest, RegradeTicket};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmissionResponse {
    pub(crate) id: String,
    pub(crate) homework_id: String,
    pub(crate) student_id: String,
    pub(crate) status: SubmissionStatus,
    pub(crate) total_score: Option<f64>,
    pub(crate) grading: Option<serde_json::Value>,
    pub(crate) error_code: Option<String>,
    pub(crate) error_msg: Option<String>,
    pub(crate) has_ocr_text: bool,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl From<Submission> for SubmissionResponse {
    fn from(submission: Submission) -> Self {
        let has_ocr_text = submission.cached_ocr_text().is_some();
        Self {
            id: submission.id,
            homework_id: submission.homework_id,
            student_id: submission.student_id,
            status: submission.status,
            total_score: submission.total_score,
            grading: submission.grading_json.map(|json| json.0),
            error_code: submission.error_code,
            error_msg: submission.error_msg,
            has_ocr_text,
            created_at: format_primitive(submission.created_at),
            updated_at: format_primitive(submission.updated_at),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegradeBody {
    pub(crate) mode: Option<GradingMode>,
    pub(crate) need_rewrite: Option<bool>,
}

impl From<RegradeBody> for RegradeRequest {
    fn from(body: RegradeBody) -> Self {
        Self { mode: body.mode, need_rewrite: body.need_rewrite }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RegradeResponse {
    pub(crate) submission_id: String,
    pub(crate) job_id: String,
    pub(crate) status: SubmissionStatus,
}

impl From<RegradeTicket> for RegradeResponse {
    fn from(ticket: RegradeTicket) -> Self {
        Self {
            submission_id: ticket.submission_id,
            job_id: ticket.job_id,
            status: SubmissionStatus::Queued,
        }
    }
}
