use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::SubmissionStatus;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Submission {
    pub(crate) id: String,
    pub(crate) homework_id: String,
    pub(crate) student_id: String,
    pub(crate) status: SubmissionStatus,
    pub(crate) ocr_text: Option<String>,
    pub(crate) grading_json: Option<Json<serde_json::Value>>,
    pub(crate) total_score: Option<f64>,
    pub(crate) error_code: Option<String>,
    pub(crate) error_msg: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

impl Submission {
    /// Cached OCR text, ignoring blank values left by earlier runs.
    pub(crate) fn cached_ocr_text(&self) -> Option<&str> {
        self.ocr_text.as_deref().filter(|text| !text.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct SubmissionImage {
    pub(crate) id: String,
    pub(crate) submission_id: String,
    pub(crate) object_key: String,
    pub(crate) content_type: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
}
