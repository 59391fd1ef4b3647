use time::PrimitiveDateTime;

pub(crate) const COLUMNS: &str = "\
    id, homework_id, student_id, status, ocr_text, grading_json, total_score, \
    error_code, error_msg, created_at, updated_at";

pub(crate) struct DoneUpdate {
    pub(crate) grading_json: serde_json::Value,
    pub(crate) total_score: f64,
    pub(crate) completed_at: PrimitiveDateTime,
}
