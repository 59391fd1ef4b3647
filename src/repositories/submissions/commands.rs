use sqlx::types::Json;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::types::SubmissionStatus;

use super::types::DoneUpdate;

/// Moves the submission into PROCESSING and clears any earlier failure.
pub(crate) async fn mark_processing(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE submissions
         SET status = $1,
             error_code = NULL,
             error_msg = NULL,
             grading_json = NULL,
             total_score = NULL,
             updated_at = $2
         WHERE id = $3",
    )
    .bind(SubmissionStatus::Processing)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

pub(crate) async fn save_ocr_text(
    pool: &PgPool,
    id: &str,
    ocr_text: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE submissions
         SET ocr_text = $1,
             updated_at = $2
         WHERE id = $3",
    )
    .bind(ocr_text)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn mark_done(
    pool: &PgPool,
    id: &str,
    params: DoneUpdate,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE submissions
         SET status = $1,
             grading_json = $2,
             total_score = $3,
             error_code = NULL,
             error_msg = NULL,
             updated_at = $4
         WHERE id = $5",
    )
    .bind(SubmissionStatus::Done)
    .bind(Json(params.grading_json))
    .bind(params.total_score)
    .bind(params.completed_at)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) async fn mark_failed(
    pool: &PgPool,
    id: &str,
    error_code: &str,
    error_msg: &str,
    now: PrimitiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE submissions
         SET status = $1,
             error_code = $2,
             error_msg = $3,
             grading_json = NULL,
             total_score = NULL,
             updated_at = $4
         WHERE id = $5",
    )
    .bind(SubmissionStatus::Failed)
    .bind(error_code)
    .bind(error_msg)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Resets a finished (or stuck) submission to QUEUED, keeping its OCR text.
///
/// Returns `false` when the row is already queued or was picked up by a worker after
/// `stale_before`.
pub(crate) async fn reset_for_regrade(
    pool: &PgPool,
    id: &str,
    stale_before: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE submissions
         SET status = $1,
             error_code = NULL,
             error_msg = NULL,
             grading_json = NULL,
             total_score = NULL,
             updated_at = $2
         WHERE id = $3
           AND (status IN ($4, $5) OR (status = $6 AND updated_at < $7))",
    )
    .bind(SubmissionStatus::Queued)
    .bind(now)
    .bind(id)
    .bind(SubmissionStatus::Done)
    .bind(SubmissionStatus::Failed)
    .bind(SubmissionStatus::Processing)
    .bind(stale_before)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}
