use sqlx::PgPool;

use crate::db::models::SubmissionImage;

pub(crate) const COLUMNS: &str = "id, submission_id, object_key, content_type, created_at";

pub(crate) async fn list_by_submission(
    pool: &PgPool,
    submission_id: &str,
) -> Result<Vec<SubmissionImage>, sqlx::Error> {
    sqlx::query_as::<_, SubmissionImage>(&format!(
        "SELECT {COLUMNS}
         FROM submission_images
         WHERE submission_id = $1
         ORDER BY created_at, id"
    ))
    .bind(submission_id)
    .fetch_all(pool)
    .await
}
