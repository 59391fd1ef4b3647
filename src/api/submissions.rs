use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::schemas::submission::{RegradeBody, RegradeResponse, SubmissionResponse};
use crate::services::regrade::RegradeService;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:submission_id", get(get_submission))
        .route("/:submission_id/regrade", post(regrade_submission))
}

async fn get_submission(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    let submission = state
        .store()
        .find(&submission_id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to load submission"))?
        .ok_or_else(|| ApiError::NotFound("Submission not found".to_string()))?;

    Ok(Json(submission.into()))
}

async fn regrade_submission(
    State(state): State<AppState>,
    Path(submission_id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<RegradeResponse>), ApiError> {
    let body = parse_regrade_body(&body)?;
    let stale_after = Duration::from_secs(state.settings().worker().regrade_stale_minutes * 60);
    let service = RegradeService::new(state.store(), state.queue(), state.clock(), stale_after);

    let ticket = service.request_regrade(&submission_id, body.into()).await?;

    Ok((StatusCode::ACCEPTED, Json(ticket.into())))
}

/// An empty body selects the defaults; anything else must be a valid regrade body.
fn parse_regrade_body(bytes: &[u8]) -> Result<RegradeBody, ApiError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(RegradeBody::default());
    }

    serde_json::from_slice(bytes)
        .map_err(|err| ApiError::BadRequest(format!("Invalid regrade body: {err}")))
}
