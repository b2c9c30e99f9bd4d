//! Job status handler.

use axum::extract::{Path, State};
use axum::Json;
use qclip_models::{JobId, JobStatusResponse};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `GET /jobs/:job_id`: `processing` until the result document exists.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = JobId::parse(&job_id).map_err(|e| ApiError::bad_request(e.to_string()))?;
    let status = state.status.resolve(&job_id).await?;
    Ok(Json(status))
}
