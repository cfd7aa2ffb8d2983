use axum::{extract::Path, response::Json, Extension};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::services::{ApprovalAction, ApprovalService};

/// GET /api/approvals/pending - steps currently waiting on the caller
pub async fn pending_get(Extension(user): Extension<AuthUser>) -> Result<Json<Value>, ApiError> {
    let service = ApprovalService::new().await?;
    let pending = service.list_pending_approvals(&user.nik).await?;

    Ok(Json(json!({ "success": true, "data": pending })))
}

/// POST /api/approvals/:id - approve or reject one step
pub async fn action_post(
    Extension(user): Extension<AuthUser>,
    Path(step_id): Path<Uuid>,
    Json(action): Json<ApprovalAction>,
) -> Result<Json<Value>, ApiError> {
    let service = ApprovalService::new().await?;
    let outcome = service.apply_action(&user.nik, step_id, action).await?;

    // A failed external sync rides along as a report; the approval itself
    // succeeded locally.
    Ok(Json(json!({ "success": true, "data": outcome })))
}

/// GET /api/approvals/history - steps the caller has already resolved
pub async fn history_get(Extension(user): Extension<AuthUser>) -> Result<Json<Value>, ApiError> {
    let service = ApprovalService::new().await?;
    let history = service.list_approval_history(&user.nik).await?;

    Ok(Json(json!({ "success": true, "data": history })))
}
