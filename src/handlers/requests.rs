use axum::{extract::Path, response::Json, Extension};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::services::{CreateRequestInput, RequestService};

/// POST /api/requests - submit an access or role-change request
pub async fn request_post(
    Extension(user): Extension<AuthUser>,
    Json(input): Json<CreateRequestInput>,
) -> Result<Json<Value>, ApiError> {
    let service = RequestService::new().await?;
    let created = service.create_request(user.user_id, input).await?;

    Ok(Json(json!({ "success": true, "data": created })))
}

/// GET /api/requests - the caller's requests, newest first
pub async fn request_list(
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Value>, ApiError> {
    let service = RequestService::new().await?;
    let requests = service.list_requests_for_user(user.user_id).await?;

    Ok(Json(json!({ "success": true, "data": requests })))
}

/// GET /api/requests/:code - one request with its approval chain
pub async fn request_get(
    Extension(user): Extension<AuthUser>,
    Path(code): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let service = RequestService::new().await?;
    let detail = service.get_request_detail(user.user_id, &code).await?;

    Ok(Json(json!({ "success": true, "data": detail })))
}
