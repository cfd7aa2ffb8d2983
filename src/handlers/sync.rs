use axum::response::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::services::SyncService;

/// POST /api/sync/retry - re-attempt every undelivered outbox entry
pub async fn retry_post() -> Result<Json<Value>, ApiError> {
    let service = SyncService::new().await?;
    let reports = service.retry_pending().await?;

    Ok(Json(json!({ "success": true, "data": reports })))
}
