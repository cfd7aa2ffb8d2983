use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Whether an application's roles come from a fixed catalog or are
/// described free-text per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "role_mode", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RoleMode {
    Fixed,
    Dynamic,
}

/// An internal application users can request access to.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Application {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub role_mode: RoleMode,
    /// Registered owner, approval level 3.
    pub owner_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    pub async fn find_by_id<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM applications WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }
}
