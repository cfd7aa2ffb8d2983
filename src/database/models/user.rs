use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Portal user. The `nik` is the employee identifier and doubles as the
/// username and the key for directory lookups.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub nik: String,
    pub name: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password: String,
    pub is_hr_approver: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub async fn find_by_id<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_nik<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        nik: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE nik = $1")
            .bind(nik)
            .fetch_optional(executor)
            .await
    }

    /// The designated HR role-holder for approval level 2.
    pub async fn find_hr_approver<'e>(
        executor: impl sqlx::PgExecutor<'e>,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM users WHERE is_hr_approver = TRUE ORDER BY created_at ASC LIMIT 1",
        )
        .fetch_optional(executor)
        .await
    }
}
