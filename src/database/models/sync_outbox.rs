//! Durable marker for pending external synchronization.
//!
//! A row is enqueued in the same transaction that applies an access grant
//! for an externally-mirrored application. Delivery happens after commit
//! and is retryable; a failed attempt records the error instead of losing
//! it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "sync_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SyncOutbox {
    pub id: Uuid,
    pub request_code: String,
    pub application_code: String,
    pub user_id: Uuid,
    pub status: SyncStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl SyncOutbox {
    pub async fn enqueue<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        request_code: &str,
        application_code: &str,
        user_id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO sync_outbox (request_code, application_code, user_id)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(request_code)
        .bind(application_code)
        .bind(user_id)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM sync_outbox WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    /// Entries still owed to an external system, oldest first.
    pub async fn list_undelivered<'e>(
        executor: impl sqlx::PgExecutor<'e>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM sync_outbox
            WHERE status IN ('pending', 'failed')
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(executor)
        .await
    }

    pub async fn mark_delivered<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE sync_outbox
            SET status = 'delivered', attempts = attempts + 1, delivered_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(executor)
        .await
    }

    pub async fn mark_failed<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        id: Uuid,
        error: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE sync_outbox
            SET status = 'failed', attempts = attempts + 1, last_error = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_one(executor)
        .await
    }
}
