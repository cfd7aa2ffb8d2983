//! Approval step model.
//!
//! Each request carries a fixed chain of steps, one approver per level,
//! resolved strictly in ascending level order. A step only ever leaves
//! `pending`, and only while it holds the minimum pending level of its
//! chain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::request::{RequestStatus, RequestType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "approval_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ApprovalStep {
    pub id: Uuid,
    pub request_code: String,
    pub level: i32,
    pub approver_nik: String,
    pub status: ApprovalStatus,
    pub approved_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
}

impl ApprovalStep {
    pub async fn insert<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        request_code: &str,
        level: i32,
        approver_nik: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO approval_steps (request_code, level, approver_nik)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(request_code)
        .bind(level)
        .bind(approver_nik)
        .fetch_one(executor)
        .await
    }

    /// Fetch a step scoped to the acting approver, with a row lock held for
    /// the rest of the transaction. Wrong approver and nonexistent id are
    /// indistinguishable to the caller.
    pub async fn find_for_approver_for_update<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        id: Uuid,
        approver_nik: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM approval_steps
            WHERE id = $1 AND approver_nik = $2
            FOR UPDATE
            "#,
        )
        .bind(id)
        .bind(approver_nik)
        .fetch_optional(executor)
        .await
    }

    /// Minimum level among the chain's still-pending steps.
    pub async fn min_pending_level<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        request_code: &str,
    ) -> Result<Option<i32>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT MIN(level) FROM approval_steps
            WHERE request_code = $1 AND status = 'pending'
            "#,
        )
        .bind(request_code)
        .fetch_one(executor)
        .await
    }

    pub async fn count_pending<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        request_code: &str,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM approval_steps
            WHERE request_code = $1 AND status = 'pending'
            "#,
        )
        .bind(request_code)
        .fetch_one(executor)
        .await
    }

    pub async fn mark_approved<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        id: Uuid,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE approval_steps
            SET status = 'approved', approved_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_one(executor)
        .await
    }

    pub async fn mark_rejected<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        id: Uuid,
        reason: Option<&str>,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE approval_steps
            SET status = 'rejected', approved_at = NOW(), reason = $2
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(reason)
        .fetch_one(executor)
        .await
    }

    /// Short-circuit after a rejection: every still-pending sibling of the
    /// chain is rejected in one statement, never reviewed individually.
    pub async fn reject_remaining_pending<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        request_code: &str,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE approval_steps
            SET status = 'rejected', approved_at = NOW()
            WHERE request_code = $1 AND status = 'pending'
            "#,
        )
        .bind(request_code)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn list_for_request<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        request_code: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM approval_steps
            WHERE request_code = $1
            ORDER BY level ASC
            "#,
        )
        .bind(request_code)
        .fetch_all(executor)
        .await
    }
}

/// A row in an approver's queue: their pending step joined with request
/// context. Only steps currently holding the minimum pending level of
/// their chain qualify.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct PendingApprovalRow {
    pub step_id: Uuid,
    pub level: i32,
    pub request_code: String,
    pub request_type: RequestType,
    pub request_status: RequestStatus,
    pub requester_nik: String,
    pub requester_name: String,
    pub application_name: String,
    pub new_role_name: Option<String>,
    pub notes: Option<String>,
    pub justification: String,
    pub created_at: DateTime<Utc>,
}

impl PendingApprovalRow {
    pub async fn list_for_approver<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        approver_nik: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT s.id AS step_id, s.level, s.request_code,
                   r.request_type, r.status AS request_status,
                   u.nik AS requester_nik, u.name AS requester_name,
                   a.name AS application_name,
                   r.new_role_name, r.notes, r.justification, r.created_at
            FROM approval_steps s
            JOIN requests r ON r.request_code = s.request_code
            JOIN users u ON u.id = r.requester_id
            JOIN applications a ON a.id = r.application_id
            WHERE s.approver_nik = $1
              AND s.status = 'pending'
              AND r.status = 'pending'
              AND s.level = (
                  SELECT MIN(level) FROM approval_steps
                  WHERE request_code = s.request_code AND status = 'pending'
              )
            ORDER BY r.created_at ASC
            "#,
        )
        .bind(approver_nik)
        .fetch_all(executor)
        .await
    }
}

/// A step the approver has already resolved, with request context.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct CompletedStepRow {
    pub step_id: Uuid,
    pub level: i32,
    pub request_code: String,
    pub step_status: ApprovalStatus,
    pub approved_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub request_status: RequestStatus,
    pub requester_name: String,
    pub application_name: String,
}

impl CompletedStepRow {
    pub async fn list_for_approver<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        approver_nik: &str,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT s.id AS step_id, s.level, s.request_code,
                   s.status AS step_status, s.approved_at, s.reason,
                   r.status AS request_status,
                   u.name AS requester_name, a.name AS application_name
            FROM approval_steps s
            JOIN requests r ON r.request_code = s.request_code
            JOIN users u ON u.id = r.requester_id
            JOIN applications a ON a.id = r.application_id
            WHERE s.approver_nik = $1 AND s.status <> 'pending'
            ORDER BY s.approved_at DESC NULLS LAST
            "#,
        )
        .bind(approver_nik)
        .fetch_all(executor)
        .await
    }
}
