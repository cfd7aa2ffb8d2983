//! Access request model.
//!
//! A request is one access-change ask: either first-time access to an
//! application or a role change within it. Its human-readable code is
//! `{AR|CR}-{YYYYMM}-{NNNN}` with the numeric suffix monotonic per
//! (prefix, year-month) scope.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "request_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    ApplicationAccess,
    ChangeRole,
}

impl RequestType {
    /// Request-code prefix for this type.
    pub fn code_prefix(&self) -> &'static str {
        match self {
            RequestType::ApplicationAccess => "AR",
            RequestType::ChangeRole => "CR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "request_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

/// Role snapshot carried on a request (id plus denormalized name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccessRequest {
    pub id: Uuid,
    /// Null only inside the creating transaction, before assignment.
    pub request_code: Option<String>,
    pub request_type: RequestType,
    pub requester_id: Uuid,
    pub application_id: Uuid,
    pub old_role_id: Option<Uuid>,
    pub old_role_name: Option<String>,
    pub new_role_id: Option<Uuid>,
    pub new_role_name: Option<String>,
    pub notes: Option<String>,
    pub justification: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AccessRequest {
    pub fn old_role(&self) -> Option<RoleSnapshot> {
        match (self.old_role_id, &self.old_role_name) {
            (Some(id), Some(name)) => Some(RoleSnapshot { id, name: name.clone() }),
            _ => None,
        }
    }

    pub fn new_role(&self) -> Option<RoleSnapshot> {
        match (self.new_role_id, &self.new_role_name) {
            (Some(id), Some(name)) => Some(RoleSnapshot { id, name: name.clone() }),
            _ => None,
        }
    }
}

/// Year-month scope of a request code, e.g. `202608`.
pub fn month_scope(at: DateTime<Utc>) -> String {
    format!("{:04}{:02}", at.year(), at.month())
}

/// Compute the next request code for a (prefix, year-month) scope given the
/// most recent code in that scope. The sequence starts at 0001 when the
/// scope has no codes yet.
pub fn next_code(
    request_type: RequestType,
    scope: &str,
    last: Option<&str>,
) -> Result<String, String> {
    let seq = match last {
        None => 1,
        Some(code) => {
            let suffix = code
                .rsplit('-')
                .next()
                .ok_or_else(|| format!("malformed request code: {code}"))?;
            let last_seq: u32 = suffix
                .parse()
                .map_err(|_| format!("malformed request code: {code}"))?;
            last_seq + 1
        }
    };
    Ok(format!("{}-{}-{:04}", request_type.code_prefix(), scope, seq))
}

impl AccessRequest {
    /// Insert the request row. The code is assigned separately, after the
    /// approver chain has resolved, so a failed resolution never consumes
    /// a sequence number.
    #[allow(clippy::too_many_arguments)]
    pub async fn create<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        request_type: RequestType,
        requester_id: Uuid,
        application_id: Uuid,
        old_role: Option<&RoleSnapshot>,
        new_role: Option<&RoleSnapshot>,
        notes: Option<&str>,
        justification: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO requests (
                request_type, requester_id, application_id,
                old_role_id, old_role_name, new_role_id, new_role_name,
                notes, justification
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(request_type)
        .bind(requester_id)
        .bind(application_id)
        .bind(old_role.map(|r| r.id))
        .bind(old_role.map(|r| r.name.as_str()))
        .bind(new_role.map(|r| r.id))
        .bind(new_role.map(|r| r.name.as_str()))
        .bind(notes)
        .bind(justification)
        .fetch_one(executor)
        .await
    }

    /// Latest assigned code in a scope, locked so concurrent creations in
    /// the same scope serialize on it. The first code of a month has no row
    /// to lock; the unique index on request_code is the backstop there.
    pub async fn latest_code_for_update<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        pattern: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        sqlx::query_scalar(
            r#"
            SELECT request_code FROM requests
            WHERE request_code LIKE $1
            ORDER BY request_code DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(pattern)
        .fetch_optional(executor)
        .await
    }

    pub async fn assign_code<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        id: Uuid,
        code: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE requests
            SET request_code = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(code)
        .fetch_one(executor)
        .await
    }

    /// Open request for the same (requester, application), if any.
    pub async fn find_pending_for_user_application<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        requester_id: Uuid,
        application_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM requests
            WHERE requester_id = $1 AND application_id = $2 AND status = 'pending'
            "#,
        )
        .bind(requester_id)
        .bind(application_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn list_for_requester<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        requester_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM requests
            WHERE requester_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(requester_id)
        .fetch_all(executor)
        .await
    }

    /// Code lookup scoped to the requester; doubles as authorization.
    pub async fn find_by_code_for_requester<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        requester_id: Uuid,
        code: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT * FROM requests
            WHERE requester_id = $1 AND request_code = $2
            "#,
        )
        .bind(requester_id)
        .bind(code)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_code<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        code: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM requests WHERE request_code = $1")
            .bind(code)
            .fetch_optional(executor)
            .await
    }

    pub async fn update_status<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        code: &str,
        status: RequestStatus,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE requests
            SET status = $2, updated_at = NOW()
            WHERE request_code = $1
            RETURNING *
            "#,
        )
        .bind(code)
        .bind(status)
        .fetch_one(executor)
        .await
    }
}
