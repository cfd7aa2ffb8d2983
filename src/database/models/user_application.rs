//! Access grant model (`user_applications`).
//!
//! A grant links a user and an application to one role. The role is a
//! tagged union: an internal catalog role, a mirrored external-system
//! role, or a free-text description for dynamic-mode applications. The
//! write path only accepts [`RoleAssignment`], so the internal-xor-external
//! column pair can never be populated together.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Reference half of a role assignment; dynamic grants have none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleRef {
    Internal(Uuid),
    External(Uuid),
}

/// The role carried by a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleAssignment {
    Internal { id: Uuid, name: String },
    External { id: Uuid, name: String },
    Dynamic { notes: String },
}

impl RoleAssignment {
    pub fn reference(&self) -> Option<RoleRef> {
        match self {
            RoleAssignment::Internal { id, .. } => Some(RoleRef::Internal(*id)),
            RoleAssignment::External { id, .. } => Some(RoleRef::External(*id)),
            RoleAssignment::Dynamic { .. } => None,
        }
    }

    /// Denormalized role-name snapshot stored on the grant row.
    pub fn display_name(&self) -> &str {
        match self {
            RoleAssignment::Internal { name, .. } | RoleAssignment::External { name, .. } => name,
            RoleAssignment::Dynamic { notes } => notes,
        }
    }

    fn internal_id(&self) -> Option<Uuid> {
        match self.reference() {
            Some(RoleRef::Internal(id)) => Some(id),
            _ => None,
        }
    }

    fn external_id(&self) -> Option<Uuid> {
        match self.reference() {
            Some(RoleRef::External(id)) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserApplication {
    pub id: Uuid,
    pub user_id: Uuid,
    pub application_id: Uuid,
    pub application_roles_id: Option<Uuid>,
    pub external_application_role_id: Option<Uuid>,
    pub role_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserApplication {
    /// The stored columns as a tagged role assignment.
    pub fn role_assignment(&self) -> RoleAssignment {
        match (self.application_roles_id, self.external_application_role_id) {
            (Some(id), _) => RoleAssignment::Internal { id, name: self.role_name.clone() },
            (None, Some(id)) => RoleAssignment::External { id, name: self.role_name.clone() },
            (None, None) => RoleAssignment::Dynamic { notes: self.role_name.clone() },
        }
    }

    pub async fn insert<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        user_id: Uuid,
        application_id: Uuid,
        role: &RoleAssignment,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            INSERT INTO user_applications (
                user_id, application_id,
                application_roles_id, external_application_role_id, role_name
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(application_id)
        .bind(role.internal_id())
        .bind(role.external_id())
        .bind(role.display_name())
        .fetch_one(executor)
        .await
    }

    /// Grant rows matching a change-role's old reference, locked for the
    /// in-place update. `None` matches dynamic grants (no role reference),
    /// used for dynamic-mode applications.
    pub async fn find_for_change_for_update<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        user_id: Uuid,
        application_id: Uuid,
        old_ref: Option<RoleRef>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let base = r#"
            SELECT * FROM user_applications
            WHERE user_id = $1 AND application_id = $2
            "#;
        match old_ref {
            Some(RoleRef::Internal(id)) => {
                sqlx::query_as(&format!("{base} AND application_roles_id = $3 FOR UPDATE"))
                    .bind(user_id)
                    .bind(application_id)
                    .bind(id)
                    .fetch_all(executor)
                    .await
            }
            Some(RoleRef::External(id)) => {
                sqlx::query_as(&format!(
                    "{base} AND external_application_role_id = $3 FOR UPDATE"
                ))
                .bind(user_id)
                .bind(application_id)
                .bind(id)
                .fetch_all(executor)
                .await
            }
            None => {
                sqlx::query_as(&format!(
                    "{base} AND application_roles_id IS NULL
                       AND external_application_role_id IS NULL FOR UPDATE"
                ))
                .bind(user_id)
                .bind(application_id)
                .fetch_all(executor)
                .await
            }
        }
    }

    pub async fn update_role<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        id: Uuid,
        role: &RoleAssignment,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as(
            r#"
            UPDATE user_applications
            SET application_roles_id = $2,
                external_application_role_id = $3,
                role_name = $4,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(role.internal_id())
        .bind(role.external_id())
        .bind(role.display_name())
        .fetch_one(executor)
        .await
    }

    pub async fn list_for_user<'e>(
        executor: impl sqlx::PgExecutor<'e>,
        user_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM user_applications WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(executor)
            .await
    }
}
