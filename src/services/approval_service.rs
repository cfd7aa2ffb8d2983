//! Approval stepping.
//!
//! One call resolves one step, inside one transaction, with the step row
//! locked for the whole decide-and-mutate sequence. Steps resolve strictly
//! in ascending level order; a rejection short-circuits the rest of the
//! chain; the final approval materializes the access grant and, for
//! externally-mirrored applications, enqueues the sync marker before the
//! commit. The external call itself happens after commit and can only
//! degrade the response, never the local state.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::config;
use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::models::{
    AccessRequest, Application, ApprovalStatus, ApprovalStep, CompletedStepRow,
    PendingApprovalRow, RequestStatus, RequestType, RoleAssignment, RoleMode, RoleRef, SyncOutbox,
    UserApplication,
};
use crate::directory::HttpDirectoryGateway;
use crate::external::AdapterRegistry;

use super::sync_service::{SyncReport, SyncService};
use super::{Result, WorkflowError};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve,
    Reject { reason: Option<String> },
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub step: ApprovalStep,
    pub request_status: RequestStatus,
    /// Present only when this approval completed the chain for an
    /// externally-mirrored application.
    pub sync: Option<SyncReport>,
}

pub struct ApprovalService {
    pool: PgPool,
    adapters: AdapterRegistry,
    sync: SyncService,
}

impl ApprovalService {
    pub async fn new() -> std::result::Result<Self, DatabaseError> {
        let pool = DatabaseManager::pool().await?;
        let directory = HttpDirectoryGateway::from_config(&config::config().directory)
            .map_err(|_| DatabaseError::ConfigMissing("directory configuration"))?;
        let adapters = AdapterRegistry::from_config(config::config())
            .map_err(|_| DatabaseError::ConfigMissing("external system configuration"))?;
        let sync = SyncService::with_parts(
            pool.clone(),
            std::sync::Arc::new(directory),
            adapters.clone(),
        );
        Ok(Self { pool, adapters, sync })
    }

    pub fn with_parts(pool: PgPool, adapters: AdapterRegistry, sync: SyncService) -> Self {
        Self { pool, adapters, sync }
    }

    /// Apply one approve/reject decision to a step.
    pub async fn apply_action(
        &self,
        approver_nik: &str,
        step_id: Uuid,
        action: ApprovalAction,
    ) -> Result<ApprovalOutcome> {
        let mut tx = self.pool.begin().await?;

        // Row lock held until commit; a concurrent action on the same step
        // waits here and then fails the pending-status check.
        let step = ApprovalStep::find_for_approver_for_update(&mut *tx, step_id, approver_nik)
            .await?
            .ok_or_else(|| WorkflowError::NotFound("approval step not found".to_string()))?;

        let min_pending = ApprovalStep::min_pending_level(&mut *tx, &step.request_code).await?;
        check_actionable(&step, min_pending)?;

        match action {
            ApprovalAction::Reject { reason } => {
                let step =
                    ApprovalStep::mark_rejected(&mut *tx, step.id, reason.as_deref()).await?;
                let request =
                    AccessRequest::update_status(&mut *tx, &step.request_code, RequestStatus::Rejected)
                        .await?;
                ApprovalStep::reject_remaining_pending(&mut *tx, &step.request_code).await?;
                tx.commit().await?;

                info!(request_code = %step.request_code, level = step.level, "request rejected");
                Ok(ApprovalOutcome { step, request_status: request.status, sync: None })
            }
            ApprovalAction::Approve => {
                let step = ApprovalStep::mark_approved(&mut *tx, step.id).await?;
                let remaining = ApprovalStep::count_pending(&mut *tx, &step.request_code).await?;

                if remaining > 0 {
                    tx.commit().await?;
                    info!(
                        request_code = %step.request_code,
                        level = step.level,
                        remaining,
                        "approval step recorded"
                    );
                    return Ok(ApprovalOutcome {
                        step,
                        request_status: RequestStatus::Pending,
                        sync: None,
                    });
                }

                // Last step: the request is approved and the grant applies
                // in the same transaction.
                let request =
                    AccessRequest::update_status(&mut *tx, &step.request_code, RequestStatus::Approved)
                        .await?;
                let application = Application::find_by_id(&mut *tx, request.application_id)
                    .await?
                    .ok_or_else(|| {
                        WorkflowError::DataConsistency(format!(
                            "application {} missing for request {}",
                            request.application_id, step.request_code
                        ))
                    })?;

                let is_external = self.adapters.is_external(&application.code);
                apply_grant(&mut tx, &request, &application, is_external).await?;

                let outbox = if is_external {
                    Some(
                        SyncOutbox::enqueue(
                            &mut *tx,
                            &step.request_code,
                            &application.code,
                            request.requester_id,
                        )
                        .await?,
                    )
                } else {
                    None
                };

                tx.commit().await?;
                info!(request_code = %step.request_code, "request fully approved");

                // Post-commit, best-effort: a failed push is reported, not
                // rolled back.
                let sync = match outbox {
                    Some(entry) => Some(self.sync.deliver(entry).await),
                    None => None,
                };

                Ok(ApprovalOutcome { step, request_status: request.status, sync })
            }
        }
    }

    /// The approver's queue: steps currently at the minimum pending level
    /// of their chain.
    pub async fn list_pending_approvals(
        &self,
        approver_nik: &str,
    ) -> Result<Vec<PendingApprovalRow>> {
        Ok(PendingApprovalRow::list_for_approver(&self.pool, approver_nik).await?)
    }

    pub async fn list_approval_history(
        &self,
        approver_nik: &str,
    ) -> Result<Vec<CompletedStepRow>> {
        Ok(CompletedStepRow::list_for_approver(&self.pool, approver_nik).await?)
    }
}

/// Guard a step against double-processing and out-of-order resolution.
fn check_actionable(step: &ApprovalStep, min_pending_level: Option<i32>) -> Result<()> {
    if step.status != ApprovalStatus::Pending {
        return Err(WorkflowError::Conflict(
            "approval step has already been processed".to_string(),
        ));
    }
    if min_pending_level != Some(step.level) {
        return Err(WorkflowError::Conflict(
            "approval steps must be resolved in level order".to_string(),
        ));
    }
    Ok(())
}

/// The role the grant will carry once this request completes. Fixed-mode
/// applications resolve their catalog snapshot to an internal or external
/// reference depending on where the application's records live;
/// dynamic-mode applications carry the request notes.
fn grant_role(
    role_mode: RoleMode,
    request: &AccessRequest,
    is_external: bool,
) -> Result<RoleAssignment> {
    match role_mode {
        RoleMode::Dynamic => {
            let notes = request.notes.clone().ok_or_else(|| {
                WorkflowError::DataConsistency(format!(
                    "request {} has no notes for a dynamic-role application",
                    request.request_code.as_deref().unwrap_or("?")
                ))
            })?;
            Ok(RoleAssignment::Dynamic { notes })
        }
        RoleMode::Fixed => {
            let role = request.new_role().ok_or_else(|| {
                WorkflowError::DataConsistency(format!(
                    "request {} has no new-role snapshot",
                    request.request_code.as_deref().unwrap_or("?")
                ))
            })?;
            Ok(if is_external {
                RoleAssignment::External { id: role.id, name: role.name }
            } else {
                RoleAssignment::Internal { id: role.id, name: role.name }
            })
        }
    }
}

/// The reference a change-role uses to locate the grant row to update.
fn old_role_ref(
    role_mode: RoleMode,
    request: &AccessRequest,
    is_external: bool,
) -> Result<Option<RoleRef>> {
    match role_mode {
        RoleMode::Dynamic => Ok(None),
        RoleMode::Fixed => {
            let old = request.old_role().ok_or_else(|| {
                WorkflowError::DataConsistency(format!(
                    "request {} has no old-role snapshot",
                    request.request_code.as_deref().unwrap_or("?")
                ))
            })?;
            Ok(Some(if is_external {
                RoleRef::External(old.id)
            } else {
                RoleRef::Internal(old.id)
            }))
        }
    }
}

/// Materialize the access grant: insert for first-time access, in-place
/// update for a role change. Anything but exactly one matching row for a
/// role change is an invariant violation and fails the transaction.
async fn apply_grant(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    request: &AccessRequest,
    application: &Application,
    is_external: bool,
) -> Result<()> {
    let role = grant_role(application.role_mode, request, is_external)?;

    match request.request_type {
        RequestType::ApplicationAccess => {
            UserApplication::insert(&mut **tx, request.requester_id, application.id, &role)
                .await?;
        }
        RequestType::ChangeRole => {
            let old_ref = old_role_ref(application.role_mode, request, is_external)?;
            let rows = UserApplication::find_for_change_for_update(
                &mut **tx,
                request.requester_id,
                application.id,
                old_ref,
            )
            .await?;

            if rows.len() != 1 {
                return Err(WorkflowError::DataConsistency(format!(
                    "expected exactly one grant row to update for request {}, found {}",
                    request.request_code.as_deref().unwrap_or("?"),
                    rows.len()
                )));
            }
            UserApplication::update_role(&mut **tx, rows[0].id, &role).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn step(level: i32, status: ApprovalStatus) -> ApprovalStep {
        ApprovalStep {
            id: Uuid::new_v4(),
            request_code: "AR-202608-0001".to_string(),
            level,
            approver_nik: "197305".to_string(),
            status,
            approved_at: None,
            reason: None,
        }
    }

    fn request(request_type: RequestType) -> AccessRequest {
        AccessRequest {
            id: Uuid::new_v4(),
            request_code: Some("AR-202608-0001".to_string()),
            request_type,
            requester_id: Uuid::new_v4(),
            application_id: Uuid::new_v4(),
            old_role_id: None,
            old_role_name: None,
            new_role_id: None,
            new_role_name: None,
            notes: None,
            justification: "Need access for quarterly reporting".to_string(),
            status: RequestStatus::Pending,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn pending_step_at_minimum_level_is_actionable() {
        assert!(check_actionable(&step(1, ApprovalStatus::Pending), Some(1)).is_ok());
    }

    #[test]
    fn out_of_order_step_conflicts() {
        // Level 2 acted on while level 1 is still pending
        let result = check_actionable(&step(2, ApprovalStatus::Pending), Some(1));
        assert!(matches!(result, Err(WorkflowError::Conflict(_))));
    }

    #[test]
    fn terminal_step_conflicts() {
        let result = check_actionable(&step(1, ApprovalStatus::Approved), Some(2));
        assert!(matches!(result, Err(WorkflowError::Conflict(_))));
        let result = check_actionable(&step(1, ApprovalStatus::Rejected), Some(2));
        assert!(matches!(result, Err(WorkflowError::Conflict(_))));
    }

    #[test]
    fn chain_with_no_pending_steps_conflicts() {
        // Shouldn't happen for a pending step, but the guard holds anyway
        let result = check_actionable(&step(1, ApprovalStatus::Pending), None);
        assert!(matches!(result, Err(WorkflowError::Conflict(_))));
    }

    #[test]
    fn fixed_mode_grant_role_tracks_system_locality() {
        let mut req = request(RequestType::ApplicationAccess);
        let role_id = Uuid::new_v4();
        req.new_role_id = Some(role_id);
        req.new_role_name = Some("Viewer".to_string());

        let internal = grant_role(RoleMode::Fixed, &req, false).unwrap();
        assert_eq!(internal, RoleAssignment::Internal { id: role_id, name: "Viewer".into() });

        let external = grant_role(RoleMode::Fixed, &req, true).unwrap();
        assert_eq!(external, RoleAssignment::External { id: role_id, name: "Viewer".into() });
    }

    #[test]
    fn dynamic_mode_grant_role_carries_notes() {
        let mut req = request(RequestType::ApplicationAccess);
        req.notes = Some("read-only finance dashboards".to_string());

        let role = grant_role(RoleMode::Dynamic, &req, false).unwrap();
        assert_eq!(
            role,
            RoleAssignment::Dynamic { notes: "read-only finance dashboards".into() }
        );
    }

    #[test]
    fn missing_payload_is_a_consistency_failure() {
        let req = request(RequestType::ApplicationAccess);
        assert!(matches!(
            grant_role(RoleMode::Fixed, &req, false),
            Err(WorkflowError::DataConsistency(_))
        ));
        assert!(matches!(
            grant_role(RoleMode::Dynamic, &req, false),
            Err(WorkflowError::DataConsistency(_))
        ));
        assert!(matches!(
            old_role_ref(RoleMode::Fixed, &req, false),
            Err(WorkflowError::DataConsistency(_))
        ));
    }

    #[test]
    fn dynamic_change_role_matches_without_reference() {
        let req = request(RequestType::ChangeRole);
        assert_eq!(old_role_ref(RoleMode::Dynamic, &req, false).unwrap(), None);
    }

    #[test]
    fn approval_action_deserializes() {
        let approve: ApprovalAction = serde_json::from_str(r#"{"action": "approve"}"#).unwrap();
        assert!(matches!(approve, ApprovalAction::Approve));

        let reject: ApprovalAction =
            serde_json::from_str(r#"{"action": "reject", "reason": "not justified"}"#).unwrap();
        match reject {
            ApprovalAction::Reject { reason } => {
                assert_eq!(reason.as_deref(), Some("not justified"));
            }
            _ => panic!("expected reject"),
        }
    }
}
