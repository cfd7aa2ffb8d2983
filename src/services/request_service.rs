//! Request creation and requester-facing queries.
//!
//! Creation is all-or-nothing: payload validation, the duplicate-pending
//! check, approver-chain resolution, code assignment and step insertion
//! happen inside one transaction. The approver chain resolves before the
//! code is finalized, so a failed resolution never consumes a sequence
//! number.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config;
use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::models::{
    request, AccessRequest, Application, ApprovalStep, RequestType, RoleMode, RoleSnapshot, User,
};
use crate::directory::{Directory, HttpDirectoryGateway};

use super::{Result, WorkflowError};

/// Number of approval levels every chain carries:
/// supervisor, HR, application owner.
pub const CHAIN_LEVELS: usize = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRequestInput {
    pub application_id: Uuid,
    pub request_type: RequestType,
    pub justification: String,
    pub old_role: Option<RoleSnapshot>,
    pub new_role: Option<RoleSnapshot>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestWithSteps {
    pub request: AccessRequest,
    pub steps: Vec<ApprovalStep>,
}

pub struct RequestService {
    pool: PgPool,
    directory: Arc<dyn Directory>,
}

impl RequestService {
    pub async fn new() -> std::result::Result<Self, DatabaseError> {
        let pool = DatabaseManager::pool().await?;
        let directory = HttpDirectoryGateway::from_config(&config::config().directory)
            .map_err(|_| DatabaseError::ConfigMissing("directory configuration"))?;
        Ok(Self { pool, directory: Arc::new(directory) })
    }

    pub fn with_parts(pool: PgPool, directory: Arc<dyn Directory>) -> Self {
        Self { pool, directory }
    }

    /// Submit a new access request. Returns the persisted request together
    /// with its freshly-created approval chain.
    pub async fn create_request(
        &self,
        requester_id: Uuid,
        input: CreateRequestInput,
    ) -> Result<RequestWithSteps> {
        let requester = User::find_by_id(&self.pool, requester_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound("requester not found".to_string()))?;

        let application = Application::find_by_id(&self.pool, input.application_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound("application not found".to_string()))?;

        validate_payload(application.role_mode, &input)?;

        let mut tx = self.pool.begin().await?;

        // Duplicate-pending check; the partial unique index is the backstop
        // against a concurrent insert between this probe and the commit.
        if AccessRequest::find_pending_for_user_application(
            &mut *tx,
            requester_id,
            application.id,
        )
        .await?
        .is_some()
        {
            return Err(WorkflowError::Conflict(format!(
                "a pending request for application {} already exists",
                application.code
            )));
        }

        // Resolve all three approvers up front; any gap aborts before a
        // request row or code exists.
        let chain = self.resolve_chain(&mut tx, &requester, &application).await?;

        let request = AccessRequest::create(
            &mut *tx,
            input.request_type,
            requester_id,
            application.id,
            input.old_role.as_ref(),
            input.new_role.as_ref(),
            input.notes.as_deref(),
            &input.justification,
        )
        .await
        .map_err(|e| {
            // The partial unique index catches the duplicate-pending race
            // the probe above cannot see
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("idx_requests_single_pending") {
                    return WorkflowError::Conflict(
                        "a pending request for this application already exists".to_string(),
                    );
                }
            }
            WorkflowError::Database(e)
        })?;

        let scope = request::month_scope(request.created_at);
        let pattern = format!("{}-{}-%", input.request_type.code_prefix(), scope);
        let last = AccessRequest::latest_code_for_update(&mut *tx, &pattern).await?;
        let code = request::next_code(input.request_type, &scope, last.as_deref())
            .map_err(WorkflowError::DataConsistency)?;
        let request = AccessRequest::assign_code(&mut *tx, request.id, &code).await?;

        let mut steps = Vec::with_capacity(chain.len());
        for (idx, approver_nik) in chain.iter().enumerate() {
            let step =
                ApprovalStep::insert(&mut *tx, &code, (idx + 1) as i32, approver_nik).await?;
            steps.push(step);
        }

        tx.commit().await?;

        info!(request_code = %code, requester = %requester.nik, "access request created");
        Ok(RequestWithSteps { request, steps })
    }

    /// Resolve supervisor (directory), HR approver and application owner
    /// (both local) into the ordered chain.
    async fn resolve_chain(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        requester: &User,
        application: &Application,
    ) -> Result<Vec<String>> {
        let supervisor = self
            .directory
            .approval_chain_info(&requester.nik)
            .await?
            .supervisor_nik;

        let hr = User::find_hr_approver(&mut **tx).await?.map(|u| u.nik);

        let owner = match application.owner_id {
            Some(owner_id) => User::find_by_id(&mut **tx, owner_id).await?.map(|u| u.nik),
            None => None,
        };

        build_chain([supervisor, hr, owner])
    }

    pub async fn list_requests_for_user(&self, requester_id: Uuid) -> Result<Vec<RequestWithSteps>> {
        let requests = AccessRequest::list_for_requester(&self.pool, requester_id).await?;

        let mut result = Vec::with_capacity(requests.len());
        for request in requests {
            let steps = match &request.request_code {
                Some(code) => ApprovalStep::list_for_request(&self.pool, code).await?,
                None => Vec::new(),
            };
            result.push(RequestWithSteps { request, steps });
        }
        Ok(result)
    }

    /// Detail lookup scoped to the requester; someone else's code reads as
    /// not found.
    pub async fn get_request_detail(
        &self,
        requester_id: Uuid,
        request_code: &str,
    ) -> Result<RequestWithSteps> {
        let request =
            AccessRequest::find_by_code_for_requester(&self.pool, requester_id, request_code)
                .await?
                .ok_or_else(|| {
                    WorkflowError::NotFound(format!("request {request_code} not found"))
                })?;

        let steps = ApprovalStep::list_for_request(&self.pool, request_code).await?;
        Ok(RequestWithSteps { request, steps })
    }
}

/// Validate the payload against the application's role mode. Dynamic-mode
/// applications take free-text notes instead of role snapshots; fixed-mode
/// applications take catalog snapshots and no notes.
fn validate_payload(role_mode: RoleMode, input: &CreateRequestInput) -> Result<()> {
    if input.justification.trim().is_empty() {
        return Err(WorkflowError::Validation("justification is required".to_string()));
    }

    match role_mode {
        RoleMode::Dynamic => {
            if input.notes.as_deref().map(str::trim).unwrap_or("").is_empty() {
                return Err(WorkflowError::Validation(
                    "notes are required for this application".to_string(),
                ));
            }
            if input.old_role.is_some() || input.new_role.is_some() {
                return Err(WorkflowError::Validation(
                    "role snapshots are not accepted for this application".to_string(),
                ));
            }
        }
        RoleMode::Fixed => {
            if input.notes.is_some() {
                return Err(WorkflowError::Validation(
                    "notes are only accepted for dynamic-role applications".to_string(),
                ));
            }
            if input.new_role.is_none() {
                return Err(WorkflowError::Validation("new role is required".to_string()));
            }
            match input.request_type {
                RequestType::ChangeRole => {
                    if input.old_role.is_none() {
                        return Err(WorkflowError::Validation(
                            "current role is required for a role change".to_string(),
                        ));
                    }
                }
                RequestType::ApplicationAccess => {
                    if input.old_role.is_some() {
                        return Err(WorkflowError::Validation(
                            "current role is not accepted for an access request".to_string(),
                        ));
                    }
                }
            }
        }
    }

    Ok(())
}

/// Assemble the ordered approver chain; every level must have resolved.
fn build_chain(candidates: [Option<String>; CHAIN_LEVELS]) -> Result<Vec<String>> {
    let mut chain = Vec::with_capacity(CHAIN_LEVELS);
    for candidate in candidates {
        match candidate {
            Some(nik) if !nik.trim().is_empty() => chain.push(nik),
            _ => {
                return Err(WorkflowError::Upstream(
                    "could not determine approvers for this request".to_string(),
                ))
            }
        }
    }
    Ok(chain)
}
