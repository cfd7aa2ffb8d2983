//! End-to-end workflow tests: request creation, ordered approval,
//! rejection short-circuit and grant materialization, driven through the
//! services against a live Postgres.

#![cfg(feature = "integration")]

mod common;

use chrono::Utc;
use uar_api::database::models::request::month_scope;
use uar_api::database::models::{
    ApprovalStatus, ApprovalStep, RequestStatus, RequestType, RoleAssignment, RoleSnapshot,
    UserApplication,
};
use uar_api::services::{ApprovalAction, CreateRequestInput, WorkflowError};

use common::TestContext;

fn access_input(ctx: &TestContext) -> CreateRequestInput {
    CreateRequestInput {
        application_id: ctx.app_fixed.id,
        request_type: RequestType::ApplicationAccess,
        justification: "Need HRIS access for quarterly reporting".to_string(),
        old_role: None,
        new_role: Some(ctx.role_viewer.clone()),
        notes: None,
    }
}

// ============================================================================
// Scenario A: creation builds the full three-level chain
// ============================================================================

#[tokio::test]
async fn create_access_request_builds_supervisor_hr_owner_chain() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    let created = ctx.requests.create_request(ctx.requester.id, access_input(&ctx)).await?;

    assert_eq!(created.request.status, RequestStatus::Pending);
    let code = created.request.request_code.clone().expect("code assigned");
    assert_eq!(code, format!("AR-{}-0001", month_scope(Utc::now())));

    assert_eq!(created.steps.len(), 3);
    let levels: Vec<i32> = created.steps.iter().map(|s| s.level).collect();
    assert_eq!(levels, vec![1, 2, 3]);
    assert_eq!(created.steps[0].approver_nik, ctx.supervisor.nik);
    assert_eq!(created.steps[1].approver_nik, ctx.hr.nik);
    assert_eq!(created.steps[2].approver_nik, ctx.owner.nik);
    assert!(created.steps.iter().all(|s| s.status == ApprovalStatus::Pending));

    Ok(())
}

// ============================================================================
// Scenario B: in-order approvals all the way to the grant
// ============================================================================

#[tokio::test]
async fn full_approval_grants_access() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    let created = ctx.requests.create_request(ctx.requester.id, access_input(&ctx)).await?;
    let steps = &created.steps;

    let first = ctx
        .approvals
        .apply_action(&ctx.supervisor.nik, steps[0].id, ApprovalAction::Approve)
        .await?;
    assert_eq!(first.request_status, RequestStatus::Pending);

    let second = ctx
        .approvals
        .apply_action(&ctx.hr.nik, steps[1].id, ApprovalAction::Approve)
        .await?;
    assert_eq!(second.request_status, RequestStatus::Pending);

    let last = ctx
        .approvals
        .apply_action(&ctx.owner.nik, steps[2].id, ApprovalAction::Approve)
        .await?;
    assert_eq!(last.request_status, RequestStatus::Approved);
    // No external system configured for this application: nothing to sync
    assert!(last.sync.is_none());

    let grants = UserApplication::list_for_user(&ctx.pool, ctx.requester.id).await?;
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].application_id, ctx.app_fixed.id);
    assert_eq!(
        grants[0].role_assignment(),
        RoleAssignment::Internal { id: ctx.role_viewer.id, name: ctx.role_viewer.name.clone() }
    );

    Ok(())
}

// ============================================================================
// Scenario C: rejection short-circuits the rest of the chain
// ============================================================================

#[tokio::test]
async fn mid_chain_rejection_rejects_everything_and_grants_nothing() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    let created = ctx.requests.create_request(ctx.requester.id, access_input(&ctx)).await?;
    let steps = &created.steps;
    let code = created.request.request_code.clone().unwrap();

    ctx.approvals
        .apply_action(&ctx.supervisor.nik, steps[0].id, ApprovalAction::Approve)
        .await?;

    let outcome = ctx
        .approvals
        .apply_action(
            &ctx.hr.nik,
            steps[1].id,
            ApprovalAction::Reject { reason: Some("role not appropriate".to_string()) },
        )
        .await?;
    assert_eq!(outcome.request_status, RequestStatus::Rejected);
    assert_eq!(outcome.step.reason.as_deref(), Some("role not appropriate"));

    let steps = ApprovalStep::list_for_request(&ctx.pool, &code).await?;
    assert_eq!(steps[0].status, ApprovalStatus::Approved);
    assert_eq!(steps[1].status, ApprovalStatus::Rejected);
    // Level 3 was never reviewed individually, the cascade closed it
    assert_eq!(steps[2].status, ApprovalStatus::Rejected);

    assert_eq!(ctx.grant_count(ctx.requester.id, ctx.app_fixed.id).await?, 0);

    // The cascaded step is terminal: the owner can no longer act on it
    let err = ctx
        .approvals
        .apply_action(&ctx.owner.nik, steps[2].id, ApprovalAction::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    Ok(())
}

// ============================================================================
// Scenario D: out-of-order approval attempts
// ============================================================================

#[tokio::test]
async fn acting_ahead_of_the_chain_conflicts_and_mutates_nothing() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    let created = ctx.requests.create_request(ctx.requester.id, access_input(&ctx)).await?;
    let steps = &created.steps;
    let code = created.request.request_code.clone().unwrap();

    let err = ctx
        .approvals
        .apply_action(&ctx.hr.nik, steps[1].id, ApprovalAction::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    let steps = ApprovalStep::list_for_request(&ctx.pool, &code).await?;
    assert!(steps.iter().all(|s| s.status == ApprovalStatus::Pending));

    Ok(())
}

// ============================================================================
// Scenario E: dynamic role mode without notes
// ============================================================================

#[tokio::test]
async fn dynamic_application_without_notes_is_rejected_up_front() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    let input = CreateRequestInput {
        application_id: ctx.app_dynamic.id,
        request_type: RequestType::ChangeRole,
        justification: "Broader data lake permissions".to_string(),
        old_role: None,
        new_role: None,
        notes: None,
    };
    let err = ctx.requests.create_request(ctx.requester.id, input).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Validation(_)));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM requests")
        .fetch_one(&ctx.pool)
        .await?;
    assert_eq!(count, 0);

    Ok(())
}

// ============================================================================
// Invariants beyond the lettered scenarios
// ============================================================================

#[tokio::test]
async fn second_pending_request_for_same_application_conflicts() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    ctx.requests.create_request(ctx.requester.id, access_input(&ctx)).await?;
    let err = ctx
        .requests
        .create_request(ctx.requester.id, access_input(&ctx))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    Ok(())
}

#[tokio::test]
async fn request_codes_sequence_per_prefix_and_skip_failed_creations() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;
    let scope = month_scope(Utc::now());

    let first = ctx.requests.create_request(ctx.requester.id, access_input(&ctx)).await?;
    assert_eq!(first.request.request_code.as_deref(), Some(format!("AR-{scope}-0001").as_str()));

    // Approver resolution fails for an employee the directory doesn't know;
    // the aborted creation must not consume a sequence number
    let orphan = sqlx::query_scalar::<_, uuid::Uuid>(
        "INSERT INTO users (nik, name, password) VALUES ('195555', 'Unknown', 'x') RETURNING id",
    )
    .fetch_one(&ctx.pool)
    .await?;
    let err = ctx
        .requests
        .create_request(
            orphan,
            CreateRequestInput {
                application_id: ctx.app_fixed.id,
                request_type: RequestType::ApplicationAccess,
                justification: "Access please".to_string(),
                old_role: None,
                new_role: Some(ctx.role_viewer.clone()),
                notes: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Upstream(_)));

    let second = ctx
        .requests
        .create_request(
            ctx.hr.id,
            CreateRequestInput {
                application_id: ctx.app_fixed.id,
                request_type: RequestType::ApplicationAccess,
                justification: "HR also needs HRIS".to_string(),
                old_role: None,
                new_role: Some(ctx.role_viewer.clone()),
                notes: None,
            },
        )
        .await?;
    assert_eq!(second.request.request_code.as_deref(), Some(format!("AR-{scope}-0002").as_str()));

    // Change-role codes sequence independently under their own prefix
    let change = ctx
        .requests
        .create_request(
            ctx.owner.id,
            CreateRequestInput {
                application_id: ctx.app_dynamic.id,
                request_type: RequestType::ChangeRole,
                justification: "Need to adjust data lake role".to_string(),
                old_role: None,
                new_role: None,
                notes: Some("switch to curator access".to_string()),
            },
        )
        .await?;
    assert_eq!(change.request.request_code.as_deref(), Some(format!("CR-{scope}-0001").as_str()));

    Ok(())
}

#[tokio::test]
async fn terminal_step_cannot_be_acted_on_again() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    let created = ctx.requests.create_request(ctx.requester.id, access_input(&ctx)).await?;
    let step_id = created.steps[0].id;

    ctx.approvals
        .apply_action(&ctx.supervisor.nik, step_id, ApprovalAction::Approve)
        .await?;
    let err = ctx
        .approvals
        .apply_action(&ctx.supervisor.nik, step_id, ApprovalAction::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Conflict(_)));

    Ok(())
}

#[tokio::test]
async fn step_lookups_are_scoped_to_the_acting_approver() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    let created = ctx.requests.create_request(ctx.requester.id, access_input(&ctx)).await?;

    // The owner holds level 3, not level 1
    let err = ctx
        .approvals
        .apply_action(&ctx.owner.nik, created.steps[0].id, ApprovalAction::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));

    Ok(())
}

#[tokio::test]
async fn pending_queue_follows_the_minimum_pending_level() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    let created = ctx.requests.create_request(ctx.requester.id, access_input(&ctx)).await?;
    let code = created.request.request_code.clone().unwrap();

    let supervisor_queue = ctx.approvals.list_pending_approvals(&ctx.supervisor.nik).await?;
    assert_eq!(supervisor_queue.len(), 1);
    assert_eq!(supervisor_queue[0].request_code, code);

    // Later levels see nothing until it is their turn
    assert!(ctx.approvals.list_pending_approvals(&ctx.hr.nik).await?.is_empty());

    ctx.approvals
        .apply_action(&ctx.supervisor.nik, created.steps[0].id, ApprovalAction::Approve)
        .await?;

    assert!(ctx.approvals.list_pending_approvals(&ctx.supervisor.nik).await?.is_empty());
    let hr_queue = ctx.approvals.list_pending_approvals(&ctx.hr.nik).await?;
    assert_eq!(hr_queue.len(), 1);

    let history = ctx.approvals.list_approval_history(&ctx.supervisor.nik).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].step_status, ApprovalStatus::Approved);

    Ok(())
}

#[tokio::test]
async fn requester_queries_are_identity_scoped() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    let created = ctx.requests.create_request(ctx.requester.id, access_input(&ctx)).await?;
    let code = created.request.request_code.clone().unwrap();

    let mine = ctx.requests.list_requests_for_user(ctx.requester.id).await?;
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].steps.len(), 3);

    let detail = ctx.requests.get_request_detail(ctx.requester.id, &code).await?;
    assert_eq!(detail.request.id, created.request.id);

    // Someone else's code reads as not found
    let err = ctx.requests.get_request_detail(ctx.hr.id, &code).await.unwrap_err();
    assert!(matches!(err, WorkflowError::NotFound(_)));

    Ok(())
}

#[tokio::test]
async fn change_role_updates_the_existing_grant_in_place() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    // Standing grant from an earlier, separately-approved access request
    UserApplication::insert(
        &ctx.pool,
        ctx.requester.id,
        ctx.app_fixed.id,
        &RoleAssignment::Internal { id: ctx.role_viewer.id, name: ctx.role_viewer.name.clone() },
    )
    .await?;

    let created = ctx
        .requests
        .create_request(
            ctx.requester.id,
            CreateRequestInput {
                application_id: ctx.app_fixed.id,
                request_type: RequestType::ChangeRole,
                justification: "Promotion to editor duties".to_string(),
                old_role: Some(ctx.role_viewer.clone()),
                new_role: Some(ctx.role_editor.clone()),
                notes: None,
            },
        )
        .await?;

    ctx.approvals
        .apply_action(&ctx.supervisor.nik, created.steps[0].id, ApprovalAction::Approve)
        .await?;
    ctx.approvals
        .apply_action(&ctx.hr.nik, created.steps[1].id, ApprovalAction::Approve)
        .await?;
    let outcome = ctx
        .approvals
        .apply_action(&ctx.owner.nik, created.steps[2].id, ApprovalAction::Approve)
        .await?;
    assert_eq!(outcome.request_status, RequestStatus::Approved);

    let grants = UserApplication::list_for_user(&ctx.pool, ctx.requester.id).await?;
    assert_eq!(grants.len(), 1);
    assert_eq!(
        grants[0].role_assignment(),
        RoleAssignment::Internal { id: ctx.role_editor.id, name: ctx.role_editor.name.clone() }
    );

    Ok(())
}

#[tokio::test]
async fn change_role_with_no_matching_grant_fails_the_final_step() -> anyhow::Result<()> {
    let ctx = TestContext::new().await?;

    // No standing grant at all: completion must fail, not invent a row
    let created = ctx
        .requests
        .create_request(
            ctx.requester.id,
            CreateRequestInput {
                application_id: ctx.app_fixed.id,
                request_type: RequestType::ChangeRole,
                justification: "Role change without standing access".to_string(),
                old_role: Some(RoleSnapshot {
                    id: ctx.role_viewer.id,
                    name: ctx.role_viewer.name.clone(),
                }),
                new_role: Some(ctx.role_editor.clone()),
                notes: None,
            },
        )
        .await?;

    ctx.approvals
        .apply_action(&ctx.supervisor.nik, created.steps[0].id, ApprovalAction::Approve)
        .await?;
    ctx.approvals
        .apply_action(&ctx.hr.nik, created.steps[1].id, ApprovalAction::Approve)
        .await?;

    let err = ctx
        .approvals
        .apply_action(&ctx.owner.nik, created.steps[2].id, ApprovalAction::Approve)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::DataConsistency(_)));

    // The failed final step rolled back entirely: the step is still
    // pending and the request is still open
    let code = created.request.request_code.clone().unwrap();
    let steps = ApprovalStep::list_for_request(&ctx.pool, &code).await?;
    assert_eq!(steps[2].status, ApprovalStatus::Pending);
    assert_eq!(ctx.grant_count(ctx.requester.id, ctx.app_fixed.id).await?, 0);

    Ok(())
}
