//! Shared harness for the workflow integration tests.
//!
//! Connects to the database named by DATABASE_URL, applies migrations,
//! wipes the workflow tables and seeds one requester, the three chain
//! approvers, a fixed-role application with a small role catalog and a
//! dynamic-role application. Tests serialize on a global lock because the
//! HR-approver lookup and the request-code sequence are database-global.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use uar_api::database::models::{Application, RoleSnapshot, User};
use uar_api::directory::{
    ApprovalChainInfo, Directory, DirectoryError, EmployeeProfile, SupervisorChain,
};
use uar_api::external::AdapterRegistry;
use uar_api::services::{ApprovalService, RequestService, SyncService};

static LOCK: Mutex<()> = Mutex::const_new(());

/// Directory stub: supervisors are a fixed map, profiles are synthesized.
pub struct StaticDirectory {
    pub supervisors: HashMap<String, String>,
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn approval_chain_info(&self, nik: &str) -> Result<ApprovalChainInfo, DirectoryError> {
        match self.supervisors.get(nik) {
            Some(supervisor) => Ok(ApprovalChainInfo { supervisor_nik: Some(supervisor.clone()) }),
            None => Err(DirectoryError::EmployeeNotFound(nik.to_string())),
        }
    }

    async fn profile(&self, nik: &str) -> Result<EmployeeProfile, DirectoryError> {
        Ok(EmployeeProfile {
            name: format!("Employee {nik}"),
            email: Some(format!("{nik}@corp.test")),
            phone: None,
            position: Some("Staff".to_string()),
        })
    }

    async fn supervisor_chain(&self, _nik: &str) -> Result<SupervisorChain, DirectoryError> {
        Ok(SupervisorChain {
            department_head_nik: Some("190001".to_string()),
            division_head_nik: Some("190002".to_string()),
        })
    }
}

pub struct TestContext {
    pub pool: PgPool,
    pub requests: RequestService,
    pub approvals: ApprovalService,
    pub requester: User,
    pub supervisor: User,
    pub hr: User,
    pub owner: User,
    pub app_fixed: Application,
    pub app_dynamic: Application,
    pub role_viewer: RoleSnapshot,
    pub role_editor: RoleSnapshot,
    _guard: MutexGuard<'static, ()>,
}

impl TestContext {
    pub async fn new() -> anyhow::Result<Self> {
        let guard = LOCK.lock().await;

        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must point at a test database for integration tests");
        let pool = PgPoolOptions::new().max_connections(5).connect(&url).await?;
        sqlx::migrate!().run(&pool).await?;

        sqlx::query(
            "TRUNCATE sync_outbox, user_applications, approval_steps, requests,
             application_roles, external_application_roles, applications, users CASCADE",
        )
        .execute(&pool)
        .await?;

        let requester = insert_user(&pool, "198701", "Sari Dewi", false).await?;
        let supervisor = insert_user(&pool, "197305", "Budi Santoso", false).await?;
        let hr = insert_user(&pool, "199002", "Rina Putri", true).await?;
        let owner = insert_user(&pool, "196811", "Agus Wibowo", false).await?;

        let app_fixed = insert_application(&pool, "hris", "HRIS", "fixed", owner.id).await?;
        let app_dynamic =
            insert_application(&pool, "datalake", "Data Lake", "dynamic", owner.id).await?;

        let role_viewer = insert_role(&pool, app_fixed.id, "Viewer").await?;
        let role_editor = insert_role(&pool, app_fixed.id, "Editor").await?;

        let mut supervisors = HashMap::new();
        supervisors.insert(requester.nik.clone(), supervisor.nik.clone());
        supervisors.insert(hr.nik.clone(), supervisor.nik.clone());
        supervisors.insert(owner.nik.clone(), supervisor.nik.clone());
        supervisors.insert(supervisor.nik.clone(), owner.nik.clone());
        let directory: Arc<dyn Directory> = Arc::new(StaticDirectory { supervisors });

        // No external systems configured: every application is local-only,
        // so approvals never reach out over HTTP.
        let adapters = AdapterRegistry::default();
        let sync = SyncService::with_parts(pool.clone(), directory.clone(), adapters.clone());

        Ok(Self {
            requests: RequestService::with_parts(pool.clone(), directory),
            approvals: ApprovalService::with_parts(pool.clone(), adapters, sync),
            pool,
            requester,
            supervisor,
            hr,
            owner,
            app_fixed,
            app_dynamic,
            role_viewer,
            role_editor,
            _guard: guard,
        })
    }

    pub async fn grant_count(&self, user_id: Uuid, application_id: Uuid) -> anyhow::Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_applications WHERE user_id = $1 AND application_id = $2",
        )
        .bind(user_id)
        .bind(application_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

async fn insert_user(
    pool: &PgPool,
    nik: &str,
    name: &str,
    is_hr_approver: bool,
) -> anyhow::Result<User> {
    let user = sqlx::query_as(
        r#"
        INSERT INTO users (nik, name, email, password, is_hr_approver)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(nik)
    .bind(name)
    .bind(format!("{nik}@corp.test"))
    .bind("sha256:0000")
    .bind(is_hr_approver)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

async fn insert_application(
    pool: &PgPool,
    code: &str,
    name: &str,
    role_mode: &str,
    owner_id: Uuid,
) -> anyhow::Result<Application> {
    let app = sqlx::query_as(
        r#"
        INSERT INTO applications (code, name, role_mode, owner_id)
        VALUES ($1, $2, $3::role_mode, $4)
        RETURNING *
        "#,
    )
    .bind(code)
    .bind(name)
    .bind(role_mode)
    .bind(owner_id)
    .fetch_one(pool)
    .await?;
    Ok(app)
}

async fn insert_role(
    pool: &PgPool,
    application_id: Uuid,
    name: &str,
) -> anyhow::Result<RoleSnapshot> {
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO application_roles (application_id, name) VALUES ($1, $2) RETURNING id",
    )
    .bind(application_id)
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(RoleSnapshot { id, name: name.to_string() })
}
