//! External synchronization.
//!
//! Works the outbox: each entry names a fully-approved request whose grant
//! must be mirrored into an external application. Delivery gathers the
//! employee's directory profile and reporting chain plus the local
//! credential hash, then creates or updates the remote user record. A
//! failure is recorded on the entry and reported; it never unwinds the
//! committed local state.

use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::config;
use crate::database::manager::{DatabaseError, DatabaseManager};
use crate::database::models::{AccessRequest, SyncOutbox, User};
use crate::directory::{Directory, HttpDirectoryGateway};
use crate::external::{AdapterRegistry, SyncUser};

use super::{Result, WorkflowError};

/// Outcome of one delivery attempt, reported to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub outbox_id: Uuid,
    pub request_code: String,
    pub application_code: String,
    pub delivered: bool,
    pub error: Option<String>,
}

pub struct SyncService {
    pool: PgPool,
    directory: Arc<dyn Directory>,
    adapters: AdapterRegistry,
}

impl SyncService {
    pub async fn new() -> std::result::Result<Self, DatabaseError> {
        let pool = DatabaseManager::pool().await?;
        let directory = HttpDirectoryGateway::from_config(&config::config().directory)
            .map_err(|_| DatabaseError::ConfigMissing("directory configuration"))?;
        let adapters = AdapterRegistry::from_config(config::config())
            .map_err(|_| DatabaseError::ConfigMissing("external system configuration"))?;
        Ok(Self { pool, directory: Arc::new(directory), adapters })
    }

    pub fn with_parts(pool: PgPool, directory: Arc<dyn Directory>, adapters: AdapterRegistry) -> Self {
        Self { pool, directory, adapters }
    }

    /// Attempt delivery of one entry and record the outcome on it.
    pub async fn deliver(&self, entry: SyncOutbox) -> SyncReport {
        let result = self.push(&entry).await;

        let (delivered, err_text) = match result {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };

        let marked = if delivered {
            SyncOutbox::mark_delivered(&self.pool, entry.id).await
        } else {
            SyncOutbox::mark_failed(&self.pool, entry.id, err_text.as_deref().unwrap_or("")).await
        };
        if let Err(e) = marked {
            error!(outbox_id = %entry.id, "failed to record sync outcome: {}", e);
        }

        match &err_text {
            None => info!(
                request_code = %entry.request_code,
                system = %entry.application_code,
                "external sync delivered"
            ),
            Some(msg) => error!(
                request_code = %entry.request_code,
                system = %entry.application_code,
                "external sync failed: {}",
                msg
            ),
        }

        SyncReport {
            outbox_id: entry.id,
            request_code: entry.request_code,
            application_code: entry.application_code,
            delivered,
            error: err_text,
        }
    }

    /// Re-attempt every undelivered entry, oldest first.
    pub async fn retry_pending(&self) -> Result<Vec<SyncReport>> {
        let entries = SyncOutbox::list_undelivered(&self.pool).await?;

        let mut reports = Vec::with_capacity(entries.len());
        for entry in entries {
            reports.push(self.deliver(entry).await);
        }
        Ok(reports)
    }

    async fn push(&self, entry: &SyncOutbox) -> Result<()> {
        let adapter = self.adapters.get(&entry.application_code).ok_or_else(|| {
            WorkflowError::Upstream(format!(
                "no adapter configured for external system {}",
                entry.application_code
            ))
        })?;

        let user = User::find_by_id(&self.pool, entry.user_id).await?.ok_or_else(|| {
            WorkflowError::DataConsistency(format!("user {} missing for sync", entry.user_id))
        })?;

        let request = AccessRequest::find_by_code(&self.pool, &entry.request_code)
            .await?
            .ok_or_else(|| {
                WorkflowError::DataConsistency(format!(
                    "request {} missing for sync",
                    entry.request_code
                ))
            })?;

        let role_name = request
            .new_role_name
            .clone()
            .or_else(|| request.notes.clone())
            .ok_or_else(|| {
                WorkflowError::DataConsistency(format!(
                    "request {} carries no role payload",
                    entry.request_code
                ))
            })?;

        let profile = self.directory.profile(&user.nik).await?;
        let chain = self.directory.supervisor_chain(&user.nik).await?;

        let payload = SyncUser {
            nik: user.nik.clone(),
            name: profile.name,
            email: profile.email.or(user.email.clone()),
            phone: profile.phone,
            position: profile.position,
            password: user.password.clone(),
            role_name,
            department_head_nik: chain.department_head_nik,
            division_head_nik: chain.division_head_nik,
        };

        if adapter.user_exists(&user.nik).await? {
            adapter.update_user(&payload).await?;
        } else {
            adapter.create_user(&payload).await?;
        }

        Ok(())
    }
}
