//! HR directory client.
//!
//! The personnel system is the authority for employee profiles and the
//! reporting chain; the workflow engine reads it when resolving approvers
//! at request-creation time and when assembling sync payloads. The engine
//! depends on the [`Directory`] trait so tests can substitute a static
//! directory.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::DirectoryConfig;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("employee not found in directory: {0}")]
    EmployeeNotFound(String),

    #[error("directory returned status {0}")]
    Status(StatusCode),

    #[error("directory request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid directory configuration: {0}")]
    InvalidConfig(String),
}

/// Approval metadata for an employee: who signs off first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalChainInfo {
    pub supervisor_nik: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmployeeProfile {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub position: Option<String>,
}

/// The reporting chain above the direct supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorChain {
    pub department_head_nik: Option<String>,
    pub division_head_nik: Option<String>,
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn approval_chain_info(&self, nik: &str) -> Result<ApprovalChainInfo, DirectoryError>;
    async fn profile(&self, nik: &str) -> Result<EmployeeProfile, DirectoryError>;
    async fn supervisor_chain(&self, nik: &str) -> Result<SupervisorChain, DirectoryError>;
}

/// reqwest-backed directory client with a bounded per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpDirectoryGateway {
    base_url: String,
    api_token: String,
    client: Client,
}

impl HttpDirectoryGateway {
    pub fn from_config(config: &DirectoryConfig) -> Result<Self, DirectoryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                DirectoryError::InvalidConfig(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            client,
        })
    }

    fn employee_url(&self, nik: &str, resource: &str) -> String {
        format!("{}/employees/{}/{}", self.base_url, nik, resource)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        nik: &str,
        resource: &str,
    ) -> Result<T, DirectoryError> {
        let url = self.employee_url(nik, resource);
        debug!(%url, "directory lookup");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(DirectoryError::EmployeeNotFound(nik.to_string())),
            status if !status.is_success() => Err(DirectoryError::Status(status)),
            _ => Ok(response.json::<T>().await?),
        }
    }
}

#[async_trait]
impl Directory for HttpDirectoryGateway {
    async fn approval_chain_info(&self, nik: &str) -> Result<ApprovalChainInfo, DirectoryError> {
        self.get_json(nik, "approval").await
    }

    async fn profile(&self, nik: &str) -> Result<EmployeeProfile, DirectoryError> {
        self.get_json(nik, "profile").await
    }

    async fn supervisor_chain(&self, nik: &str) -> Result<SupervisorChain, DirectoryError> {
        self.get_json(nik, "supervisors").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> HttpDirectoryGateway {
        HttpDirectoryGateway::from_config(&DirectoryConfig {
            base_url: "http://hr.test/directory/".to_string(),
            api_token: "token".to_string(),
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn base_url_is_normalized() {
        let g = gateway();
        assert_eq!(
            g.employee_url("198701", "approval"),
            "http://hr.test/directory/employees/198701/approval"
        );
    }

    #[test]
    fn approval_chain_deserializes() {
        let info: ApprovalChainInfo =
            serde_json::from_str(r#"{"supervisor_nik": "197305"}"#).unwrap();
        assert_eq!(info.supervisor_nik.as_deref(), Some("197305"));

        let info: ApprovalChainInfo = serde_json::from_str(r#"{"supervisor_nik": null}"#).unwrap();
        assert!(info.supervisor_nik.is_none());
    }

    #[test]
    fn profile_tolerates_missing_contact_fields() {
        let profile: EmployeeProfile = serde_json::from_str(
            r#"{"name": "Sari Dewi", "email": null, "phone": null, "position": "Analyst"}"#,
        )
        .unwrap();
        assert_eq!(profile.name, "Sari Dewi");
        assert!(profile.email.is_none());
    }
}
