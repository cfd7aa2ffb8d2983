//! External application adapters.
//!
//! Some applications keep their own user/role records; once a request for
//! one of them is fully approved, the grant is mirrored out over HTTP.
//! Each configured system gets a [`RestAdapter`]; the [`AdapterRegistry`]
//! resolves the adapter for an application code, and its absence is what
//! makes an application "internal".

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{AppConfig, ExternalSystemConfig};

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("external system {system} returned status {status}")]
    Status { system: String, status: StatusCode },

    #[error("request to external system {system} failed: {source}")]
    Http {
        system: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid adapter configuration: {0}")]
    InvalidConfig(String),
}

/// The user record mirrored into an external system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncUser {
    pub nik: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub position: Option<String>,
    /// Local password hash, mirrored so the systems share credentials.
    pub password: String,
    pub role_name: String,
    pub department_head_nik: Option<String>,
    pub division_head_nik: Option<String>,
}

#[async_trait]
pub trait SystemAdapter: Send + Sync {
    async fn user_exists(&self, nik: &str) -> Result<bool, AdapterError>;
    async fn create_user(&self, user: &SyncUser) -> Result<(), AdapterError>;
    async fn update_user(&self, user: &SyncUser) -> Result<(), AdapterError>;
}

/// reqwest-backed adapter speaking the external systems' user API.
#[derive(Debug, Clone)]
pub struct RestAdapter {
    code: String,
    base_url: String,
    api_token: String,
    client: Client,
}

impl RestAdapter {
    pub fn from_config(config: &ExternalSystemConfig) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AdapterError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            code: config.code.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            client,
        })
    }

    fn user_url(&self, nik: &str) -> String {
        format!("{}/users/{}", self.base_url, nik)
    }

    fn users_url(&self) -> String {
        format!("{}/users", self.base_url)
    }

    fn http_err(&self, source: reqwest::Error) -> AdapterError {
        AdapterError::Http { system: self.code.clone(), source }
    }

    fn status_err(&self, status: StatusCode) -> AdapterError {
        AdapterError::Status { system: self.code.clone(), status }
    }
}

#[async_trait]
impl SystemAdapter for RestAdapter {
    async fn user_exists(&self, nik: &str) -> Result<bool, AdapterError> {
        let response = self
            .client
            .get(self.user_url(nik))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| self.http_err(e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(self.status_err(status)),
        }
    }

    async fn create_user(&self, user: &SyncUser) -> Result<(), AdapterError> {
        debug!(system = %self.code, nik = %user.nik, "creating remote user");
        let response = self
            .client
            .post(self.users_url())
            .bearer_auth(&self.api_token)
            .json(user)
            .send()
            .await
            .map_err(|e| self.http_err(e))?;

        if !response.status().is_success() {
            return Err(self.status_err(response.status()));
        }
        Ok(())
    }

    async fn update_user(&self, user: &SyncUser) -> Result<(), AdapterError> {
        debug!(system = %self.code, nik = %user.nik, "updating remote user");
        let response = self
            .client
            .put(self.user_url(&user.nik))
            .bearer_auth(&self.api_token)
            .json(user)
            .send()
            .await
            .map_err(|e| self.http_err(e))?;

        if !response.status().is_success() {
            return Err(self.status_err(response.status()));
        }
        Ok(())
    }
}

/// Adapters keyed by application code.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SystemAdapter>>,
}

impl AdapterRegistry {
    pub fn from_config(config: &AppConfig) -> Result<Self, AdapterError> {
        let mut adapters: HashMap<String, Arc<dyn SystemAdapter>> = HashMap::new();
        for system in &config.external_systems {
            let adapter = RestAdapter::from_config(system)?;
            adapters.insert(system.code.to_lowercase(), Arc::new(adapter));
        }
        Ok(Self { adapters })
    }

    /// Registry over arbitrary adapters, for tests.
    pub fn from_adapters(entries: Vec<(String, Arc<dyn SystemAdapter>)>) -> Self {
        Self {
            adapters: entries
                .into_iter()
                .map(|(code, adapter)| (code.to_lowercase(), adapter))
                .collect(),
        }
    }

    pub fn get(&self, application_code: &str) -> Option<Arc<dyn SystemAdapter>> {
        self.adapters.get(&application_code.to_lowercase()).cloned()
    }

    /// Whether grants for this application are mirrored externally.
    pub fn is_external(&self, application_code: &str) -> bool {
        self.adapters.contains_key(&application_code.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn registry_resolves_configured_codes() {
        let registry = AdapterRegistry::from_config(&AppConfig::from_env()).unwrap();
        assert!(registry.is_external("eoffice"));
        assert!(registry.is_external("EOFFICE"));
        assert!(!registry.is_external("hris"));
        assert!(registry.get("helpdesk").is_some());
    }

    #[test]
    fn sync_user_serializes_expected_fields() {
        let user = SyncUser {
            nik: "198701".into(),
            name: "Sari Dewi".into(),
            email: Some("sari@corp.test".into()),
            phone: None,
            position: Some("Analyst".into()),
            password: "sha256:abcd".into(),
            role_name: "Agent".into(),
            department_head_nik: Some("197305".into()),
            division_head_nik: None,
        };
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["nik"], "198701");
        assert_eq!(value["role_name"], "Agent");
        assert!(value["phone"].is_null());
    }

    #[test]
    fn adapter_urls() {
        let adapter = RestAdapter::from_config(&ExternalSystemConfig {
            code: "eoffice".into(),
            base_url: "http://apps.test/eoffice/api/".into(),
            api_token: String::new(),
            timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(adapter.user_url("198701"), "http://apps.test/eoffice/api/users/198701");
        assert_eq!(adapter.users_url(), "http://apps.test/eoffice/api/users");
    }
}
