use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub directory: DirectoryConfig,
    pub external_systems: Vec<ExternalSystemConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    pub enable_cors: bool,
}

/// HR directory service the approver chain is resolved against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub base_url: String,
    pub api_token: String,
    pub timeout_secs: u64,
}

/// One external application whose user/role records are mirrored
/// after a request is fully approved. Keyed by application code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSystemConfig {
    pub code: String,
    pub base_url: String,
    pub api_token: String,
    pub timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Database overrides
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout =
                v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Security overrides
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Ok(v) = env::var("SECURITY_ENABLE_CORS") {
            self.security.enable_cors = v.parse().unwrap_or(self.security.enable_cors);
        }

        // Directory overrides
        if let Ok(v) = env::var("DIRECTORY_BASE_URL") {
            self.directory.base_url = v;
        }
        if let Ok(v) = env::var("DIRECTORY_API_TOKEN") {
            self.directory.api_token = v;
        }
        if let Ok(v) = env::var("DIRECTORY_TIMEOUT_SECS") {
            self.directory.timeout_secs = v.parse().unwrap_or(self.directory.timeout_secs);
        }

        // Per-system overrides, keyed by upper-cased code:
        // EXTERNAL_<CODE>_BASE_URL, EXTERNAL_<CODE>_API_TOKEN, EXTERNAL_<CODE>_TIMEOUT_SECS
        for system in &mut self.external_systems {
            let key = system.code.to_uppercase();
            if let Ok(v) = env::var(format!("EXTERNAL_{}_BASE_URL", key)) {
                system.base_url = v;
            }
            if let Ok(v) = env::var(format!("EXTERNAL_{}_API_TOKEN", key)) {
                system.api_token = v;
            }
            if let Ok(v) = env::var(format!("EXTERNAL_{}_TIMEOUT_SECS", key)) {
                system.timeout_secs = v.parse().unwrap_or(system.timeout_secs);
            }
        }

        self
    }

    fn base_external_systems(base: &str) -> Vec<ExternalSystemConfig> {
        vec![
            ExternalSystemConfig {
                code: "eoffice".to_string(),
                base_url: format!("{}/eoffice/api", base),
                api_token: String::new(),
                timeout_secs: 5,
            },
            ExternalSystemConfig {
                code: "helpdesk".to_string(),
                base_url: format!("{}/helpdesk/api", base),
                api_token: String::new(),
                timeout_secs: 5,
            },
        ]
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            database: DatabaseConfig {
                max_connections: 10,
                connection_timeout: 30,
            },
            security: SecurityConfig {
                jwt_secret: "dev-secret-change-me".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
                enable_cors: true,
            },
            directory: DirectoryConfig {
                base_url: "http://localhost:8081/directory".to_string(),
                api_token: String::new(),
                timeout_secs: 5,
            },
            external_systems: Self::base_external_systems("http://localhost:8082"),
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            database: DatabaseConfig {
                max_connections: 20,
                connection_timeout: 10,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 24,
                enable_cors: true,
            },
            directory: DirectoryConfig {
                base_url: "https://hr-staging.internal".to_string(),
                api_token: String::new(),
                timeout_secs: 5,
            },
            external_systems: Self::base_external_systems("https://apps-staging.internal"),
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            database: DatabaseConfig {
                max_connections: 50,
                connection_timeout: 5,
            },
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
                enable_cors: true,
            },
            directory: DirectoryConfig {
                base_url: "https://hr.internal".to_string(),
                api_token: String::new(),
                timeout_secs: 5,
            },
            external_systems: Self::base_external_systems("https://apps.internal"),
        }
    }

    /// Config for the external system with the given application code, if any.
    pub fn external_system(&self, code: &str) -> Option<&ExternalSystemConfig> {
        self.external_systems
            .iter()
            .find(|s| s.code.eq_ignore_ascii_case(code))
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
