/// Configuration management for the casework services
use crate::caselog::{ResolvePolicy, SanctionContext};
use crate::error::{CaseError, CaseResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseworkConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub policy: PolicyConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Public base URL, used when rendering permalinks into note bodies
    pub base_url: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub case_db: PathBuf,
}

/// Auto-resolve policy defaults
///
/// Callers may still override the per-operation flags; these are the
/// deployment-wide defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Close the attached case when a sanction is applied
    pub auto_resolve: bool,
    /// Override for cases opened by the sanction itself; takes precedence
    /// over `auto_resolve` when set
    pub auto_resolve_new_cases: Option<bool>,
    /// Open a case for a newly warned content that has none yet
    pub open_cases_for_new_warnings: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl CaseworkConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> CaseResult<Self> {
        dotenv::dotenv().ok();

        let base_url =
            env::var("CASEWORK_BASE_URL").unwrap_or_else(|_| "http://localhost".to_string());

        let data_directory: PathBuf = env::var("CASEWORK_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let case_db = env::var("CASEWORK_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("cases.sqlite"));

        let auto_resolve = env::var("CASEWORK_AUTO_RESOLVE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);
        let auto_resolve_new_cases = env::var("CASEWORK_AUTO_RESOLVE_NEW_CASES")
            .ok()
            .and_then(|v| v.parse().ok());
        let open_cases_for_new_warnings = env::var("CASEWORK_OPEN_CASES_FOR_NEW_WARNINGS")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(CaseworkConfig {
            service: ServiceConfig { base_url },
            storage: StorageConfig {
                data_directory,
                case_db,
            },
            policy: PolicyConfig {
                auto_resolve,
                auto_resolve_new_cases,
                open_cases_for_new_warnings,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> CaseResult<()> {
        if self.service.base_url.is_empty() {
            return Err(CaseError::Internal("Base URL cannot be empty".to_string()));
        }

        if self.service.base_url.ends_with('/') {
            return Err(CaseError::Internal(
                "Base URL must not end with a slash".to_string(),
            ));
        }

        Ok(())
    }

    /// Per-operation resolve policy seeded from the configured defaults
    pub fn resolve_policy(&self) -> ResolvePolicy {
        ResolvePolicy {
            auto_resolve: self.policy.auto_resolve,
            auto_resolve_new_cases: self.policy.auto_resolve_new_cases,
            open_cases_for_new_warnings: self.policy.open_cases_for_new_warnings,
        }
    }

    /// Context for one sanction operation performed by `acting_user_id`
    pub fn sanction_context(&self, acting_user_id: i64) -> SanctionContext {
        SanctionContext {
            acting_user_id,
            base_url: self.service.base_url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slash_rejected() {
        let mut config = CaseworkConfig::from_env().unwrap();
        config.service.base_url = "https://forum.example.com/".to_string();
        assert!(config.validate().is_err());

        config.service.base_url = "https://forum.example.com".to_string();
        assert!(config.validate().is_ok());
    }
}
