//! Configuration
//!
//! `BrokerConfig` holds the tunables that the account schema leaves open
//! (session lifetime, safety margin, retry bounds). `AccessConfig` is the
//! file the CLI loads: broker settings plus the declarative account,
//! organization and provider records.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::BrokerError;
use crate::model::{Account, GcpProject, OktaOrganization, Organization, Region};
use crate::registry::AccountRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// Sessions are refreshed this long before they expire
    pub safety_margin_secs: u64,
    /// Requested lifetime of assumed-role sessions
    pub session_duration_secs: u32,
    /// Attempts per remote call, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Upper bound on each remote call
    pub call_timeout_secs: u64,
    pub default_region: Region,
    /// Prefix for `RoleSessionName`
    pub role_session_name: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            safety_margin_secs: 300,
            session_duration_secs: 3600,
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
            call_timeout_secs: 30,
            default_region: Region::UsEast1,
            role_session_name: "iambic".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn safety_margin(&self) -> Duration {
        Duration::from_secs(self.safety_margin_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.max_attempts == 0 {
            return Err(BrokerError::configuration("max_attempts must be at least 1"));
        }
        if !(900..=43200).contains(&self.session_duration_secs) {
            return Err(BrokerError::configuration(format!(
                "session_duration_secs must be between 900 and 43200, got {}",
                self.session_duration_secs
            )));
        }
        if self.safety_margin_secs >= u64::from(self.session_duration_secs) {
            return Err(BrokerError::configuration(format!(
                "safety_margin_secs ({}) must be shorter than session_duration_secs ({})",
                self.safety_margin_secs, self.session_duration_secs
            )));
        }
        if self.role_session_name.is_empty() || self.role_session_name.len() > 55 {
            return Err(BrokerError::configuration(
                "role_session_name must be 1 to 55 characters",
            ));
        }
        Ok(())
    }
}

/// Contents of an access configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessConfig {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub organizations: Vec<Organization>,
    #[serde(default)]
    pub gcp_projects: Vec<GcpProject>,
    #[serde(default)]
    pub okta_organizations: Vec<OktaOrganization>,
}

impl AccessConfig {
    pub fn from_json(contents: &str) -> Result<Self, BrokerError> {
        let config: AccessConfig = serde_json::from_str(contents)
            .map_err(|e| BrokerError::configuration(format!("Invalid access config: {}", e)))?;
        config.broker.validate()?;
        Ok(config)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, BrokerError> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
            BrokerError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config = Self::from_json(&contents)?;
        info!(
            path = %path.display(),
            accounts = config.accounts.len(),
            organizations = config.organizations.len(),
            "Loaded access config"
        );
        Ok(config)
    }

    /// Build the account registry described by this file.
    pub fn registry(&self) -> Result<AccountRegistry, BrokerError> {
        AccountRegistry::from_accounts(
            self.accounts.clone(),
            self.organizations.clone(),
            self.broker.default_region,
        )
    }

    pub fn gcp_project(&self, project_id: &str) -> Option<&GcpProject> {
        self.gcp_projects.iter().find(|p| p.project_id == project_id)
    }

    pub fn okta_organization(&self, idp_name: &str) -> Option<&OktaOrganization> {
        self.okta_organizations.iter().find(|o| o.idp_name == idp_name)
    }
}
