//! Access targets
//!
//! Each provider reaches its target differently, but all of them answer
//! `resolve_session(purpose)` through the broker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use super::account::{ManagedState, Purpose};
use crate::broker::CredentialBroker;
use crate::error::BrokerError;
use crate::session::Session;

/// GCP project reached by impersonating a service account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcpProject {
    pub project_id: String,
    #[serde(default)]
    pub project_name: Option<String>,
    /// Service account email to impersonate
    pub service_account: String,
    #[serde(default)]
    pub iambic_managed: ManagedState,
}

/// Okta organization reached with a static API token
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OktaOrganization {
    pub idp_name: String,
    pub org_url: String,
    pub api_token: String,
    #[serde(default)]
    pub iambic_managed: ManagedState,
}

impl fmt::Debug for OktaOrganization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OktaOrganization")
            .field("idp_name", &self.idp_name)
            .field("org_url", &self.org_url)
            .field("api_token", &"<redacted>")
            .field("iambic_managed", &self.iambic_managed)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccessTarget {
    /// AWS account, looked up in the registry by id
    Aws(String),
    GcpProject(GcpProject),
    OktaDomain(OktaOrganization),
}

impl AccessTarget {
    pub fn id(&self) -> &str {
        match self {
            AccessTarget::Aws(account_id) => account_id,
            AccessTarget::GcpProject(project) => &project.project_id,
            AccessTarget::OktaDomain(org) => &org.idp_name,
        }
    }

    pub async fn resolve_session(
        &self,
        broker: &CredentialBroker,
        purpose: Purpose,
    ) -> Result<Arc<Session>, BrokerError> {
        match self {
            AccessTarget::Aws(account_id) => broker.get_session(account_id, purpose).await,
            AccessTarget::GcpProject(project) => broker.get_project_session(project, purpose).await,
            AccessTarget::OktaDomain(org) => broker.get_okta_session(org, purpose),
        }
    }
}
