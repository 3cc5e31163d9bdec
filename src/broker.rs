//! Credential Broker
//!
//! Turns an account id and a purpose into a live session:
//!
//! 1. Look up the account and consult the managed-state gate. A denial
//!    returns before any remote call.
//! 2. Plan the trust chain.
//! 3. Acquire through the session cache. On a miss, base credentials are
//!    fetched (hop 0) and each role in the chain is assumed in order
//!    (hops 1..n). Transient failures are retried per hop; the first fatal
//!    failure aborts the whole chain and nothing is cached.

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::aws::{AssumeRoleRequest, CredentialSource, RoleAssumer};
use crate::config::BrokerConfig;
use crate::error::{BrokerError, RemoteError};
use crate::gate::{self, Verdict};
use crate::gcp::TokenIssuer;
use crate::model::{Account, GcpProject, IdentityCenterDetails, OktaOrganization, Purpose, Region};
use crate::registry::AccountRegistry;
use crate::retry::RetryPolicy;
use crate::session::{Credentials, Session, SessionCache, SessionKey};
use crate::trust_chain::{self, Origin, TrustChain};

/// Region recorded on sessions for providers without regions
const GLOBAL_REGION: &str = "global";

pub struct CredentialBroker {
    registry: Arc<AccountRegistry>,
    cache: Arc<SessionCache>,
    credential_source: Arc<dyn CredentialSource>,
    role_assumer: Arc<dyn RoleAssumer>,
    token_issuer: Option<Arc<dyn TokenIssuer>>,
    config: BrokerConfig,
}

impl CredentialBroker {
    pub fn new(
        registry: Arc<AccountRegistry>,
        cache: Arc<SessionCache>,
        credential_source: Arc<dyn CredentialSource>,
        role_assumer: Arc<dyn RoleAssumer>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            credential_source,
            role_assumer,
            token_issuer: None,
            config,
        }
    }

    pub fn with_token_issuer(mut self, issuer: Arc<dyn TokenIssuer>) -> Self {
        self.token_issuer = Some(issuer);
        self
    }

    pub fn registry(&self) -> &Arc<AccountRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<SessionCache> {
        &self.cache
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_config(&self.config)
    }

    /// Session for `account_id` in the account's default region.
    pub async fn get_session(
        &self,
        account_id: &str,
        purpose: Purpose,
    ) -> Result<Arc<Session>, BrokerError> {
        self.get_session_in_region(account_id, purpose, None).await
    }

    pub async fn get_session_in_region(
        &self,
        account_id: &str,
        purpose: Purpose,
        region: Option<Region>,
    ) -> Result<Arc<Session>, BrokerError> {
        let account = self.registry.get(account_id)?;
        let state = self.registry.effective_state(&account);
        gate::check(account_id, state, purpose)?;

        let chain = self.plan(&account, region)?;
        let key = chain.session_key();
        debug!(
            account_id = %account_id,
            purpose = %purpose,
            region = %chain.region,
            hops = chain.hops.len(),
            "Acquiring session"
        );

        let fetch = ChainFetch {
            chain,
            key: key.clone(),
            credential_source: Arc::clone(&self.credential_source),
            role_assumer: Arc::clone(&self.role_assumer),
            policy: self.retry_policy(),
            duration_secs: self.config.session_duration_secs,
            session_name: self.config.role_session_name.clone(),
        };

        self.cache.acquire(key, move || fetch.run()).await
    }

    /// Plan the trust chain for an account without acquiring anything.
    pub fn plan(&self, account: &Account, region: Option<Region>) -> Result<TrustChain, BrokerError> {
        trust_chain::resolve(account, region, self.registry.default_region())
    }

    /// Session for a GCP project, impersonating its service account.
    pub async fn get_project_session(
        &self,
        project: &GcpProject,
        purpose: Purpose,
    ) -> Result<Arc<Session>, BrokerError> {
        gate::check(&project.project_id, project.iambic_managed, purpose)?;

        let issuer = self.token_issuer.clone().ok_or_else(|| {
            BrokerError::configuration(format!(
                "no GCP token issuer configured for project {}",
                project.project_id
            ))
        })?;

        let service_account = project.service_account.clone();
        let key = SessionKey::new(&project.project_id, vec![service_account.clone()], GLOBAL_REGION);
        let policy = self.retry_policy();
        let lifetime = self.config.session_duration_secs;
        let session_key = key.clone();

        self.cache
            .acquire(key, move || async move {
                let issued = policy
                    .run("iamcredentials:GenerateAccessToken", || {
                        issuer.generate_access_token(&service_account, lifetime)
                    })
                    .await
                    .map_err(|e| trust_error(1, &service_account, e))?;

                Ok(Session::from_issued(&session_key, issued))
            })
            .await
    }

    /// Session for an Okta organization. The API token does not expire, so
    /// this never touches the network.
    pub fn get_okta_session(
        &self,
        org: &OktaOrganization,
        purpose: Purpose,
    ) -> Result<Arc<Session>, BrokerError> {
        gate::check(&org.idp_name, org.iambic_managed, purpose)?;

        Ok(Arc::new(Session {
            account_id: org.idp_name.clone(),
            role_chain: Vec::new(),
            region: GLOBAL_REGION.to_string(),
            credentials: Credentials::Token(org.api_token.clone()),
            issued_at: chrono::Utc::now(),
            expires_at: None,
        }))
    }

    /// Gate verdict for an account, without acquiring a session.
    pub fn verdict(&self, account_id: &str, purpose: Purpose) -> Result<Verdict, BrokerError> {
        let account = self.registry.get(account_id)?;
        Ok(gate::evaluate(self.registry.effective_state(&account), purpose))
    }

    pub fn invalidate(&self, account_id: &str) -> usize {
        self.cache.invalidate(account_id)
    }

    /// Replace an account record and drop every session acquired under the
    /// old one, including acquisitions still in flight.
    pub fn apply_account_change(&self, account: Account) -> Result<(), BrokerError> {
        let account_id = account.account_id.clone();
        self.registry.upsert(account)?;
        let dropped = self.cache.invalidate(&account_id);
        info!(account_id = %account_id, dropped, "Applied account change");
        Ok(())
    }

    pub fn identity_center_details(&self, account_id: &str) -> Option<Arc<IdentityCenterDetails>> {
        self.registry.identity_center_details(account_id)
    }
}

fn trust_error(hop: usize, role_arn: &str, err: RemoteError) -> BrokerError {
    BrokerError::Trust {
        hop,
        role_arn: role_arn.to_string(),
        message: err.to_string(),
    }
}

fn role_session_name(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &id[..8])
}

/// Everything a cache miss needs, owned so the fetch can outlive the caller.
struct ChainFetch {
    chain: TrustChain,
    key: SessionKey,
    credential_source: Arc<dyn CredentialSource>,
    role_assumer: Arc<dyn RoleAssumer>,
    policy: RetryPolicy,
    duration_secs: u32,
    session_name: String,
}

impl ChainFetch {
    async fn run(self) -> Result<Session, BrokerError> {
        let (profile, origin) = match &self.chain.origin {
            Origin::Profile(name) => (Some(name.as_str()), format!("profile:{}", name)),
            Origin::Ambient => (None, "ambient".to_string()),
        };

        let source = &self.credential_source;
        let mut current = self
            .policy
            .run("base-credentials", || source.base_credentials(profile))
            .await
            .map_err(|e| trust_error(0, &origin, e))?;

        for (index, hop) in self.chain.hops.iter().enumerate() {
            let request = AssumeRoleRequest {
                role_arn: hop.role_arn.clone(),
                role_session_name: role_session_name(&self.session_name),
                external_id: hop.external_id.clone(),
                duration_secs: self.duration_secs,
                region: self.chain.region,
            };

            let base = current.credentials;
            let assumer = &self.role_assumer;
            current = self
                .policy
                .run("sts:AssumeRole", || assumer.assume_role(&base, &request))
                .await
                .map_err(|e| trust_error(index + 1, &hop.role_arn, e))?;

            debug!(account_id = %self.chain.account_id, hop = index + 1, role_arn = %hop.role_arn, "Hop assumed");
        }

        info!(
            account_id = %self.chain.account_id,
            region = %self.chain.region,
            hops = self.chain.hops.len(),
            "Session acquired"
        );
        Ok(Session::from_issued(&self.key, current))
    }
}
