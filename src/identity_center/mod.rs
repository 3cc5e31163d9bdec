//! Identity Center Synchronizer
//!
//! Pulls the SSO instance metadata for an account (permission sets, users,
//! groups and organization member accounts) and swaps it into the registry
//! as one snapshot. A failed sync leaves the previous snapshot in place.

mod aws;

pub use aws::AwsIdentityCenterClient;

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::broker::CredentialBroker;
use crate::error::{BrokerError, RemoteError};
use crate::model::{
    Account, IdentityCenterDetails, IdentityCenterInstance, IdentityCenterSettings, IdentityGroup,
    IdentityUser, OrgAccountListing, PermissionSet, Purpose, Region,
};
use crate::session::Session;

/// Identity Center data service
#[async_trait]
pub trait IdentityCenterSource: Send + Sync {
    async fn describe_instance(
        &self,
        session: &Session,
        region: Region,
    ) -> Result<IdentityCenterInstance, RemoteError>;

    async fn list_permission_sets(
        &self,
        session: &Session,
        region: Region,
        instance_arn: &str,
    ) -> Result<Vec<PermissionSet>, RemoteError>;

    async fn list_users(
        &self,
        session: &Session,
        region: Region,
        identity_store_id: &str,
    ) -> Result<Vec<IdentityUser>, RemoteError>;

    async fn list_groups(
        &self,
        session: &Session,
        region: Region,
        identity_store_id: &str,
    ) -> Result<Vec<IdentityGroup>, RemoteError>;

    async fn list_org_accounts(
        &self,
        session: &Session,
        region: Region,
    ) -> Result<Vec<OrgAccountListing>, RemoteError>;
}

pub struct IdentityCenterSynchronizer {
    broker: Arc<CredentialBroker>,
    source: Arc<dyn IdentityCenterSource>,
}

impl IdentityCenterSynchronizer {
    pub fn new(broker: Arc<CredentialBroker>, source: Arc<dyn IdentityCenterSource>) -> Self {
        Self { broker, source }
    }

    /// Where the account's Identity Center lives: its own settings, or
    /// those of the organization it manages or belongs to.
    fn settings(&self, account: &Account) -> Result<IdentityCenterSettings, BrokerError> {
        if let Some(settings) = &account.identity_center {
            return Ok(settings.clone());
        }
        self.broker
            .registry()
            .organization_for(account)
            .and_then(|org| org.identity_center.clone())
            .ok_or_else(|| {
                BrokerError::configuration(format!(
                    "account {} has no identity_center settings",
                    account.account_id
                ))
            })
    }

    /// Refresh the Identity Center snapshot held for `account_id`.
    pub async fn sync(&self, account_id: &str) -> Result<Arc<IdentityCenterDetails>, BrokerError> {
        let registry = Arc::clone(self.broker.registry());
        let account = registry.get(account_id)?;
        let region = self.settings(&account)?.region;

        let session = self
            .broker
            .get_session_in_region(account_id, Purpose::Read, Some(region))
            .await
            .map_err(|e| match e {
                BrokerError::Trust { .. } => BrokerError::Sync {
                    account_id: account_id.to_string(),
                    message: e.to_string(),
                },
                other => other,
            })?;

        match self.fetch(&account, region, &session).await {
            Ok(details) => {
                let details = Arc::new(details);
                registry.store_identity_center(account_id, Arc::clone(&details));
                info!(
                    account_id = %account_id,
                    region = %region,
                    permission_sets = details.permission_sets.len(),
                    users = details.users.len(),
                    groups = details.groups.len(),
                    org_accounts = details.org_accounts.len(),
                    "Identity Center snapshot replaced"
                );
                Ok(details)
            }
            Err(e) => {
                error!(account_id = %account_id, error = %e, "Identity Center sync failed, keeping previous snapshot");
                Err(e)
            }
        }
    }

    async fn fetch(
        &self,
        account: &Account,
        region: Region,
        session: &Session,
    ) -> Result<IdentityCenterDetails, BrokerError> {
        let account_id = account.account_id.as_str();
        let registry = self.broker.registry();
        let policy = self.broker.retry_policy();
        let source = &self.source;
        let fail = |what: &str, e: RemoteError| BrokerError::Sync {
            account_id: account_id.to_string(),
            message: format!("{}: {}", what, e),
        };

        let instance = match registry.identity_center_details(account_id) {
            Some(previous) if previous.region == region => {
                debug!(account_id = %account_id, "Reusing Identity Center instance metadata");
                previous.instance()
            }
            _ => policy
                .run("sso:ListInstances", || source.describe_instance(session, region))
                .await
                .map_err(|e| fail("describe instance", e))?,
        };

        let (permission_sets, users, groups, listings) = futures::try_join!(
            async {
                policy
                    .run("sso:ListPermissionSets", || {
                        source.list_permission_sets(session, region, &instance.instance_arn)
                    })
                    .await
                    .map_err(|e| fail("permission sets", e))
            },
            async {
                policy
                    .run("identitystore:ListUsers", || {
                        source.list_users(session, region, &instance.identity_store_id)
                    })
                    .await
                    .map_err(|e| fail("users", e))
            },
            async {
                policy
                    .run("identitystore:ListGroups", || {
                        source.list_groups(session, region, &instance.identity_store_id)
                    })
                    .await
                    .map_err(|e| fail("groups", e))
            },
            async {
                policy
                    .run("organizations:ListAccounts", || source.list_org_accounts(session, region))
                    .await
                    .map_err(|e| fail("organization accounts", e))
            },
        )?;

        let org = registry.organization_for(account);
        let org_accounts: HashMap<String, Arc<Account>> = listings
            .into_iter()
            .map(|listing| {
                let member = registry.get(&listing.account_id).unwrap_or_else(|_| {
                    Arc::new(match &org {
                        Some(org) => org.member_account(&listing.account_id, &listing.account_name),
                        None => Account::new(listing.account_id.clone(), listing.account_name.clone()),
                    })
                });
                (listing.account_id, member)
            })
            .collect();

        Ok(IdentityCenterDetails {
            region,
            instance_arn: instance.instance_arn,
            identity_store_id: instance.identity_store_id,
            permission_sets: permission_sets
                .into_iter()
                .map(|ps| (ps.id().to_string(), ps))
                .collect(),
            users: users.into_iter().map(|u| (u.user_id.clone(), u)).collect(),
            groups: groups.into_iter().map(|g| (g.group_id.clone(), g)).collect(),
            org_accounts,
            synced_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::model::{AccountRule, ManagedState, Organization};
    use crate::registry::AccountRegistry;
    use crate::session::SessionCache;
    use crate::testing::{FakeCredentialSource, FakeIdentityCenterSource, FakeRoleAssumer};
    use std::time::Duration;

    const MANAGEMENT: &str = "580605962305";

    fn synchronizer(source: Arc<FakeIdentityCenterSource>) -> IdentityCenterSynchronizer {
        let management = Account::new(MANAGEMENT, "management")
            .assume_role(format!("arn:aws:iam::{}:role/IambicSpokeRole", MANAGEMENT))
            .org("o-8t0mt0ybdd");
        let org = Organization {
            org_id: "o-8t0mt0ybdd".into(),
            org_name: None,
            org_account_id: MANAGEMENT.into(),
            hub_role_arn: Some(format!("arn:aws:iam::{}:role/IambicHubRole", MANAGEMENT)),
            spoke_role_name: Some("IambicSpokeRole".into()),
            identity_center: Some(IdentityCenterSettings { region: Region::UsWest2 }),
            default_rule: AccountRule::default(),
            account_rules: vec![AccountRule {
                included_accounts: vec!["sandbox-.*".into()],
                iambic_managed: ManagedState::ImportOnly,
                ..AccountRule::default()
            }],
        };
        let registry = AccountRegistry::from_accounts(vec![management], vec![org], Region::UsEast1).unwrap();
        let config = BrokerConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            ..BrokerConfig::default()
        };
        let broker = CredentialBroker::new(
            Arc::new(registry),
            Arc::new(SessionCache::new(Duration::from_secs(300))),
            Arc::new(FakeCredentialSource::new()),
            Arc::new(FakeRoleAssumer::new()),
            config,
        );
        IdentityCenterSynchronizer::new(Arc::new(broker), source)
    }

    #[tokio::test]
    async fn test_sync_builds_snapshot() {
        let source = Arc::new(FakeIdentityCenterSource::new());
        let sync = synchronizer(source.clone());

        let details = sync.sync(MANAGEMENT).await.unwrap();

        assert_eq!(details.region, Region::UsWest2);
        assert_eq!(details.identity_store_id, "d-906716e552");
        assert!(details.permission_sets.contains_key("ps-admin"));
        assert_eq!(details.user_by_name("jdoe").unwrap().user_id, "u-1");
        assert!(details.group_by_name("engineering").is_some());

        // Registered account maps to its registry entry, the unknown member
        // is materialized from the organization rules.
        assert_eq!(details.org_accounts[MANAGEMENT].account_name, "management");
        let sandbox = &details.org_accounts["222222222222"];
        assert_eq!(sandbox.iambic_managed, ManagedState::ImportOnly);
        assert_eq!(
            sandbox.spoke_role_arn.as_deref(),
            Some("arn:aws:iam::222222222222:role/IambicSpokeRole")
        );
        assert!(sync.broker.registry().get("222222222222").is_err());

        let stored = sync.broker.identity_center_details(MANAGEMENT).unwrap();
        assert!(Arc::ptr_eq(&stored, &details));
    }

    #[tokio::test]
    async fn test_instance_metadata_fetched_once() {
        let source = Arc::new(FakeIdentityCenterSource::new());
        let sync = synchronizer(source.clone());

        sync.sync(MANAGEMENT).await.unwrap();
        sync.sync(MANAGEMENT).await.unwrap();

        assert_eq!(source.describe_calls(), 1);
        assert_eq!(source.list_calls(), 8);
    }

    #[tokio::test]
    async fn test_failed_sync_keeps_previous_snapshot() {
        let source = Arc::new(FakeIdentityCenterSource::new());
        let sync = synchronizer(source.clone());
        let before = sync.sync(MANAGEMENT).await.unwrap();

        source.add_user("u-9", "newhire");
        source.fail_groups(RemoteError::Unauthorized("AccessDeniedException".into()));
        let err = sync.sync(MANAGEMENT).await.unwrap_err();

        assert!(matches!(err, BrokerError::Sync { ref message, .. } if message.starts_with("groups")));
        let after = sync.broker.identity_center_details(MANAGEMENT).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.user_by_name("newhire").is_none());
    }

    #[tokio::test]
    async fn test_reader_sees_previous_snapshot_while_sync_fails() {
        let source = Arc::new(FakeIdentityCenterSource::new());
        let sync = Arc::new(synchronizer(source.clone()));
        let before = sync.sync(MANAGEMENT).await.unwrap();

        source.add_user("u-9", "newhire");
        source.delay_groups(Duration::from_millis(100));
        source.fail_groups(RemoteError::Unauthorized("AccessDeniedException".into()));

        let running = {
            let sync = Arc::clone(&sync);
            tokio::spawn(async move { sync.sync(MANAGEMENT).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Users are already listed; groups are still pending.
        let mid_flight = sync.broker.identity_center_details(MANAGEMENT).unwrap();
        assert!(Arc::ptr_eq(&before, &mid_flight));
        assert!(mid_flight.user_by_name("newhire").is_none());

        assert!(matches!(running.await.unwrap(), Err(BrokerError::Sync { .. })));
        let after = sync.broker.identity_center_details(MANAGEMENT).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn test_transient_listing_failure_retried() {
        let source = Arc::new(FakeIdentityCenterSource::new());
        source.fail_groups_times(RemoteError::Throttled("Rate exceeded".into()), 2);
        let sync = synchronizer(source.clone());

        let details = sync.sync(MANAGEMENT).await.unwrap();
        assert_eq!(details.groups.len(), 1);
    }

    #[tokio::test]
    async fn test_account_without_settings() {
        let sync = synchronizer(Arc::new(FakeIdentityCenterSource::new()));
        sync.broker
            .registry()
            .upsert(Account::new("333333333333", "loner").assume_role("arn:aws:iam::333333333333:role/x"))
            .unwrap();

        let err = sync.sync("333333333333").await.unwrap_err();
        assert!(matches!(err, BrokerError::Configuration(_)));
    }
}
