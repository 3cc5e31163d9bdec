//! Identity Center through the AWS SDK (`sso-admin`, `identitystore`,
//! `organizations`)

use async_trait::async_trait;
use aws_sdk_organizations::types::AccountStatus;
use aws_types::region::Region as AwsRegion;
use aws_types::SdkConfig;
use futures::{StreamExt, TryStreamExt};
use tracing::debug;

use super::IdentityCenterSource;
use crate::aws::{classify, sdk_credentials};
use crate::error::RemoteError;
use crate::model::{
    IdentityCenterInstance, IdentityGroup, IdentityUser, OrgAccountListing, Partition, PermissionSet,
    Region,
};
use crate::session::Session;

/// Concurrent DescribePermissionSet calls
const DESCRIBE_CONCURRENCY: usize = 8;

/// Organizations is served from one region per partition.
fn organizations_region(region: Region) -> Region {
    match Partition::for_region(region) {
        Partition::Aws => Region::UsEast1,
        Partition::AwsUsGov => Region::UsGovWest1,
        Partition::AwsCn => Region::CnNorthwest1,
    }
}

fn malformed(what: &str) -> RemoteError {
    RemoteError::Service {
        code: "MalformedResponse".to_string(),
        message: what.to_string(),
    }
}

fn permission_set(ps: &aws_sdk_ssoadmin::types::PermissionSet) -> Option<PermissionSet> {
    Some(PermissionSet {
        arn: ps.permission_set_arn()?.to_string(),
        name: ps.name()?.to_string(),
        description: ps.description().map(str::to_string),
        session_duration: ps.session_duration().map(str::to_string),
    })
}

/// Suspended accounts cannot be managed and are left out.
fn org_account(account: &aws_sdk_organizations::types::Account) -> Option<OrgAccountListing> {
    if account.status() == Some(&AccountStatus::Suspended) {
        return None;
    }
    Some(OrgAccountListing {
        account_id: account.id()?.to_string(),
        account_name: account.name().unwrap_or_default().to_string(),
    })
}

/// Identity Center client. Each call is signed with the session it is
/// given; pagination stops when the service repeats or omits `NextToken`.
#[derive(Debug, Clone)]
pub struct AwsIdentityCenterClient {
    sdk_config: SdkConfig,
    page_size: i32,
}

impl AwsIdentityCenterClient {
    pub fn new(sdk_config: SdkConfig) -> Self {
        Self {
            sdk_config,
            page_size: 50,
        }
    }

    fn sso_admin(&self, session: &Session, region: Region) -> Result<aws_sdk_ssoadmin::Client, RemoteError> {
        let config = aws_sdk_ssoadmin::config::Builder::from(&self.sdk_config)
            .credentials_provider(sdk_credentials(&session.credentials)?)
            .region(AwsRegion::new(region.as_str()))
            .build();
        Ok(aws_sdk_ssoadmin::Client::from_conf(config))
    }

    fn identity_store(
        &self,
        session: &Session,
        region: Region,
    ) -> Result<aws_sdk_identitystore::Client, RemoteError> {
        let config = aws_sdk_identitystore::config::Builder::from(&self.sdk_config)
            .credentials_provider(sdk_credentials(&session.credentials)?)
            .region(AwsRegion::new(region.as_str()))
            .build();
        Ok(aws_sdk_identitystore::Client::from_conf(config))
    }

    fn organizations(
        &self,
        session: &Session,
        region: Region,
    ) -> Result<aws_sdk_organizations::Client, RemoteError> {
        let config = aws_sdk_organizations::config::Builder::from(&self.sdk_config)
            .credentials_provider(sdk_credentials(&session.credentials)?)
            .region(AwsRegion::new(organizations_region(region).as_str()))
            .build();
        Ok(aws_sdk_organizations::Client::from_conf(config))
    }

    async fn describe_permission_set(
        client: &aws_sdk_ssoadmin::Client,
        instance_arn: &str,
        permission_set_arn: String,
    ) -> Result<PermissionSet, RemoteError> {
        let output = client
            .describe_permission_set()
            .instance_arn(instance_arn)
            .permission_set_arn(&permission_set_arn)
            .send()
            .await
            .map_err(classify)?;

        output
            .permission_set()
            .and_then(permission_set)
            .ok_or_else(|| malformed(&format!("permission set {} has no name", permission_set_arn)))
    }
}

#[async_trait]
impl IdentityCenterSource for AwsIdentityCenterClient {
    async fn describe_instance(
        &self,
        session: &Session,
        region: Region,
    ) -> Result<IdentityCenterInstance, RemoteError> {
        let instances = self
            .sso_admin(session, region)?
            .list_instances()
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(classify)?;

        instances
            .iter()
            .find_map(|i| {
                Some(IdentityCenterInstance {
                    instance_arn: i.instance_arn()?.to_string(),
                    identity_store_id: i.identity_store_id()?.to_string(),
                })
            })
            .ok_or_else(|| RemoteError::Service {
                code: "NoInstance".to_string(),
                message: format!("No Identity Center instance in {}", region),
            })
    }

    async fn list_permission_sets(
        &self,
        session: &Session,
        region: Region,
        instance_arn: &str,
    ) -> Result<Vec<PermissionSet>, RemoteError> {
        let client = self.sso_admin(session, region)?;
        let arns = client
            .list_permission_sets()
            .instance_arn(instance_arn)
            .max_results(self.page_size)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(classify)?;

        debug!(instance_arn = %instance_arn, count = arns.len(), "Describing permission sets");

        futures::stream::iter(arns)
            .map(|arn| Self::describe_permission_set(&client, instance_arn, arn))
            .buffer_unordered(DESCRIBE_CONCURRENCY)
            .try_collect()
            .await
    }

    async fn list_users(
        &self,
        session: &Session,
        region: Region,
        identity_store_id: &str,
    ) -> Result<Vec<IdentityUser>, RemoteError> {
        let users = self
            .identity_store(session, region)?
            .list_users()
            .identity_store_id(identity_store_id)
            .max_results(self.page_size)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(classify)?;

        Ok(users
            .iter()
            .map(|u| IdentityUser {
                user_id: u.user_id().to_string(),
                user_name: u.user_name().unwrap_or_default().to_string(),
                display_name: u.display_name().map(str::to_string),
            })
            .collect())
    }

    async fn list_groups(
        &self,
        session: &Session,
        region: Region,
        identity_store_id: &str,
    ) -> Result<Vec<IdentityGroup>, RemoteError> {
        let groups = self
            .identity_store(session, region)?
            .list_groups()
            .identity_store_id(identity_store_id)
            .max_results(self.page_size)
            .into_paginator()
            .items()
            .send()
            .try_collect()
            .await
            .map_err(classify)?;

        Ok(groups
            .iter()
            .map(|g| IdentityGroup {
                group_id: g.group_id().to_string(),
                display_name: g.display_name().unwrap_or_default().to_string(),
                description: g.description().map(str::to_string),
            })
            .collect())
    }

    async fn list_org_accounts(
        &self,
        session: &Session,
        region: Region,
    ) -> Result<Vec<OrgAccountListing>, RemoteError> {
        let accounts = self
            .organizations(session, region)?
            .list_accounts()
            .into_paginator()
            .send()
            .try_collect()
            .await
            .map_err(classify)?;

        Ok(accounts
            .iter()
            .flat_map(|page| page.accounts())
            .filter_map(org_account)
            .collect())
    }
}
