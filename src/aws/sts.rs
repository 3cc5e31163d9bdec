//! `sts:AssumeRole` through the AWS SDK

use async_trait::async_trait;
use aws_types::region::Region as AwsRegion;
use aws_types::SdkConfig;
use tracing::debug;

use super::{classify, sdk_credentials, to_utc, AssumeRoleRequest, RoleAssumer};
use crate::error::RemoteError;
use crate::session::{Credentials, IssuedCredentials};

/// Assumes roles with the previous hop's credentials.
///
/// One STS client is built per hop, signed with that hop's base
/// credentials and pinned to the chain's region, so gov and china chains
/// reach their own partition's endpoint.
#[derive(Debug, Clone)]
pub struct StsRoleAssumer {
    sdk_config: SdkConfig,
}

impl StsRoleAssumer {
    pub fn new(sdk_config: SdkConfig) -> Self {
        Self { sdk_config }
    }

    fn client(&self, base: &Credentials, request: &AssumeRoleRequest) -> Result<aws_sdk_sts::Client, RemoteError> {
        let config = aws_sdk_sts::config::Builder::from(&self.sdk_config)
            .credentials_provider(sdk_credentials(base)?)
            .region(AwsRegion::new(request.region.as_str()))
            .build();
        Ok(aws_sdk_sts::Client::from_conf(config))
    }
}

fn issued(credentials: &aws_sdk_sts::types::Credentials) -> IssuedCredentials {
    IssuedCredentials {
        credentials: Credentials::aws(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            Some(credentials.session_token().to_string()),
        ),
        expires_at: to_utc(credentials.expiration()),
    }
}

#[async_trait]
impl RoleAssumer for StsRoleAssumer {
    async fn assume_role(
        &self,
        base: &Credentials,
        request: &AssumeRoleRequest,
    ) -> Result<IssuedCredentials, RemoteError> {
        debug!(
            role_arn = %request.role_arn,
            region = %request.region,
            external_id = request.external_id.is_some(),
            "Calling sts:AssumeRole"
        );

        let output = self
            .client(base, request)?
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.role_session_name)
            .duration_seconds(request.duration_secs as i32)
            .set_external_id(request.external_id.clone())
            .send()
            .await
            .map_err(classify)?;

        output.credentials().map(issued).ok_or_else(|| RemoteError::Service {
            code: "MalformedResponse".to_string(),
            message: format!("AssumeRole for {} returned no credentials", request.role_arn),
        })
    }
}
