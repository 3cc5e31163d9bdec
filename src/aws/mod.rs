//! AWS collaborators
//!
//! - [`CredentialSource`]: ambient or static-profile base credentials
//! - [`RoleAssumer`]: one `sts:AssumeRole` hop
//!
//! Both sit on the AWS SDK. SDK retries are switched off in the shared
//! config; every call goes through the broker's [`RetryPolicy`] instead.
//!
//! [`RetryPolicy`]: crate::retry::RetryPolicy

mod credentials;
mod sts;

pub use credentials::SdkCredentialSource;
pub use sts::StsRoleAssumer;

use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::BehaviorVersion;
use aws_smithy_runtime_api::client::orchestrator::HttpResponse;
use aws_smithy_runtime_api::client::result::SdkError;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use aws_smithy_types::retry::RetryConfig;
use aws_smithy_types::timeout::TimeoutConfig;
use aws_types::region::Region as AwsRegion;
use aws_types::SdkConfig;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::RemoteError;
use crate::model::Region;
use crate::session::{Credentials, IssuedCredentials};

/// Name the broker's static credentials report to the SDK
const PROVIDER_NAME: &str = "access-broker";

/// Parameters for a single role assumption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssumeRoleRequest {
    pub role_arn: String,
    pub role_session_name: String,
    pub external_id: Option<String>,
    pub duration_secs: u32,
    pub region: Region,
}

/// Provider of the hub identity's base credentials
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Ambient credentials when `profile` is `None`, otherwise the named
    /// profile.
    async fn base_credentials(&self, profile: Option<&str>) -> Result<IssuedCredentials, RemoteError>;
}

/// Remote role-assumption service
#[async_trait]
pub trait RoleAssumer: Send + Sync {
    async fn assume_role(
        &self,
        base: &Credentials,
        request: &AssumeRoleRequest,
    ) -> Result<IssuedCredentials, RemoteError>;
}

/// Load the shared SDK configuration: default credential and region chains
/// (falling back to `default_region`), SDK retries off, every operation
/// bounded by `call_timeout`.
pub async fn load_sdk_config(default_region: Region, call_timeout: Duration) -> SdkConfig {
    let region = RegionProviderChain::default_provider().or_else(AwsRegion::new(default_region.as_str()));

    aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .retry_config(RetryConfig::disabled())
        .timeout_config(TimeoutConfig::builder().operation_timeout(call_timeout).build())
        .load()
        .await
}

/// Session material as SDK credentials, for signing calls made with it.
pub(crate) fn sdk_credentials(
    credentials: &Credentials,
) -> Result<aws_credential_types::Credentials, RemoteError> {
    match credentials {
        Credentials::AwsKeys {
            access_key_id,
            secret_access_key,
            session_token,
        } => Ok(aws_credential_types::Credentials::new(
            access_key_id.clone(),
            secret_access_key.clone(),
            session_token.clone(),
            None,
            PROVIDER_NAME,
        )),
        Credentials::Token(_) => Err(RemoteError::Unauthorized(
            "session carries a bearer token, not AWS keys".to_string(),
        )),
    }
}

/// Base credentials as returned by an SDK provider.
pub(crate) fn issued_from_sdk(credentials: &aws_credential_types::Credentials) -> IssuedCredentials {
    IssuedCredentials {
        credentials: Credentials::aws(
            credentials.access_key_id(),
            credentials.secret_access_key(),
            credentials.session_token().map(str::to_string),
        ),
        expires_at: credentials.expiry().map(DateTime::<Utc>::from),
    }
}

pub(crate) fn to_utc(timestamp: &aws_smithy_types::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(timestamp.secs(), timestamp.subsec_nanos())
}

/// Classify an SDK failure as transient or fatal.
pub(crate) fn classify<E>(err: SdkError<E, HttpResponse>) -> RemoteError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match &err {
        SdkError::ServiceError(context) => {
            let status = context.raw().status().as_u16();
            let service_error = context.err();
            RemoteError::from_aws(
                status,
                service_error.code().unwrap_or("Unknown"),
                service_error.message().unwrap_or_default(),
            )
        }
        SdkError::TimeoutError(_) => RemoteError::Timeout(0),
        SdkError::DispatchFailure(failure) if failure.is_timeout() => RemoteError::Timeout(0),
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            RemoteError::Network(DisplayErrorContext(&err).to_string())
        }
        _ => RemoteError::Service {
            code: "ClientError".to_string(),
            message: DisplayErrorContext(&err).to_string(),
        },
    }
}
