//! Ambient and profile credentials
//!
//! Ambient credentials come from the SDK's default provider chain
//! (environment, web identity, container and instance roles). A named
//! profile is resolved from the shared config and credentials files,
//! including `role_arn`/`source_profile` chains and `credential_process`.

use async_trait::async_trait;
use aws_config::profile::profile_file::ProfileFiles;
use aws_config::profile::ProfileFileCredentialsProvider;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::ProvideCredentials;
use aws_types::SdkConfig;
use tracing::debug;

use super::{issued_from_sdk, CredentialSource};
use crate::error::RemoteError;
use crate::session::IssuedCredentials;

#[derive(Debug, Clone)]
pub struct SdkCredentialSource {
    sdk_config: SdkConfig,
    profile_files: Option<ProfileFiles>,
}

impl SdkCredentialSource {
    pub fn new(sdk_config: SdkConfig) -> Self {
        Self {
            sdk_config,
            profile_files: None,
        }
    }

    /// Read profiles from these files instead of `~/.aws/config` and
    /// `~/.aws/credentials`.
    pub fn with_profile_files(mut self, profile_files: ProfileFiles) -> Self {
        self.profile_files = Some(profile_files);
        self
    }

    async fn from_profile(&self, profile: &str) -> Result<IssuedCredentials, RemoteError> {
        let mut builder = ProfileFileCredentialsProvider::builder().profile_name(profile);
        if let Some(files) = &self.profile_files {
            builder = builder.profile_files(files.clone());
        }

        let credentials = builder.build().provide_credentials().await.map_err(classify_provider)?;
        Ok(issued_from_sdk(&credentials))
    }

    async fn ambient(&self) -> Result<IssuedCredentials, RemoteError> {
        let provider = self.sdk_config.credentials_provider().ok_or_else(|| {
            RemoteError::Unauthorized("no ambient AWS credentials provider configured".to_string())
        })?;

        let credentials = provider.provide_credentials().await.map_err(classify_provider)?;
        Ok(issued_from_sdk(&credentials))
    }
}

/// Provider failures: timeouts and upstream provider errors (IMDS, STS for
/// `role_arn` profiles) are transient; missing or invalid configuration is
/// not.
fn classify_provider(err: CredentialsError) -> RemoteError {
    match &err {
        CredentialsError::ProviderTimedOut(_) => RemoteError::Timeout(0),
        CredentialsError::ProviderError(_) => RemoteError::Network(err.to_string()),
        CredentialsError::CredentialsNotLoaded(_) | CredentialsError::InvalidConfiguration(_) => {
            RemoteError::Unauthorized(err.to_string())
        }
        _ => RemoteError::Service {
            code: "CredentialsError".to_string(),
            message: err.to_string(),
        },
    }
}

#[async_trait]
impl CredentialSource for SdkCredentialSource {
    async fn base_credentials(&self, profile: Option<&str>) -> Result<IssuedCredentials, RemoteError> {
        match profile {
            Some(name) => {
                debug!(profile = %name, "Loading profile credentials");
                self.from_profile(name).await
            }
            None => {
                debug!("Loading ambient credentials");
                self.ambient().await
            }
        }
    }
}
