//! GCP service-account impersonation
//!
//! The ambient identity is resolved by gcloud-sdk from Application Default
//! Credentials (`GOOGLE_APPLICATION_CREDENTIALS`, the gcloud user file,
//! workload identity or the metadata server). A project's service account
//! is then impersonated with IAM Credentials `generateAccessToken`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gcloud_sdk::google::iam::credentials::v1::iam_credentials_client::IamCredentialsClient;
use gcloud_sdk::google::iam::credentials::v1::{GenerateAccessTokenRequest, GenerateAccessTokenResponse};
use gcloud_sdk::tonic::{Code, Status};
use gcloud_sdk::{GoogleApi, GoogleAuthMiddleware};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::RemoteError;
use crate::session::{Credentials, IssuedCredentials};

const IAM_CREDENTIALS_ENDPOINT: &str = "https://iamcredentials.googleapis.com";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Issues access tokens for a service account
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn generate_access_token(
        &self,
        service_account: &str,
        lifetime_secs: u32,
    ) -> Result<IssuedCredentials, RemoteError>;
}

fn classify(status: &Status) -> RemoteError {
    let message = status.message().to_string();
    match status.code() {
        Code::ResourceExhausted => RemoteError::Throttled(message),
        Code::PermissionDenied | Code::Unauthenticated => RemoteError::Unauthorized(message),
        Code::Unavailable | Code::Internal | Code::Unknown => RemoteError::Network(message),
        Code::DeadlineExceeded => RemoteError::Timeout(0),
        code => RemoteError::Service {
            code: format!("{:?}", code),
            message,
        },
    }
}

fn issued(response: GenerateAccessTokenResponse) -> Result<IssuedCredentials, RemoteError> {
    let expire_time = response.expire_time.ok_or_else(|| RemoteError::Service {
        code: "MalformedResponse".to_string(),
        message: "generateAccessToken returned no expireTime".to_string(),
    })?;

    let expires_at = DateTime::<Utc>::from_timestamp(expire_time.seconds, expire_time.nanos.max(0) as u32)
        .ok_or_else(|| RemoteError::Service {
            code: "MalformedResponse".to_string(),
            message: format!("Invalid expireTime {}s", expire_time.seconds),
        })?;

    Ok(IssuedCredentials {
        credentials: Credentials::Token(response.access_token),
        expires_at: Some(expires_at),
    })
}

fn request_for(service_account: &str, lifetime_secs: u32) -> GenerateAccessTokenRequest {
    GenerateAccessTokenRequest {
        name: format!("projects/-/serviceAccounts/{}", service_account),
        delegates: vec![],
        scope: vec![CLOUD_PLATFORM_SCOPE.to_string()],
        lifetime: Some(gcloud_sdk::prost_types::Duration {
            seconds: i64::from(lifetime_secs),
            nanos: 0,
        }),
    }
}

/// Impersonates service accounts through IAM Credentials.
///
/// The client is created on first use, so a broker with no GCP projects
/// never resolves ADC.
#[derive(Default)]
pub struct GcpImpersonationIssuer {
    client: OnceCell<GoogleApi<IamCredentialsClient<GoogleAuthMiddleware>>>,
}

impl GcpImpersonationIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self) -> Result<&GoogleApi<IamCredentialsClient<GoogleAuthMiddleware>>, RemoteError> {
        self.client
            .get_or_try_init(|| async {
                debug!("Initializing IAM Credentials client");
                GoogleApi::from_function(IamCredentialsClient::new, IAM_CREDENTIALS_ENDPOINT, None)
                    .await
                    .map_err(|e| {
                        RemoteError::Unauthorized(format!("No application default credentials: {}", e))
                    })
            })
            .await
    }
}

#[async_trait]
impl TokenIssuer for GcpImpersonationIssuer {
    async fn generate_access_token(
        &self,
        service_account: &str,
        lifetime_secs: u32,
    ) -> Result<IssuedCredentials, RemoteError> {
        debug!(service_account = %service_account, "Calling generateAccessToken");

        let response = self
            .client()
            .await?
            .get()
            .generate_access_token(request_for(service_account, lifetime_secs))
            .await
            .map_err(|status| classify(&status))?;

        let issued = issued(response.into_inner())?;
        info!(service_account = %service_account, "Impersonated service account");
        Ok(issued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcloud_sdk::prost_types::Timestamp;

    #[test]
    fn test_issued_from_response() {
        let issued = issued(GenerateAccessTokenResponse {
            access_token: "ya29.c.b0Aaek".to_string(),
            expire_time: Some(Timestamp {
                seconds: 1_714_564_800,
                nanos: 0,
            }),
        })
        .unwrap();

        assert_eq!(issued.credentials.access_token(), Some("ya29.c.b0Aaek"));
        assert_eq!(issued.expires_at.unwrap().to_rfc3339(), "2024-05-01T12:00:00+00:00");
    }

    #[test]
    fn test_response_without_expiry_rejected() {
        let err = issued(GenerateAccessTokenResponse {
            access_token: "ya29".to_string(),
            expire_time: None,
        })
        .unwrap_err();
        assert!(matches!(err, RemoteError::Service { code, .. } if code == "MalformedResponse"));
    }

    #[test]
    fn test_request_names_any_project() {
        let request = request_for("deployer@web-prod.iam.gserviceaccount.com", 3600);
        assert_eq!(
            request.name,
            "projects/-/serviceAccounts/deployer@web-prod.iam.gserviceaccount.com"
        );
        assert_eq!(request.scope, vec![CLOUD_PLATFORM_SCOPE.to_string()]);
        assert_eq!(request.lifetime.unwrap().seconds, 3600);
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify(&Status::permission_denied("iam.serviceAccounts.getAccessToken denied")),
            RemoteError::Unauthorized(_)
        ));
        assert!(matches!(
            classify(&Status::unauthenticated("no credentials")),
            RemoteError::Unauthorized(_)
        ));
        assert!(classify(&Status::resource_exhausted("quota")).is_transient());
        assert!(classify(&Status::unavailable("connect failed")).is_transient());
        assert_eq!(classify(&Status::deadline_exceeded("slow")), RemoteError::Timeout(0));
        assert!(matches!(
            classify(&Status::invalid_argument("bad lifetime")),
            RemoteError::Service { code, .. } if code == "InvalidArgument"
        ));
    }
}
