//! Error taxonomy
//!
//! `BrokerError` is what callers see. `RemoteError` is what the remote
//! collaborators (STS, Identity Center, IAM Credentials) return, and is
//! classified into transient or fatal before it reaches a caller.

use thiserror::Error;

use crate::model::{ManagedState, Partition, Purpose, Region};

/// Errors returned by the broker, resolver, cache and synchronizer.
///
/// `Clone` so every waiter in a single-flight group receives the same value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Missing or contradictory account fields
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Account id is not present in the registry
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Region is not usable within the account's partition
    #[error("Region {region} is not valid for partition {partition}")]
    InvalidRegion { region: Region, partition: Partition },

    /// Operation denied by the account's managed-state policy
    #[error("{purpose} access denied for {account_id}: managed state is {state}")]
    ManagedState {
        account_id: String,
        state: ManagedState,
        purpose: Purpose,
    },

    /// Role assumption failed for the given hop
    #[error("Trust error at hop {hop} ({role_arn}): {message}")]
    Trust {
        hop: usize,
        role_arn: String,
        message: String,
    },

    /// Identity Center refresh failed; the previous snapshot is untouched
    #[error("Identity Center sync failed for {account_id}: {message}")]
    Sync { account_id: String, message: String },
}

impl BrokerError {
    pub fn configuration(message: impl Into<String>) -> Self {
        BrokerError::Configuration(message.into())
    }

    /// Whether the error came from policy rather than a failure
    pub fn is_policy_denial(&self) -> bool {
        matches!(self, BrokerError::ManagedState { .. })
    }
}

/// Errors reported by a remote service call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Request throttled: {0}")]
    Throttled(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    /// Authorization failure: invalid external id, role not assumable, ...
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Any other non-retryable service response
    #[error("Service error ({code}): {message}")]
    Service { code: String, message: String },
}

impl RemoteError {
    /// Throttling, network and timeout failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Throttled(_) | RemoteError::Network(_) | RemoteError::Timeout(_)
        )
    }

    /// Classify an AWS error code returned with an HTTP status.
    pub fn from_aws(status: u16, code: &str, message: &str) -> Self {
        match code {
            "Throttling" | "ThrottlingException" | "TooManyRequestsException"
            | "RequestLimitExceeded" => RemoteError::Throttled(message.to_string()),
            "AccessDenied" | "AccessDeniedException" | "UnrecognizedClientException"
            | "InvalidClientTokenId" | "ExpiredToken" | "ExpiredTokenException" => {
                RemoteError::Unauthorized(message.to_string())
            }
            _ if status == 429 => RemoteError::Throttled(message.to_string()),
            _ if status >= 500 => RemoteError::Network(format!("{} ({})", message, status)),
            _ if status == 401 || status == 403 => RemoteError::Unauthorized(message.to_string()),
            _ => RemoteError::Service {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}
