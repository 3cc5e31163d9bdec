//! Sessions
//!
//! A `Session` is the credential material obtained for an account through a
//! specific chain in a specific region. Sessions are owned by the
//! [`SessionCache`]; callers receive shared `Arc` handles.

mod cache;

pub use cache::SessionCache;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Credential material
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    AwsKeys {
        access_key_id: String,
        secret_access_key: String,
        session_token: Option<String>,
    },
    Token(String),
}

impl Credentials {
    pub fn aws(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Credentials::AwsKeys {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        match self {
            Credentials::Token(t) => Some(t),
            _ => None,
        }
    }

    pub fn access_key_id(&self) -> Option<&str> {
        match self {
            Credentials::AwsKeys { access_key_id, .. } => Some(access_key_id),
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::AwsKeys { access_key_id, .. } => f
                .debug_struct("AwsKeys")
                .field("access_key_id", access_key_id)
                .field("secret_access_key", &"<redacted>")
                .finish(),
            Credentials::Token(_) => f.debug_tuple("Token").field(&"<redacted>").finish(),
        }
    }
}

/// Credentials as returned by a remote issuer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCredentials {
    pub credentials: Credentials,
    /// `None` for material that does not expire on its own
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub account_id: String,
    /// Roles actually assumed, in order
    pub role_chain: Vec<String>,
    pub region: String,
    pub credentials: Credentials,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn from_issued(key: &SessionKey, issued: IssuedCredentials) -> Self {
        Self {
            account_id: key.account_id.clone(),
            role_chain: key.role_chain.clone(),
            region: key.region.clone(),
            credentials: issued.credentials,
            issued_at: Utc::now(),
            expires_at: issued.expires_at,
        }
    }

    /// Usable for at least `margin` past `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now < expires_at - margin,
            None => true,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.map_or(false, |e| Utc::now() >= e)
    }

    pub fn time_until_expiry(&self) -> Option<Duration> {
        self.expires_at
            .map(|e| (e - Utc::now()).max(Duration::zero()))
    }
}

/// Cache key: account, ordered role chain, region
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionKey {
    pub account_id: String,
    pub role_chain: Vec<String>,
    pub region: String,
    /// Digest of the external id presented on the target hop, never the id
    pub external_id_digest: Option<String>,
}

impl SessionKey {
    pub fn new(account_id: &str, role_chain: Vec<String>, region: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            role_chain,
            region: region.to_string(),
            external_id_digest: None,
        }
    }

    /// Sessions obtained with different external ids never share a slot.
    pub fn with_external_id(mut self, external_id: &str) -> Self {
        let digest = Sha256::digest(external_id.as_bytes());
        self.external_id_digest = Some(hex::encode(&digest[..8]));
        self
    }

    /// Short stable digest, for logs
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.account_id.as_bytes());
        for arn in &self.role_chain {
            hasher.update([0u8]);
            hasher.update(arn.as_bytes());
        }
        hasher.update([0u8]);
        hasher.update(self.region.as_bytes());
        if let Some(digest) = &self.external_id_digest {
            hasher.update([0u8]);
            hasher.update(digest.as_bytes());
        }
        hex::encode(&hasher.finalize()[..8])
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}@{}", self.account_id, self.fingerprint(), self.region)
    }
}
