//! Access Broker Library
//!
//! Credential resolution for cloud accounts: plans hub/spoke trust chains,
//! caches short-lived sessions with single-flight refresh, enforces the
//! per-account managed-state policy and keeps Identity Center snapshots in
//! sync.

pub mod aws;
pub mod broker;
pub mod config;
pub mod error;
pub mod gate;
pub mod gcp;
pub mod identity_center;
pub mod model;
pub mod registry;
pub mod retry;
pub mod session;
pub mod trust_chain;

#[cfg(test)]
pub(crate) mod testing;

pub use broker::CredentialBroker;
pub use config::{AccessConfig, BrokerConfig};
pub use error::{BrokerError, RemoteError};
pub use gate::Verdict;
pub use identity_center::IdentityCenterSynchronizer;
pub use registry::AccountRegistry;
pub use session::{Credentials, Session, SessionCache};
