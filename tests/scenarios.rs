//! End-to-end scenarios through the public API, with in-memory remotes.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use access_broker::aws::{AssumeRoleRequest, CredentialSource, RoleAssumer};
use access_broker::model::{AccessTarget, Account, ManagedState, Purpose, Region};
use access_broker::session::IssuedCredentials;
use access_broker::{
    AccessConfig, AccountRegistry, BrokerConfig, BrokerError, CredentialBroker, Credentials,
    RemoteError, SessionCache, Verdict,
};

const HUB: &str = "arn:aws:iam::111111111111:role/hub";
const SPOKE: &str = "arn:aws:iam::111111111111:role/spoke";

struct StaticSource;

#[async_trait]
impl CredentialSource for StaticSource {
    async fn base_credentials(&self, _profile: Option<&str>) -> Result<IssuedCredentials, RemoteError> {
        Ok(IssuedCredentials {
            credentials: Credentials::aws("AKIAHUBIDENTITY", "secret", None),
            expires_at: None,
        })
    }
}

#[derive(Default)]
struct RecordingAssumer {
    calls: AtomicUsize,
    requests: Mutex<Vec<AssumeRoleRequest>>,
    expires_in_secs: i64,
}

impl RecordingAssumer {
    fn expiring_in(expires_in_secs: i64) -> Self {
        Self {
            expires_in_secs,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoleAssumer for RecordingAssumer {
    async fn assume_role(
        &self,
        _base: &Credentials,
        request: &AssumeRoleRequest,
    ) -> Result<IssuedCredentials, RemoteError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(IssuedCredentials {
            credentials: Credentials::aws(format!("ASIA{}", n), "secret", Some("token".into())),
            expires_at: Some(Utc::now() + ChronoDuration::seconds(self.expires_in_secs)),
        })
    }
}

fn prod() -> Account {
    Account::new("111111111111", "prod")
        .hub_role(HUB)
        .spoke_role(SPOKE)
        .external_id("abc123")
        .managed(ManagedState::ImportOnly)
}

fn broker(accounts: Vec<Account>, assumer: Arc<RecordingAssumer>) -> CredentialBroker {
    let registry = AccountRegistry::from_accounts(accounts, vec![], Region::UsEast1).unwrap();
    CredentialBroker::new(
        Arc::new(registry),
        Arc::new(SessionCache::new(Duration::from_secs(300))),
        Arc::new(StaticSource),
        assumer,
        BrokerConfig::default(),
    )
}

#[tokio::test]
async fn test_import_only_prod_account() {
    let assumer = Arc::new(RecordingAssumer::expiring_in(3600));
    let broker = broker(vec![prod()], assumer.clone());

    let session = broker.get_session("111111111111", Purpose::Read).await.unwrap();
    assert_eq!(session.role_chain, vec![HUB.to_string(), SPOKE.to_string()]);
    {
        let requests = assumer.requests.lock().unwrap();
        assert_eq!(requests[0].external_id, None);
        assert_eq!(requests[1].external_id.as_deref(), Some("abc123"));
    }
    let calls_after_read = assumer.calls();

    let err = broker.get_session("111111111111", Purpose::Write).await.unwrap_err();
    assert!(matches!(
        err,
        BrokerError::ManagedState {
            state: ManagedState::ImportOnly,
            purpose: Purpose::Write,
            ..
        }
    ));
    assert_eq!(assumer.calls(), calls_after_read);
    assert_eq!(broker.verdict("111111111111", Purpose::Read).unwrap(), Verdict::ImportOnly);
}

#[tokio::test]
async fn test_disabled_account_never_reaches_remote() {
    let assumer = Arc::new(RecordingAssumer::expiring_in(3600));
    let broker = broker(vec![prod().managed(ManagedState::Disabled)], assumer.clone());

    for purpose in [Purpose::Write, Purpose::Read] {
        let err = broker.get_session("111111111111", purpose).await.unwrap_err();
        assert!(err.is_policy_denial());
    }
    assert_eq!(assumer.calls(), 0);
}

#[tokio::test]
async fn test_concurrent_sessions_single_flight() {
    let assumer = Arc::new(RecordingAssumer::expiring_in(3600));
    let broker = Arc::new(broker(vec![prod()], assumer.clone()));

    let tasks: Vec<_> = (0..25)
        .map(|_| {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move { broker.get_session("111111111111", Purpose::Read).await })
        })
        .collect();

    let mut sessions = Vec::new();
    for task in tasks {
        sessions.push(task.await.unwrap().unwrap());
    }

    // One hub hop plus one spoke hop, shared by every caller.
    assert_eq!(assumer.calls(), 2);
    assert!(sessions.iter().all(|s| Arc::ptr_eq(s, &sessions[0])));
}

#[tokio::test]
async fn test_session_near_expiry_is_refreshed() {
    // Issued with four minutes left, inside the five minute margin.
    let assumer = Arc::new(RecordingAssumer::expiring_in(240));
    let broker = broker(vec![prod()], assumer.clone());

    let first = broker.get_session("111111111111", Purpose::Read).await.unwrap();
    let second = broker.get_session("111111111111", Purpose::Read).await.unwrap();

    assert_eq!(assumer.calls(), 4);
    assert_ne!(first.credentials, second.credentials);
}

#[tokio::test]
async fn test_invalidate_then_acquire_is_a_miss() {
    let assumer = Arc::new(RecordingAssumer::expiring_in(3600));
    let broker = broker(vec![prod()], assumer.clone());

    let before = broker.get_session("111111111111", Purpose::Read).await.unwrap();
    broker.invalidate("111111111111");
    let after = broker.get_session("111111111111", Purpose::Read).await.unwrap();

    assert_eq!(assumer.calls(), 4);
    assert_ne!(before.credentials, after.credentials);
}

#[tokio::test]
async fn test_access_target_dispatch_from_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(
        br#"{
            "accounts": [{
                "account_id": "111111111111",
                "account_name": "prod",
                "hub_role_arn": "arn:aws:iam::111111111111:role/hub",
                "spoke_role_arn": "arn:aws:iam::111111111111:role/spoke",
                "iambic_managed": "read_and_write"
            }],
            "okta_organizations": [{
                "idp_name": "corp",
                "org_url": "https://corp.okta.com",
                "api_token": "00token",
                "iambic_managed": "import_only"
            }]
        }"#,
    )
    .unwrap();

    let config = AccessConfig::load(file.path()).await.unwrap();
    let assumer = Arc::new(RecordingAssumer::expiring_in(3600));
    let broker = CredentialBroker::new(
        Arc::new(config.registry().unwrap()),
        Arc::new(SessionCache::new(config.broker.safety_margin())),
        Arc::new(StaticSource),
        assumer.clone(),
        config.broker.clone(),
    );

    let aws = AccessTarget::Aws("111111111111".into());
    let session = aws.resolve_session(&broker, Purpose::Write).await.unwrap();
    assert_eq!(session.region, "us-east-1");

    let okta = AccessTarget::OktaDomain(config.okta_organization("corp").unwrap().clone());
    assert!(okta.resolve_session(&broker, Purpose::Read).await.is_ok());
    assert!(okta.resolve_session(&broker, Purpose::Write).await.is_err());

    let gcp = AccessTarget::GcpProject(access_broker::model::GcpProject {
        project_id: "iambic-dev".into(),
        project_name: None,
        service_account: "iambic@iambic-dev.iam.gserviceaccount.com".into(),
        iambic_managed: ManagedState::ReadAndWrite,
    });
    // No token issuer configured.
    assert!(matches!(
        gcp.resolve_session(&broker, Purpose::Read).await,
        Err(BrokerError::Configuration(_))
    ));
}
