//! In-memory fakes for the remote collaborators, with call counters.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::aws::{AssumeRoleRequest, CredentialSource, RoleAssumer};
use crate::error::RemoteError;
use crate::gcp::TokenIssuer;
use crate::identity_center::IdentityCenterSource;
use crate::model::{
    IdentityCenterInstance, IdentityGroup, IdentityUser, OrgAccountListing, PermissionSet, Region,
};
use crate::session::{Credentials, IssuedCredentials, Session};

fn in_one_hour() -> Option<chrono::DateTime<Utc>> {
    Some(Utc::now() + ChronoDuration::hours(1))
}

#[derive(Default)]
pub(crate) struct FakeCredentialSource {
    calls: AtomicUsize,
    profiles: Mutex<Vec<Option<String>>>,
}

impl FakeCredentialSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn profiles(&self) -> Vec<Option<String>> {
        self.profiles.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialSource for FakeCredentialSource {
    async fn base_credentials(&self, profile: Option<&str>) -> Result<IssuedCredentials, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.profiles.lock().unwrap().push(profile.map(String::from));
        Ok(IssuedCredentials {
            credentials: Credentials::aws("AKIABASE", "base-secret", None),
            expires_at: None,
        })
    }
}

/// Issues `ASIA-<role arn>` keys; failures can be queued per role.
#[derive(Default)]
pub(crate) struct FakeRoleAssumer {
    calls: AtomicUsize,
    requests: Mutex<Vec<AssumeRoleRequest>>,
    base_key_ids: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    delay: Duration,
}

impl FakeRoleAssumer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next `times` assumptions of `role_arn` with `error`.
    pub(crate) fn fail(&self, role_arn: &str, error: RemoteError, times: usize) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(role_arn.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn calls_for(&self, role_arn: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.role_arn == role_arn)
            .count()
    }

    pub(crate) fn requests(&self) -> Vec<AssumeRoleRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Access key ids the calls were signed with, in call order
    pub(crate) fn base_key_ids(&self) -> Vec<String> {
        self.base_key_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoleAssumer for FakeRoleAssumer {
    async fn assume_role(
        &self,
        base: &Credentials,
        request: &AssumeRoleRequest,
    ) -> Result<IssuedCredentials, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.base_key_ids
            .lock()
            .unwrap()
            .push(base.access_key_id().unwrap_or_default().to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&request.role_arn)
            .and_then(VecDeque::pop_front);
        if let Some(error) = failure {
            return Err(error);
        }

        Ok(IssuedCredentials {
            credentials: Credentials::aws(
                format!("ASIA-{}", request.role_arn),
                "assumed-secret",
                Some("assumed-token".to_string()),
            ),
            expires_at: in_one_hour(),
        })
    }
}

#[derive(Default)]
pub(crate) struct FakeTokenIssuer {
    calls: AtomicUsize,
}

impl FakeTokenIssuer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenIssuer for FakeTokenIssuer {
    async fn generate_access_token(
        &self,
        service_account: &str,
        _lifetime_secs: u32,
    ) -> Result<IssuedCredentials, RemoteError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(IssuedCredentials {
            credentials: Credentials::Token(format!("ya29.{}.{}", service_account, n)),
            expires_at: in_one_hour(),
        })
    }
}

/// One instance, one permission set, a user, a group and two member
/// accounts (`580605962305` management, `222222222222` sandbox-dev).
pub(crate) struct FakeIdentityCenterSource {
    describe_calls: AtomicUsize,
    list_calls: AtomicUsize,
    users: Mutex<Vec<IdentityUser>>,
    group_failures: Mutex<VecDeque<RemoteError>>,
    groups_broken: Mutex<Option<RemoteError>>,
    groups_delay: Mutex<Duration>,
}

impl FakeIdentityCenterSource {
    pub(crate) fn new() -> Self {
        Self {
            describe_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            users: Mutex::new(vec![IdentityUser {
                user_id: "u-1".into(),
                user_name: "jdoe".into(),
                display_name: Some("Jane Doe".into()),
            }]),
            group_failures: Mutex::new(VecDeque::new()),
            groups_broken: Mutex::new(None),
            groups_delay: Mutex::new(Duration::ZERO),
        }
    }

    pub(crate) fn describe_calls(&self) -> usize {
        self.describe_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn add_user(&self, user_id: &str, user_name: &str) {
        self.users.lock().unwrap().push(IdentityUser {
            user_id: user_id.into(),
            user_name: user_name.into(),
            display_name: None,
        });
    }

    /// Every group listing fails from now on.
    pub(crate) fn fail_groups(&self, error: RemoteError) {
        *self.groups_broken.lock().unwrap() = Some(error);
    }

    /// Group listings take this long before answering.
    pub(crate) fn delay_groups(&self, delay: Duration) {
        *self.groups_delay.lock().unwrap() = delay;
    }

    pub(crate) fn fail_groups_times(&self, error: RemoteError, times: usize) {
        let mut failures = self.group_failures.lock().unwrap();
        for _ in 0..times {
            failures.push_back(error.clone());
        }
    }
}

#[async_trait]
impl IdentityCenterSource for FakeIdentityCenterSource {
    async fn describe_instance(
        &self,
        _session: &Session,
        _region: Region,
    ) -> Result<IdentityCenterInstance, RemoteError> {
        self.describe_calls.fetch_add(1, Ordering::SeqCst);
        Ok(IdentityCenterInstance {
            instance_arn: "arn:aws:sso:::instance/ssoins-7223d8a1e8f0fa56".into(),
            identity_store_id: "d-906716e552".into(),
        })
    }

    async fn list_permission_sets(
        &self,
        _session: &Session,
        _region: Region,
        instance_arn: &str,
    ) -> Result<Vec<PermissionSet>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let instance_id = instance_arn.rsplit('/').next().unwrap_or_default();
        Ok(vec![PermissionSet {
            arn: format!("arn:aws:sso:::permissionSet/{}/ps-admin", instance_id),
            name: "AdministratorAccess".into(),
            description: None,
            session_duration: Some("PT1H".into()),
        }])
    }

    async fn list_users(
        &self,
        _session: &Session,
        _region: Region,
        _identity_store_id: &str,
    ) -> Result<Vec<IdentityUser>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.users.lock().unwrap().clone())
    }

    async fn list_groups(
        &self,
        _session: &Session,
        _region: Region,
        _identity_store_id: &str,
    ) -> Result<Vec<IdentityGroup>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.groups_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.groups_broken.lock().unwrap().clone() {
            return Err(error);
        }
        if let Some(error) = self.group_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(vec![IdentityGroup {
            group_id: "g-1".into(),
            display_name: "engineering".into(),
            description: None,
        }])
    }

    async fn list_org_accounts(
        &self,
        _session: &Session,
        _region: Region,
    ) -> Result<Vec<OrgAccountListing>, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            OrgAccountListing {
                account_id: "580605962305".into(),
                account_name: "management".into(),
            },
            OrgAccountListing {
                account_id: "222222222222".into(),
                account_name: "sandbox-dev".into(),
            },
        ])
    }
}
