//! Account Registry
//!
//! In-memory catalog of accounts keyed by id. Reads are concurrent; every
//! mutation swaps a whole `Arc<Account>` so a reader never observes a
//! half-applied change. Identity Center snapshots are held alongside and
//! replaced the same way.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::error::BrokerError;
use crate::model::{Account, IdentityCenterDetails, ManagedState, Organization, Region};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
pub struct AccountRegistry {
    accounts: RwLock<HashMap<String, Arc<Account>>>,
    organizations: RwLock<HashMap<String, Arc<Organization>>>,
    identity_center: RwLock<HashMap<String, Arc<IdentityCenterDetails>>>,
    default_region: Region,
}

impl AccountRegistry {
    pub fn new(default_region: Region) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            organizations: RwLock::new(HashMap::new()),
            identity_center: RwLock::new(HashMap::new()),
            default_region,
        }
    }

    /// Build a registry from configured records.
    ///
    /// Fails on an invalid record, an account id defined twice, or two
    /// accounts sharing a name.
    pub fn from_accounts(
        accounts: Vec<Account>,
        organizations: Vec<Organization>,
        default_region: Region,
    ) -> Result<Self, BrokerError> {
        let mut by_id: HashMap<String, Arc<Account>> = HashMap::with_capacity(accounts.len());
        let mut names: HashMap<String, String> = HashMap::with_capacity(accounts.len());

        for account in accounts {
            account.validate()?;

            if by_id.contains_key(&account.account_id) {
                return Err(BrokerError::configuration(format!(
                    "account {} is defined more than once",
                    account.account_id
                )));
            }
            if let Some(other) = names.insert(account.account_name.clone(), account.account_id.clone()) {
                return Err(BrokerError::configuration(format!(
                    "account name {} is used by both {} and {}",
                    account.account_name, other, account.account_id
                )));
            }

            by_id.insert(account.account_id.clone(), Arc::new(account));
        }

        let mut orgs = HashMap::with_capacity(organizations.len());
        for org in organizations {
            if orgs.contains_key(&org.org_id) {
                return Err(BrokerError::configuration(format!(
                    "organization {} is defined more than once",
                    org.org_id
                )));
            }
            orgs.insert(org.org_id.clone(), Arc::new(org));
        }

        info!(
            accounts = by_id.len(),
            organizations = orgs.len(),
            default_region = %default_region,
            "Account registry loaded"
        );

        Ok(Self {
            accounts: RwLock::new(by_id),
            organizations: RwLock::new(orgs),
            identity_center: RwLock::new(HashMap::new()),
            default_region,
        })
    }

    pub fn default_region(&self) -> Region {
        self.default_region
    }

    pub fn get(&self, account_id: &str) -> Result<Arc<Account>, BrokerError> {
        read(&self.accounts)
            .get(account_id)
            .cloned()
            .ok_or_else(|| BrokerError::AccountNotFound(account_id.to_string()))
    }

    pub fn by_name(&self, account_name: &str) -> Option<Arc<Account>> {
        read(&self.accounts)
            .values()
            .find(|a| a.account_name == account_name)
            .cloned()
    }

    pub fn accounts(&self) -> Vec<Arc<Account>> {
        read(&self.accounts).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        read(&self.accounts).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace an account, returning the previous record.
    ///
    /// Callers holding sessions for this account must invalidate them; the
    /// broker's `apply_account_change` does both.
    pub fn upsert(&self, account: Account) -> Result<Option<Arc<Account>>, BrokerError> {
        account.validate()?;

        let mut accounts = write(&self.accounts);
        let name_taken = accounts
            .values()
            .any(|a| a.account_name == account.account_name && a.account_id != account.account_id);
        if name_taken {
            return Err(BrokerError::configuration(format!(
                "account name {} is already in use",
                account.account_name
            )));
        }

        debug!(account_id = %account.account_id, "Replacing account record");
        Ok(accounts.insert(account.account_id.clone(), Arc::new(account)))
    }

    pub fn remove(&self, account_id: &str) -> Option<Arc<Account>> {
        write(&self.accounts).remove(account_id)
    }

    pub fn organization(&self, org_id: &str) -> Option<Arc<Organization>> {
        read(&self.organizations).get(org_id).cloned()
    }

    /// Organization an account belongs to: by `org_id`, or as the
    /// organization's management account.
    pub fn organization_for(&self, account: &Account) -> Option<Arc<Organization>> {
        let orgs = read(&self.organizations);
        if let Some(org) = account.org_id.as_deref().and_then(|id| orgs.get(id)) {
            return Some(Arc::clone(org));
        }
        orgs.values()
            .find(|o| o.org_account_id == account.account_id)
            .cloned()
    }

    /// Managed-state to enforce for an account. An account that leaves it
    /// undefined inherits the closest rule of the organization it belongs
    /// to or manages.
    pub fn effective_state(&self, account: &Account) -> ManagedState {
        if account.iambic_managed != ManagedState::Undefined {
            return account.iambic_managed;
        }
        match self.organization_for(account) {
            Some(org) => org
                .rule_for(&account.account_id, Some(&account.account_name))
                .managed_state(),
            None => ManagedState::Undefined,
        }
    }

    pub fn identity_center_details(&self, account_id: &str) -> Option<Arc<IdentityCenterDetails>> {
        read(&self.identity_center).get(account_id).cloned()
    }

    /// Replace the Identity Center snapshot for an account in one step.
    pub fn store_identity_center(&self, account_id: &str, details: Arc<IdentityCenterDetails>) {
        write(&self.identity_center).insert(account_id.to_string(), details);
    }
}
