//! Identity Center snapshot types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use super::account::{Account, Region};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub arn: String,
    pub name: String,
    pub description: Option<String>,
    pub session_duration: Option<String>,
}

impl PermissionSet {
    /// Permission sets are keyed by the id at the end of their arn.
    pub fn id(&self) -> &str {
        self.arn.rsplit('/').next().unwrap_or(&self.arn)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUser {
    pub user_id: String,
    pub user_name: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityGroup {
    pub group_id: String,
    pub display_name: String,
    pub description: Option<String>,
}

/// Member account as listed by the organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgAccountListing {
    pub account_id: String,
    pub account_name: String,
}

/// SSO instance identifiers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityCenterInstance {
    pub instance_arn: String,
    pub identity_store_id: String,
}

/// Complete, immutable Identity Center snapshot.
///
/// Replaced as a whole by the synchronizer; readers hold an `Arc` to the
/// version they observed.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityCenterDetails {
    pub region: Region,
    pub instance_arn: String,
    pub identity_store_id: String,
    pub permission_sets: HashMap<String, PermissionSet>,
    pub users: HashMap<String, IdentityUser>,
    pub groups: HashMap<String, IdentityGroup>,
    pub org_accounts: HashMap<String, Arc<Account>>,
    pub synced_at: DateTime<Utc>,
}

impl IdentityCenterDetails {
    pub fn instance(&self) -> IdentityCenterInstance {
        IdentityCenterInstance {
            instance_arn: self.instance_arn.clone(),
            identity_store_id: self.identity_store_id.clone(),
        }
    }

    pub fn permission_set_by_name(&self, name: &str) -> Option<&PermissionSet> {
        self.permission_sets.values().find(|ps| ps.name == name)
    }

    pub fn group_by_name(&self, display_name: &str) -> Option<&IdentityGroup> {
        self.groups.values().find(|g| g.display_name == display_name)
    }

    pub fn user_by_name(&self, user_name: &str) -> Option<&IdentityUser> {
        self.users.values().find(|u| u.user_name == user_name)
    }
}
