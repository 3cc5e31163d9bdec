//! Organization account rules
//!
//! An organization assigns managed-state to member accounts through rules.
//! The rule with the most specific matching pattern wins.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};
use tracing::warn;

use super::account::{Account, IdentityCenterSettings, ManagedState};

fn wildcard() -> Vec<String> {
    vec!["*".to_string()]
}

fn enabled() -> bool {
    true
}

/// Rule applied to a set of member accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccountRule {
    #[serde(default = "wildcard")]
    pub included_accounts: Vec<String>,
    #[serde(default)]
    pub excluded_accounts: Vec<String>,
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub iambic_managed: ManagedState,
}

impl Default for AccountRule {
    fn default() -> Self {
        Self {
            included_accounts: wildcard(),
            excluded_accounts: Vec::new(),
            enabled: true,
            iambic_managed: ManagedState::Undefined,
        }
    }
}

impl AccountRule {
    /// Managed-state this rule grants; a disabled rule excludes the account.
    pub fn managed_state(&self) -> ManagedState {
        if self.enabled {
            self.iambic_managed
        } else {
            ManagedState::Disabled
        }
    }

    fn excludes(&self, candidates: &[String]) -> bool {
        self.excluded_accounts
            .iter()
            .any(|pattern| candidates.iter().any(|c| pattern_matches(pattern, c)))
    }

    /// Length of the longest included pattern matching any candidate.
    /// `*` scores 1; no match scores 0.
    fn specificity(&self, candidates: &[String]) -> usize {
        let mut best = 0;
        for pattern in &self.included_accounts {
            let score = if pattern == "*" {
                1
            } else if candidates.iter().any(|c| pattern_matches(pattern, c)) {
                pattern.len()
            } else {
                0
            };
            best = best.max(score);
        }
        best
    }
}

/// Compiled account patterns; `None` marks a pattern that failed to compile.
static PATTERNS: LazyLock<RwLock<HashMap<String, Option<Regex>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

fn compiled(pattern: &str) -> Option<Regex> {
    {
        let cache = PATTERNS.read().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = cache.get(pattern) {
            return entry.clone();
        }
    }

    let regex = match RegexBuilder::new(&format!("^(?:{})", pattern))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Ignoring invalid account pattern");
            None
        }
    };

    let mut cache = PATTERNS.write().unwrap_or_else(|e| e.into_inner());
    cache.insert(pattern.to_string(), regex.clone());
    regex
}

/// Case-insensitive match of an account pattern, anchored at the start of
/// the candidate only: `sandbox` matches `sandbox-dev`.
fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    compiled(pattern).map_or(false, |re| re.is_match(candidate))
}

/// An AWS organization as configured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Organization {
    pub org_id: String,
    #[serde(default)]
    pub org_name: Option<String>,
    /// Management account id
    pub org_account_id: String,
    #[serde(default)]
    pub hub_role_arn: Option<String>,
    /// Role name assumed in member accounts discovered through the organization
    #[serde(default)]
    pub spoke_role_name: Option<String>,
    #[serde(default)]
    pub identity_center: Option<IdentityCenterSettings>,
    #[serde(default)]
    pub default_rule: AccountRule,
    #[serde(default)]
    pub account_rules: Vec<AccountRule>,
}

impl Organization {
    /// Pick the closest rule for an account, falling back to `default_rule`.
    pub fn rule_for(&self, account_id: &str, account_name: Option<&str>) -> &AccountRule {
        let mut candidates = vec![account_id.to_string()];
        if let Some(name) = account_name {
            candidates.push(name.to_lowercase());
        }

        let mut best: Option<(&AccountRule, usize)> = None;
        for rule in &self.account_rules {
            if rule.excludes(&candidates) {
                continue;
            }
            let score = rule.specificity(&candidates);
            if score > 0 && best.map_or(true, |(_, s)| score > s) {
                best = Some((rule, score));
            }
        }

        best.map(|(rule, _)| rule).unwrap_or(&self.default_rule)
    }

    /// Build an account record for a member discovered through the
    /// organization but absent from the registry.
    pub fn member_account(&self, account_id: &str, account_name: &str) -> Account {
        let rule = self.rule_for(account_id, Some(account_name));
        let mut account = Account::new(account_id, account_name)
            .org(self.org_id.clone())
            .managed(rule.managed_state());

        account.hub_role_arn = self.hub_role_arn.clone();
        account.spoke_role_arn = self.spoke_role_name.as_ref().map(|name| {
            let partition = self
                .hub_role_arn
                .as_deref()
                .and_then(|arn| arn.split(':').nth(1))
                .unwrap_or("aws");
            format!("arn:{}:iam::{}:role/{}", partition, account_id, name)
        });
        account
    }
}
