//! Trust Chain Resolver
//!
//! Plans the role assumptions needed to reach an account from the ambient
//! identity. Planning only: nothing here talks to a remote service.

use serde::Serialize;

use crate::error::BrokerError;
use crate::model::{Account, Partition, Region};
use crate::session::SessionKey;

/// One role assumption
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hop {
    pub role_arn: String,
    /// Only ever set on the target hop
    pub external_id: Option<String>,
}

/// Identity the chain starts from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Process credentials (environment, instance role, ...)
    Ambient,
    /// Named static profile; terminal, no hops follow
    Profile(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrustChain {
    pub account_id: String,
    pub origin: Origin,
    pub hops: Vec<Hop>,
    pub region: Region,
    pub partition: Partition,
}

impl TrustChain {
    pub fn role_arns(&self) -> Vec<String> {
        self.hops.iter().map(|h| h.role_arn.clone()).collect()
    }

    /// Cache key for sessions produced by this chain.
    ///
    /// A profile origin is folded into the chain so that a profile session
    /// never collides with an ambient one. The external id is part of the
    /// key, so a session acquired under a rotated id is never served.
    pub fn session_key(&self) -> SessionKey {
        let mut chain = Vec::with_capacity(self.hops.len() + 1);
        if let Origin::Profile(name) = &self.origin {
            chain.push(format!("profile:{}", name));
        }
        chain.extend(self.role_arns());
        let key = SessionKey::new(&self.account_id, chain, self.region.as_str());

        match self.hops.iter().find_map(|h| h.external_id.as_deref()) {
            Some(external_id) => key.with_external_id(external_id),
            None => key,
        }
    }
}

/// Pick the region for a call: explicit > account default > registry default.
pub fn select_region(
    account: &Account,
    requested: Option<Region>,
    registry_default: Region,
) -> Result<Region, BrokerError> {
    let region = requested
        .or(account.default_region)
        .unwrap_or(registry_default);

    if !account.partition.allows(region) {
        return Err(BrokerError::InvalidRegion {
            region,
            partition: account.partition,
        });
    }

    Ok(region)
}

fn check_role_arn(account: &Account, field: &str, arn: &str) -> Result<(), BrokerError> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    let well_formed = parts.len() == 6
        && parts[0] == "arn"
        && parts[2] == "iam"
        && parts[5].starts_with("role/");

    if !well_formed {
        return Err(BrokerError::configuration(format!(
            "{} for account {} is not an IAM role arn: {}",
            field, account.account_id, arn
        )));
    }

    if parts[1] != account.partition.as_str() {
        return Err(BrokerError::configuration(format!(
            "{} for account {} is in partition {}, account is in {}",
            field, account.account_id, parts[1], account.partition
        )));
    }

    Ok(())
}

/// Plan the chain for `account`.
pub fn resolve(
    account: &Account,
    requested_region: Option<Region>,
    registry_default: Region,
) -> Result<TrustChain, BrokerError> {
    let region = select_region(account, requested_region, registry_default)?;

    if let Some(profile) = &account.aws_profile {
        return Ok(TrustChain {
            account_id: account.account_id.clone(),
            origin: Origin::Profile(profile.clone()),
            hops: Vec::new(),
            region,
            partition: account.partition,
        });
    }

    let mut hops = Vec::with_capacity(2);

    if let Some(hub) = &account.hub_role_arn {
        check_role_arn(account, "hub_role_arn", hub)?;
        hops.push(Hop {
            role_arn: hub.clone(),
            external_id: None,
        });
    }

    let (field, target) = match (&account.spoke_role_arn, &account.assume_role_arn) {
        (Some(spoke), _) => ("spoke_role_arn", spoke),
        (None, Some(assume)) => ("assume_role_arn", assume),
        (None, None) => {
            return Err(BrokerError::configuration(format!(
                "account {} has neither spoke_role_arn nor assume_role_arn",
                account.account_id
            )))
        }
    };
    check_role_arn(account, field, target)?;

    hops.push(Hop {
        role_arn: target.clone(),
        external_id: account.external_id.clone(),
    });

    Ok(TrustChain {
        account_id: account.account_id.clone(),
        origin: Origin::Ambient,
        hops,
        region,
        partition: account.partition,
    })
}
