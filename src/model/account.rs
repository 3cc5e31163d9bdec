//! Account record
//!
//! The declarative description of a cloud account: where it lives, how to
//! reach it, and whether automated writes are allowed.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::BrokerError;

macro_rules! regions {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Enumerated AWS region set
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Region {
            $(
                #[serde(rename = $name)]
                $variant,
            )+
        }

        impl Region {
            pub const ALL: &'static [Region] = &[$(Region::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Region::$variant => $name,)+
                }
            }
        }

        impl std::str::FromStr for Region {
            type Err = BrokerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Region::$variant),)+
                    other => Err(BrokerError::configuration(format!("Unknown region: {}", other))),
                }
            }
        }
    };
}

regions! {
    UsEast1 => "us-east-1",
    UsEast2 => "us-east-2",
    UsWest1 => "us-west-1",
    UsWest2 => "us-west-2",
    AfSouth1 => "af-south-1",
    ApEast1 => "ap-east-1",
    ApSouth1 => "ap-south-1",
    ApNortheast1 => "ap-northeast-1",
    ApNortheast2 => "ap-northeast-2",
    ApNortheast3 => "ap-northeast-3",
    ApSoutheast1 => "ap-southeast-1",
    ApSoutheast2 => "ap-southeast-2",
    ApSoutheast3 => "ap-southeast-3",
    CaCentral1 => "ca-central-1",
    EuCentral1 => "eu-central-1",
    EuWest1 => "eu-west-1",
    EuWest2 => "eu-west-2",
    EuWest3 => "eu-west-3",
    EuSouth1 => "eu-south-1",
    EuNorth1 => "eu-north-1",
    MeSouth1 => "me-south-1",
    MeCentral1 => "me-central-1",
    SaEast1 => "sa-east-1",
    UsGovEast1 => "us-gov-east-1",
    UsGovWest1 => "us-gov-west-1",
    CnNorth1 => "cn-north-1",
    CnNorthwest1 => "cn-northwest-1",
}

impl Default for Region {
    fn default() -> Self {
        Region::UsEast1
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AWS partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Partition {
    #[default]
    #[serde(rename = "aws")]
    Aws,
    #[serde(rename = "aws-us-gov")]
    AwsUsGov,
    #[serde(rename = "aws-cn")]
    AwsCn,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Aws => "aws",
            Partition::AwsUsGov => "aws-us-gov",
            Partition::AwsCn => "aws-cn",
        }
    }

    /// Gov and China partitions only reach their own regions.
    pub fn allows(&self, region: Region) -> bool {
        let name = region.as_str();
        match self {
            Partition::AwsUsGov => name.starts_with("us-gov-"),
            Partition::AwsCn => name.starts_with("cn-"),
            Partition::Aws => !name.starts_with("us-gov-") && !name.starts_with("cn-"),
        }
    }

    /// Partition a region belongs to
    pub fn for_region(region: Region) -> Self {
        let name = region.as_str();
        if name.starts_with("us-gov-") {
            Partition::AwsUsGov
        } else if name.starts_with("cn-") {
            Partition::AwsCn
        } else {
            Partition::Aws
        }
    }

    /// DNS suffix for service endpoints
    pub fn dns_suffix(&self) -> &'static str {
        match self {
            Partition::AwsCn => "amazonaws.com.cn",
            _ => "amazonaws.com",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-account policy on automated changes (`iambic_managed`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ManagedState {
    #[default]
    Undefined,
    ReadAndWrite,
    ImportOnly,
    Enforced,
    Disabled,
}

impl fmt::Display for ManagedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagedState::Undefined => "undefined",
            ManagedState::ReadAndWrite => "read_and_write",
            ManagedState::ImportOnly => "import_only",
            ManagedState::Enforced => "enforced",
            ManagedState::Disabled => "disabled",
        };
        f.write_str(name)
    }
}

/// Why a session is being requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Read,
    Write,
}

impl std::str::FromStr for Purpose {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Purpose::Read),
            "write" => Ok(Purpose::Write),
            other => Err(BrokerError::configuration(format!("Unknown purpose: {}", other))),
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Purpose::Read => write!(f, "read"),
            Purpose::Write => write!(f, "write"),
        }
    }
}

/// Opaque key/value pair passed through to templating
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Variable {
    pub key: String,
    pub value: String,
}

/// Where the account's Identity Center instance lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityCenterSettings {
    #[serde(default)]
    pub region: Region,
}

/// A cloud account as configured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Account {
    /// 12-digit account id
    pub account_id: String,
    pub account_name: String,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub partition: Partition,
    /// Falls back to the registry default (us-east-1) when absent
    #[serde(default)]
    pub default_region: Option<Region>,
    #[serde(default)]
    pub iambic_managed: ManagedState,
    #[serde(default)]
    pub hub_role_arn: Option<String>,
    #[serde(default)]
    pub spoke_role_arn: Option<String>,
    #[serde(default)]
    pub assume_role_arn: Option<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    /// Static profile; when set, role chaining is ignored
    #[serde(default)]
    pub aws_profile: Option<String>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub identity_center: Option<IdentityCenterSettings>,
}

impl Account {
    pub fn new(account_id: impl Into<String>, account_name: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            account_name: account_name.into(),
            org_id: None,
            partition: Partition::Aws,
            default_region: None,
            iambic_managed: ManagedState::Undefined,
            hub_role_arn: None,
            spoke_role_arn: None,
            assume_role_arn: None,
            external_id: None,
            aws_profile: None,
            variables: Vec::new(),
            identity_center: None,
        }
    }

    pub fn hub_role(mut self, arn: impl Into<String>) -> Self {
        self.hub_role_arn = Some(arn.into());
        self
    }

    pub fn spoke_role(mut self, arn: impl Into<String>) -> Self {
        self.spoke_role_arn = Some(arn.into());
        self
    }

    pub fn assume_role(mut self, arn: impl Into<String>) -> Self {
        self.assume_role_arn = Some(arn.into());
        self
    }

    pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.aws_profile = Some(profile.into());
        self
    }

    pub fn managed(mut self, state: ManagedState) -> Self {
        self.iambic_managed = state;
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.default_region = Some(region);
        self
    }

    pub fn partition(mut self, partition: Partition) -> Self {
        self.partition = partition;
        self
    }

    pub fn org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.push(Variable {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn variable_value(&self, key: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|v| v.key == key)
            .map(|v| v.value.as_str())
    }

    /// Check the record invariants that do not depend on registry context.
    pub fn validate(&self) -> Result<(), BrokerError> {
        if self.account_id.len() != 12 || !self.account_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(BrokerError::configuration(format!(
                "account_id must be 12 digits, got {:?}",
                self.account_id
            )));
        }

        if self.account_name.trim().is_empty() {
            return Err(BrokerError::configuration(format!(
                "account {} has an empty account_name",
                self.account_id
            )));
        }

        if let Some(region) = self.default_region {
            if !self.partition.allows(region) {
                return Err(BrokerError::InvalidRegion {
                    region,
                    partition: self.partition,
                });
            }
        }

        let mut keys = HashSet::new();
        for variable in &self.variables {
            if !keys.insert(variable.key.as_str()) {
                return Err(BrokerError::configuration(format!(
                    "account {} defines variable {} more than once",
                    self.account_id, variable.key
                )));
            }
        }

        Ok(())
    }
}
