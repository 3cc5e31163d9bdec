//! Managed-State Gate
//!
//! Pure decision table consulted before any session is handed out.
//!
//! | managed-state  | read | write |
//! |----------------|------|-------|
//! | undefined      | yes  | yes   |
//! | read_and_write | yes  | yes   |
//! | import_only    | yes  | no    |
//! | enforced       | yes  | yes   |
//! | disabled       | no   | no    |

use serde::Serialize;
use std::fmt;

use crate::error::BrokerError;
use crate::model::{ManagedState, Purpose};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allowed,
    /// Read allowed; the account may only be imported from, never written to
    ImportOnly,
    Denied,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Verdict::Denied)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Allowed => write!(f, "allowed"),
            Verdict::ImportOnly => write!(f, "import_only"),
            Verdict::Denied => write!(f, "denied"),
        }
    }
}

pub fn evaluate(state: ManagedState, purpose: Purpose) -> Verdict {
    match (state, purpose) {
        (ManagedState::Disabled, _) => Verdict::Denied,
        (ManagedState::ImportOnly, Purpose::Write) => Verdict::Denied,
        (ManagedState::ImportOnly, Purpose::Read) => Verdict::ImportOnly,
        (ManagedState::Undefined, _)
        | (ManagedState::ReadAndWrite, _)
        | (ManagedState::Enforced, _) => Verdict::Allowed,
    }
}

/// `evaluate`, turned into a `ManagedState` error on denial.
pub fn check(account_id: &str, state: ManagedState, purpose: Purpose) -> Result<Verdict, BrokerError> {
    match evaluate(state, purpose) {
        Verdict::Denied => Err(BrokerError::ManagedState {
            account_id: account_id.to_string(),
            state,
            purpose,
        }),
        verdict => Ok(verdict),
    }
}
