//! Data model
//!
//! Account records, organization rules, Identity Center snapshots and the
//! provider-specific access targets.

mod account;
mod identity_center;
mod organization;
mod target;

pub use account::*;
pub use identity_center::*;
pub use organization::*;
pub use target::*;
