//! Data types, policy document and validation modules
//!
//! Contains all core data structures shared by the pipeline stages.

mod policy;
mod types;
mod validation;

pub use policy::{ActionsSection, PolicyDocument, PolicyRules, RuleDocument};
pub use types::{
    serial_token, Category, DevNode, DeviceAction, DeviceEvent, DeviceIdentity, Guid,
    PolicyAction, PolicyEntry,
};
pub use validation::{read_bounded, validate_file_size, validate_hex_id};
