//! Error types, re-exported from the dg-error crate

pub use dg_error::{DevgateError, Result};
