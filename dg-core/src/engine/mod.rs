//! Policy engine modules
//!
//! Contains the rule evaluator and its per-container decision state.

mod policy;
mod state;

pub use policy::{PolicyEngine, PolicySnapshot, RuleSummary};
