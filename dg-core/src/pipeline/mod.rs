//! Event pipeline
//!
//! The notification context only enqueues. The worker drains, resolves,
//! evaluates and enforces.

mod queue;
mod sweep;
mod worker;

pub use queue::{Drained, EventQueue, EventSender, StopHandle};
pub use sweep::sweep_present;
pub use worker::{Worker, WorkerHandle};
