//! Shared types for the evaluation orchestrator
//!
//! Contains the types every component speaks in: provider identifiers,
//! work-unit and checkpoint shapes, the error taxonomy, and tracing setup.
//! Component-internal types (worker state, gate internals) live in the
//! orchestrator crate.

pub mod errors;
pub mod logging;
pub mod types;

pub use errors::*;
pub use types::*;
