//! Shared domain types for the Minder agent host.
//!
//! Everything here is provider- and transport-agnostic: the message shapes
//! the LLM adapters translate to wire formats, the capability catalogue the
//! router selects from, the configuration tree, and the shared error type.

pub mod cancel;
pub mod capability;
pub mod config;
pub mod error;
pub mod message;
pub mod tool;
pub mod usage;

pub use error::{Error, Result};
