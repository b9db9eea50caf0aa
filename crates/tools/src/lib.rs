//! Tool registry and invocation pipeline.
//!
//! A tool is a named capability `{schema, handler}`. Invocation validates
//! arguments against the schema, enforces the per-call timeout, and
//! classifies failures — the structured result always returns to the agent,
//! which decides what to do with errors.

pub mod builtin;
mod context;
mod registry;
mod schema;

pub use context::{HostBridge, NoopBridge, ToolContext};
pub use registry::{ToolHandler, ToolRegistry};
pub use schema::validate_args;
