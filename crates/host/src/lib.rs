//! The Minder host: agent runtime, job queue, scheduler, and HTTP API
//! wired around the shared store.

pub mod api;
pub mod bootstrap;
pub mod runtime;
pub mod state;

pub use bootstrap::build_state;
pub use state::AppState;
