use std::path::PathBuf;
use std::sync::Arc;

use minder_domain::config::Config;
use minder_providers::ProviderRegistry;
use minder_store::Store;
use minder_tools::ToolRegistry;

use crate::runtime::activity::ActivityHub;
use crate::runtime::cancel::CancelMap;
use crate::runtime::catalog::CapabilityCatalog;
use crate::runtime::gate::QuestionGate;
use crate::runtime::queue::QueueSignal;
use crate::runtime::scheduler::SchedulerSignal;

/// Shared application state handed to workers, the scheduler, and every
/// API handler.
#[derive(Clone)]
pub struct AppState {
    // ── Core services ─────────────────────────────────────────────
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub llm: Arc<ProviderRegistry>,

    // ── Tools & capabilities ──────────────────────────────────────
    pub tools: Arc<ToolRegistry>,
    pub catalog: Arc<CapabilityCatalog>,

    // ── Runtime coordination ──────────────────────────────────────
    /// Activity append + per-job broadcast.
    pub activities: Arc<ActivityHub>,
    /// Per-job cancellation tokens.
    pub cancel_map: Arc<CancelMap>,
    /// ask_user / oauth rendezvous primitives.
    pub gate: Arc<QuestionGate>,
    /// Low-latency wakeup for the worker pool.
    pub queue: Arc<QueueSignal>,
    /// Wakeup for the scheduler when schedules change.
    pub scheduler: Arc<SchedulerSignal>,

    pub workspace_root: PathBuf,
}
