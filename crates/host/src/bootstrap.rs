//! State assembly, startup recovery, and background task launch.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use regex::RegexSet;

use minder_domain::config::Config;
use minder_domain::usage::ModelPricing;
use minder_providers::{ProviderRegistry, UsageEvent, UsageSink};
use minder_store::{JobStatus, Store, UsageRecord};
use minder_tools::ToolRegistry;

use crate::runtime::activity::ActivityHub;
use crate::runtime::bridge::register_internal_tools;
use crate::runtime::cancel::CancelMap;
use crate::runtime::catalog::CapabilityCatalog;
use crate::runtime::gate::QuestionGate;
use crate::runtime::queue::{self, QueueSignal, WorkerHandles};
use crate::runtime::scheduler::{self, SchedulerSignal};
use crate::state::AppState;

/// Usage sink writing one durable row per LLM call, with cost estimated
/// from the per-model pricing config.
struct StoreUsageSink {
    store: Arc<Store>,
    pricing: HashMap<String, ModelPricing>,
}

impl UsageSink for StoreUsageSink {
    fn record(&self, event: UsageEvent) {
        let cost_usd = self
            .pricing
            .get(&event.model)
            .map(|p| p.estimate_cost(&event.usage))
            .unwrap_or(0.0);
        let record = UsageRecord {
            job_id: event.job_id,
            model: event.model,
            provider: event.provider,
            prompt_tokens: event.usage.prompt_tokens,
            completion_tokens: event.usage.completion_tokens,
            cost_usd,
            component: event.component.as_str().to_string(),
            at: chrono::Utc::now(),
        };
        if let Err(e) = self.store.append_usage(&record) {
            tracing::warn!(error = %e, "usage record append failed");
        }
    }
}

/// Assemble the application state from its parts. Tests pass an
/// in-memory store and a mock provider registry.
pub fn build_state(
    config: Config,
    store: Store,
    mut llm: ProviderRegistry,
) -> anyhow::Result<AppState> {
    let store = Arc::new(store);

    let workspace_root = Path::new(&config.paths.workspace_dir).to_path_buf();
    std::fs::create_dir_all(&workspace_root)
        .with_context(|| format!("creating workspace at {}", workspace_root.display()))?;

    llm.set_usage_sink(Arc::new(StoreUsageSink {
        store: store.clone(),
        pricing: config.llm.pricing.clone(),
    }));

    let denied = RegexSet::new(&config.tools.denied_commands)
        .context("compiling tools.denied_commands")?;
    let tools = ToolRegistry::new(std::time::Duration::from_secs(config.tools.timeout_seconds));
    minder_tools::builtin::register_builtins(&tools, Arc::new(denied));
    register_internal_tools(&tools);

    Ok(AppState {
        config: Arc::new(config),
        activities: Arc::new(ActivityHub::new(store.clone())),
        store,
        llm: Arc::new(llm),
        tools: Arc::new(tools),
        catalog: Arc::new(CapabilityCatalog::new()),
        cancel_map: Arc::new(CancelMap::new()),
        gate: Arc::new(QuestionGate::new()),
        queue: Arc::new(QueueSignal::new()),
        scheduler: Arc::new(SchedulerSignal::new()),
        workspace_root,
    })
}

/// Open everything from the config paths (the production path).
pub fn build_from_config(config: Config) -> anyhow::Result<AppState> {
    let store = Store::open(Path::new(&config.paths.db_path))
        .with_context(|| format!("opening database at {}", config.paths.db_path))?;
    let llm = ProviderRegistry::from_config(&config.llm).context("building LLM providers")?;
    build_state(config, store, llm)
}

/// Startup recovery: orphaned `running` jobs revert to `pending`;
/// suspended jobs are surfaced so operators can see them (their gates are
/// re-armed when a response arrives). Missed schedule fires are dropped.
pub fn recover(state: &AppState) -> anyhow::Result<()> {
    let reverted = state.store.recover_orphaned_running()?;
    if !reverted.is_empty() {
        tracing::info!(count = reverted.len(), "requeued orphaned running jobs");
    }

    for status in [JobStatus::WaitingForInput, JobStatus::OauthPending] {
        for job in state.store.jobs_in_status(status)? {
            tracing::info!(
                job_id = %job.id,
                status = status.as_str(),
                "suspended job preserved across restart; awaiting response"
            );
        }
    }

    let skipped = scheduler::reconcile_missed(state, chrono::Utc::now());
    if skipped > 0 {
        tracing::info!(skipped, "dropped schedule fires missed while offline");
    }

    state.queue.wake();
    Ok(())
}

/// Spawn the worker pool and the scheduler.
pub fn start_background(state: &AppState) -> (WorkerHandles, tokio::task::JoinHandle<()>) {
    let workers = queue::spawn_workers(state.clone());
    let sched = scheduler::spawn_scheduler(state.clone());
    (workers, sched)
}
