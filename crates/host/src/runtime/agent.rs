//! The agent control loop: per step — cancellation and budget checks,
//! capability routing, context assembly, one model call, tool dispatch —
//! until the model answers without tool calls or a budget/terminal event
//! ends the job.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::Instrument;

use minder_domain::cancel::CancelToken;
use minder_domain::tool::{ToolCall, ToolErrorKind};
use minder_domain::usage::UsageComponent;
use minder_providers::{ChatRequest, ChatResponse, LlmError, ModelTier};
use minder_store::{ActivityKind, Job, JobStatus, MessageRole, NewActivity, NewMessage};
use minder_tools::ToolRegistry;

use crate::state::AppState;

use super::bridge::JobBridge;
use super::context::{build_snapshot, ContextError};
use super::detector::LoopDetector;
use super::router::route_step;
use super::{truncate_str, BASE_SYSTEM_PROMPT};

const AGGRESSIVE_KEEP_RECENT: usize = 2;
const EXTERNAL_RETRY_BACKOFF: Duration = Duration::from_secs(1);
const RATE_LIMIT_FALLBACK_WAIT: Duration = Duration::from_secs(2);

/// Drive one job to a terminal state. The job is already `running` and
/// owned by `worker_id`.
pub async fn run_job(state: AppState, job: Job, worker_id: &str) {
    let span = tracing::info_span!("job", job_id = %job.id, worker_id);
    let worker_id = worker_id.to_string();

    async move {
        let cancel = state.cancel_map.register(&job.id);

        if job.pending_call_id.is_some() {
            if let Err(e) = resume_pending_call(&state, &job).await {
                finalize_failed(&state, &job, &format!("resume failed: {e}")).await;
                return;
            }
        } else {
            state.activities.record(
                &job.id,
                NewActivity::new(ActivityKind::Start, "job started")
                    .detail(serde_json::json!({ "worker_id": worker_id })),
            );
        }

        run_steps(&state, &job, cancel).await;
    }
    .instrument(span)
    .await
}

/// On restart-resume the blocked `ask_user` stack frame is gone; the
/// response was persisted as a user message by the respond path, so the
/// pending tool result is rebuilt from it here before re-entering the
/// loop.
async fn resume_pending_call(state: &AppState, job: &Job) -> Result<(), minder_store::StoreError> {
    let call_id = job.pending_call_id.clone().unwrap_or_default();
    let response = state
        .store
        .latest_message_with_role(&job.conversation_id, MessageRole::User)?
        .map(|m| m.content)
        .unwrap_or_default();

    state.store.append_message(
        &job.conversation_id,
        MessageRole::Tool,
        NewMessage {
            content: response,
            tool_call_id: Some(call_id),
            ..Default::default()
        },
    )?;
    state.store.clear_pending(&job.id)?;

    state.activities.record(
        &job.id,
        NewActivity::new(ActivityKind::Step, "resumed after user input"),
    );
    Ok(())
}

async fn run_steps(state: &AppState, job: &Job, cancel: CancelToken) {
    let cfg = &state.config;
    let mut detector = LoopDetector::new(cfg.detector.clone());
    let mut pending_nudge: Option<String> = None;
    let mut steps_since_routing = cfg.router.stride;
    let mut aggressive_context = false;
    let started = job.started_at.unwrap_or_else(Utc::now);

    for step in 1..=cfg.agent.max_steps {
        // ── 1. Cancellation ───────────────────────────────────────
        let flagged = state.store.cancel_requested(&job.id).unwrap_or(false);
        if cancel.is_cancelled() || flagged {
            finalize_cancelled(state, job).await;
            return;
        }

        // ── 2. Wall-clock budget ──────────────────────────────────
        let elapsed = (Utc::now() - started).num_seconds().max(0) as u64;
        if elapsed > cfg.agent.max_wall_seconds {
            finalize_failed(
                state,
                job,
                &format!("exhausted: wall clock budget ({elapsed}s)"),
            )
            .await;
            return;
        }

        // ── 3. Capability routing ─────────────────────────────────
        let routing = route_step(
            &state.store,
            &state.llm,
            &state.catalog,
            &cfg.router,
            &job.conversation_id,
            &job.id,
            steps_since_routing,
        )
        .await;
        if let Some(decision) = &routing.decision {
            steps_since_routing = 0;
            state.activities.record(
                &job.id,
                NewActivity::new(ActivityKind::Routing, "capability routing")
                    .detail(serde_json::json!({
                        "keep": decision.keep,
                        "add": decision.add,
                        "drop": decision.drop,
                        "active": routing.active.names().collect::<Vec<_>>(),
                    })),
            );
        } else {
            steps_since_routing += 1;
        }

        // ── 4. System prompt + effective tool set ─────────────────
        let mut system_prompt = BASE_SYSTEM_PROMPT.to_string();
        let mut extra_handlers = Vec::new();
        for name in routing.active.names() {
            if let Some(entry) = state.catalog.get(name) {
                system_prompt.push_str("\n\n## Capability: ");
                system_prompt.push_str(&entry.def.name);
                system_prompt.push('\n');
                system_prompt.push_str(&entry.def.instructions);
                extra_handlers.extend(entry.handlers.clone());
            }
        }
        let merged;
        let registry: &ToolRegistry = if extra_handlers.is_empty() {
            &state.tools
        } else {
            merged = state.tools.merged(&extra_handlers);
            &merged
        };
        let tool_defs = registry.definitions();

        // ── 5. Detector nudge from the previous step ──────────────
        if let Some(directive) = pending_nudge.take() {
            // Only claim the injection once the directive is durably in
            // the transcript; if the write fails the detector will
            // signal again on the next qualifying step.
            match state.store.append_message(
                &job.conversation_id,
                MessageRole::Internal,
                NewMessage::text(&directive),
            ) {
                Ok(_) => {
                    state.activities.record(
                        &job.id,
                        NewActivity::new(ActivityKind::Nudge, "progress nudge injected")
                            .detail(serde_json::json!({ "directive": directive })),
                    );
                }
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "persisting nudge failed");
                }
            }
        }

        // ── 6. Context snapshot ───────────────────────────────────
        let keep_recent = if aggressive_context {
            AGGRESSIVE_KEEP_RECENT
        } else {
            cfg.context.keep_recent
        };
        let snapshot = match build_snapshot(
            &state.store,
            &state.llm,
            &cfg.context,
            &job.conversation_id,
            &job.id,
            &system_prompt,
            &tool_defs,
            keep_recent,
            aggressive_context,
        )
        .await
        {
            Ok(snapshot) => snapshot,
            Err(ContextError::Overflow { estimated, budget }) => {
                if aggressive_context {
                    finalize_failed(
                        state,
                        job,
                        &format!("context overflow: {estimated} tokens over {budget}"),
                    )
                    .await;
                    return;
                }
                aggressive_context = true;
                if let Err(e) = state.store.append_message(
                    &job.conversation_id,
                    MessageRole::Internal,
                    NewMessage::text(
                        "Context window exceeded; older history will be aggressively summarized.",
                    ),
                ) {
                    finalize_failed(state, job, &format!("persisting compaction note: {e}"))
                        .await;
                    return;
                }
                state.activities.record(
                    &job.id,
                    NewActivity::new(ActivityKind::Error, "context overflow, compacting")
                        .error(),
                );
                continue;
            }
            Err(e) => {
                finalize_failed(state, job, &format!("context assembly failed: {e}")).await;
                return;
            }
        };

        // ── 7. Model call ─────────────────────────────────────────
        let req = ChatRequest {
            messages: snapshot.messages,
            tools: tool_defs,
            cancel: Some(cancel.clone()),
            ..Default::default()
        };
        let resp = match complete_with_retry(state, &job.id, req).await {
            Ok(resp) => resp,
            Err(LlmError::Cancelled) => {
                finalize_cancelled(state, job).await;
                return;
            }
            Err(LlmError::ContextOverflow(detail)) => {
                if aggressive_context {
                    finalize_failed(state, job, &format!("context overflow: {detail}")).await;
                    return;
                }
                aggressive_context = true;
                state.activities.record(
                    &job.id,
                    NewActivity::new(ActivityKind::Error, "provider context overflow, compacting")
                        .error(),
                );
                continue;
            }
            Err(e) => {
                finalize_failed(state, job, &format!("model call failed: {e}")).await;
                return;
            }
        };

        state.activities.record(
            &job.id,
            NewActivity::new(ActivityKind::LlmCall, format!("model call ({})", resp.model))
                .detail(serde_json::json!({
                    "step": step,
                    "model": resp.model,
                    "prompt_tokens": resp.usage.prompt_tokens,
                    "completion_tokens": resp.usage.completion_tokens,
                    "estimated_context_tokens": snapshot.estimated_tokens,
                })),
        );

        // ── 8. Final answer? ──────────────────────────────────────
        if resp.tool_calls.is_empty() {
            finalize_completed(state, job, &resp).await;
            return;
        }

        // ── 9. Tool dispatch ──────────────────────────────────────
        let mut calls = resp.tool_calls.clone();
        if calls.len() > cfg.agent.max_tool_calls_per_step {
            state.activities.record(
                &job.id,
                NewActivity::new(
                    ActivityKind::Error,
                    format!(
                        "truncated {} tool calls to the per-step limit of {}",
                        calls.len(),
                        cfg.agent.max_tool_calls_per_step
                    ),
                )
                .error(),
            );
            calls.truncate(cfg.agent.max_tool_calls_per_step);
        }

        let persisted = state.store.append_message(
            &job.conversation_id,
            MessageRole::Assistant,
            NewMessage {
                content: resp.content.clone(),
                tool_calls: serde_json::to_value(&calls).ok(),
                thinking: resp.thinking.clone(),
                ..Default::default()
            },
        );
        if let Err(e) = persisted {
            finalize_failed(state, job, &format!("persisting assistant message: {e}")).await;
            return;
        }

        pending_nudge = detector.observe(&resp.content, &calls);

        let outcomes = dispatch_calls(state, job, &cancel, registry, &calls).await;

        let mut fatal: Option<String> = None;
        for (call, outcome) in calls.iter().zip(outcomes) {
            let is_error = outcome.is_error();
            let persisted = state.store.append_message(
                &job.conversation_id,
                MessageRole::Tool,
                NewMessage {
                    content: outcome.render(),
                    tool_call_id: Some(call.id.clone()),
                    metadata: Some(serde_json::json!({ "is_error": is_error })),
                    ..Default::default()
                },
            );
            if let Err(e) = persisted {
                fatal = Some(format!("persisting tool result: {e}"));
                break;
            }

            state.activities.record(
                &job.id,
                {
                    let mut activity = NewActivity::new(
                        ActivityKind::ToolCall,
                        format!("tool {}", call.name),
                    )
                    .tool(&call.name)
                    .detail(serde_json::json!({
                        "call_id": call.id,
                        "result": truncate_str(&outcome.render(), 200),
                    }));
                    if is_error {
                        activity = activity.error();
                    }
                    activity
                },
            );

            if matches!(call.name.as_str(), "ask_user" | "oauth_required") && !is_error {
                // A stale pending marker would make a later restart
                // synthesize a duplicate tool result.
                if let Err(e) = state.store.clear_pending(&job.id) {
                    fatal = Some(format!("clearing pending call: {e}"));
                    break;
                }
            }

            if outcome.error_kind() == Some(ToolErrorKind::Fatal) {
                let message = match &outcome {
                    minder_domain::tool::ToolOutcome::Error { error } => error.message.clone(),
                    _ => String::new(),
                };
                fatal = Some(format!("tool {} failed fatally: {message}", call.name));
            }
        }

        if let Some(cause) = fatal {
            finalize_failed(state, job, &cause).await;
            return;
        }
    }

    finalize_failed(
        state,
        job,
        &format!("exhausted: step budget ({} steps)", cfg.agent.max_steps),
    )
    .await;
}

/// Dispatch the step's tool calls concurrently, preserving call order in
/// the collected outcomes (delegates may complete in any order).
async fn dispatch_calls(
    state: &AppState,
    job: &Job,
    cancel: &CancelToken,
    registry: &ToolRegistry,
    calls: &[ToolCall],
) -> Vec<minder_domain::tool::ToolOutcome> {
    let futures: Vec<_> = calls
        .iter()
        .map(|call| {
            let bridge = Arc::new(JobBridge {
                state: state.clone(),
                job_id: job.id.clone(),
                conversation_id: job.conversation_id.clone(),
                call_id: call.id.clone(),
                cancel: cancel.clone(),
            });
            let ctx = bridge.context();
            async move { registry.invoke(&call.name, &call.arguments, &ctx).await }
        })
        .collect();
    futures_util::future::join_all(futures).await
}

/// One retry on transient provider failures; rate limits wait the hinted
/// interval. Everything else is the caller's problem.
async fn complete_with_retry(
    state: &AppState,
    job_id: &str,
    req: ChatRequest,
) -> Result<ChatResponse, LlmError> {
    let first = state
        .llm
        .complete(ModelTier::Main, req.clone(), UsageComponent::Agent, Some(job_id))
        .await;

    let wait = match &first {
        Err(LlmError::Provider { provider, message }) => {
            tracing::warn!(provider, message, "model call failed, retrying once");
            EXTERNAL_RETRY_BACKOFF
        }
        Err(LlmError::RateLimited { retry_after }) => {
            retry_after.unwrap_or(RATE_LIMIT_FALLBACK_WAIT)
        }
        _ => return first,
    };

    tokio::time::sleep(wait).await;
    state
        .llm
        .complete(ModelTier::Main, req, UsageComponent::Agent, Some(job_id))
        .await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Finalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn finalize_completed(state: &AppState, job: &Job, resp: &ChatResponse) {
    // The job is only `completed` once its final message is durable.
    if let Err(e) = state.store.append_message(
        &job.conversation_id,
        MessageRole::Assistant,
        NewMessage {
            content: resp.content.clone(),
            thinking: resp.thinking.clone(),
            ..Default::default()
        },
    ) {
        finalize_failed(state, job, &format!("persisting final message: {e}")).await;
        return;
    }
    state.activities.record(
        &job.id,
        NewActivity::new(ActivityKind::Complete, "job completed")
            .detail(serde_json::json!({ "result": truncate_str(&resp.content, 200) })),
    );
    if let Err(e) = state
        .store
        .finish_job(&job.id, JobStatus::Completed, Some(&resp.content), None)
    {
        tracing::error!(job_id = %job.id, error = %e, "failed to finalize completed job");
    }
    release(state, &job.id);
}

async fn finalize_failed(state: &AppState, job: &Job, cause: &str) {
    tracing::warn!(job_id = %job.id, cause, "job failed");
    let user_note = format!("The task could not be completed: {}", truncate_str(cause, 300));
    // The job must still reach `failed` even when the explanatory note
    // cannot be written.
    if let Err(e) = state.store.append_message(
        &job.conversation_id,
        MessageRole::Assistant,
        NewMessage::text(&user_note),
    ) {
        tracing::error!(job_id = %job.id, error = %e, "persisting failure note failed");
    }
    state.activities.record(
        &job.id,
        NewActivity::new(ActivityKind::Error, cause.to_string()).error(),
    );
    if let Err(e) = state
        .store
        .finish_job(&job.id, JobStatus::Failed, None, Some(cause))
    {
        tracing::error!(job_id = %job.id, error = %e, "failed to finalize failed job");
    }
    release(state, &job.id);
}

pub(crate) async fn finalize_cancelled(state: &AppState, job: &Job) {
    if let Err(e) = state.store.clear_pending(&job.id) {
        tracing::error!(job_id = %job.id, error = %e, "clearing pending call failed");
    }
    if let Err(e) = state.store.append_message(
        &job.conversation_id,
        MessageRole::Assistant,
        NewMessage::text("Stopped at your request."),
    ) {
        tracing::error!(job_id = %job.id, error = %e, "persisting cancellation note failed");
    }
    state.activities.record(
        &job.id,
        NewActivity::new(ActivityKind::Cancelled, "job cancelled"),
    );
    if let Err(e) = state
        .store
        .finish_job(&job.id, JobStatus::Cancelled, None, None)
    {
        tracing::error!(job_id = %job.id, error = %e, "failed to finalize cancelled job");
    }
    release(state, &job.id);
}

fn release(state: &AppState, job_id: &str) {
    state.cancel_map.remove(job_id);
    state.gate.disarm(job_id);
    state.activities.cleanup(job_id);
}
