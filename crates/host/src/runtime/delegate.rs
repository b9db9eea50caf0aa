//! Sub-agent execution for `delegate` and `explore`.
//!
//! A sub-agent runs on the cheap tier with a restricted tool set and its
//! own in-memory transcript; nothing it says is persisted to the parent
//! conversation. Its lifecycle and tool calls are accounted to the parent
//! job's activity log. Failures come back as structured tool errors and
//! never fail the parent.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use minder_domain::cancel::CancelToken;
use minder_domain::config::DelegateConfig;
use minder_domain::message::ChatMessage;
use minder_domain::tool::ToolError;
use minder_domain::usage::UsageComponent;
use minder_providers::{ChatRequest, ModelTier, ProviderRegistry};
use minder_store::{ActivityKind, NewActivity};
use minder_tools::{NoopBridge, ToolContext, ToolRegistry};

use super::activity::ActivityHub;
use super::truncate_str;

/// Tools a sub-agent can never see, whatever the caller asks for.
pub const FORBIDDEN_FOR_SUBAGENTS: &[&str] =
    &["delegate", "explore", "ask_user", "schedule", "oauth_required"];

const SUB_AGENT_PROMPT: &str = "\
You are a focused sub-agent working one delegated task. Use your tools,\n\
then reply with a concise summary of what you found or did. You cannot\n\
ask the user anything.";

pub struct SubAgentSpec {
    pub task: String,
    /// Optional narrowing of the tool set (always further restricted by
    /// the forbidden list, and by the read-only set for explore).
    pub allowed_tools: Option<Vec<String>>,
    pub max_steps: u32,
    pub explore: bool,
}

impl SubAgentSpec {
    pub fn delegate(task: &str, cfg: &DelegateConfig) -> Self {
        Self {
            task: task.to_string(),
            allowed_tools: None,
            max_steps: cfg.max_steps,
            explore: false,
        }
    }

    pub fn explore(task: &str, cfg: &DelegateConfig) -> Self {
        Self {
            task: task.to_string(),
            allowed_tools: None,
            max_steps: cfg.explore_max_steps,
            explore: true,
        }
    }
}

/// Build the restricted registry for one sub-agent.
pub fn restricted_registry(base: &ToolRegistry, spec: &SubAgentSpec) -> ToolRegistry {
    let mut allowed: Vec<String> = match (&spec.allowed_tools, spec.explore) {
        (_, true) => minder_tools::builtin::READ_ONLY_TOOLS
            .iter()
            .map(|s| s.to_string())
            .collect(),
        (Some(list), false) => list.clone(),
        (None, false) => base.names(),
    };
    allowed.retain(|name| !FORBIDDEN_FOR_SUBAGENTS.contains(&name.as_str()));
    base.restricted(&allowed)
}

/// Run one sub-agent to completion. Returns `{summary, steps}` on
/// success.
#[allow(clippy::too_many_arguments)]
pub async fn run_sub_agent(
    llm: &ProviderRegistry,
    tools: &ToolRegistry,
    hub: &ActivityHub,
    workspace_root: &Path,
    job_id: &str,
    conversation_id: &str,
    cancel: CancelToken,
    spec: SubAgentSpec,
) -> Result<Value, ToolError> {
    let registry = restricted_registry(tools, &spec);
    let ctx = ToolContext {
        job_id: job_id.to_string(),
        conversation_id: conversation_id.to_string(),
        cancel: cancel.clone(),
        workspace_root: workspace_root.to_path_buf(),
        bridge: Arc::new(NoopBridge),
    };

    let mut messages = vec![
        ChatMessage::system(SUB_AGENT_PROMPT),
        ChatMessage::user(&spec.task),
    ];

    for step in 0..spec.max_steps {
        if cancel.is_cancelled() {
            return Err(ToolError::external("cancelled"));
        }

        let req = ChatRequest {
            messages: messages.clone(),
            tools: registry.definitions(),
            cancel: Some(cancel.clone()),
            ..Default::default()
        };
        let resp = llm
            .complete(ModelTier::Cheap, req, UsageComponent::Delegate, Some(job_id))
            .await
            .map_err(|e| ToolError::external(format!("sub-agent model call failed: {e}")))?;

        if spec.explore {
            hub.record(
                job_id,
                NewActivity::new(
                    ActivityKind::ExploreStep,
                    format!("explore step {}", step + 1),
                )
                .detail(serde_json::json!({
                    "tool_calls": resp.tool_calls.len(),
                })),
            );
        }

        if resp.tool_calls.is_empty() {
            return Ok(serde_json::json!({
                "summary": resp.content,
                "steps": step + 1,
            }));
        }

        messages.push(ChatMessage::assistant_with_calls(
            &resp.content,
            &resp.tool_calls,
        ));

        for call in &resp.tool_calls {
            let outcome = registry.invoke(&call.name, &call.arguments, &ctx).await;
            hub.record(
                job_id,
                NewActivity::new(
                    ActivityKind::ToolCall,
                    format!("sub-agent tool {}", call.name),
                )
                .tool(&call.name)
                .detail(serde_json::json!({
                    "result": truncate_str(&outcome.render(), 200),
                })),
            );
            messages.push(ChatMessage::tool_result(
                &call.id,
                outcome.render(),
                outcome.is_error(),
            ));
        }
    }

    Err(ToolError::external(format!(
        "sub-agent exhausted its step budget ({} steps)",
        spec.max_steps
    )))
}
