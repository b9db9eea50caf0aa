//! The per-call bridge from tool handlers back into the runtime, plus the
//! agent-facing tools built on it (`ask_user`, `delegate`, `explore`,
//! `schedule`, `oauth_required`).

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use minder_domain::cancel::CancelToken;
use minder_domain::tool::{ToolDefinition, ToolError, ToolErrorKind};
use minder_store::{ActivityKind, MessageRole, NewActivity, NewMessage, PendingKind, ScheduleRecord};
use minder_tools::{HostBridge, ToolContext, ToolHandler};

use crate::state::AppState;

use super::cron::{cron_next_tz, parse_tz, validate_cron};
use super::delegate::{run_sub_agent, SubAgentSpec};
use super::gate::GateSignal;
use super::truncate_str;

/// Bridge bound to one job and one tool-call id. The agent loop builds a
/// fresh one per dispatched call so suspending tools can record which
/// call they suspended on.
pub struct JobBridge {
    pub state: AppState,
    pub job_id: String,
    pub conversation_id: String,
    pub call_id: String,
    pub cancel: CancelToken,
}

impl JobBridge {
    pub fn context(self: Arc<Self>) -> ToolContext {
        ToolContext {
            job_id: self.job_id.clone(),
            conversation_id: self.conversation_id.clone(),
            cancel: self.cancel.clone(),
            workspace_root: self.state.workspace_root.clone(),
            bridge: self,
        }
    }

    /// Shared suspend-and-wait path for `ask_user` and `oauth_required`.
    async fn suspend_on_gate(
        &self,
        kind: PendingKind,
        message: NewMessage,
        payload: Value,
        waiting_activity: &str,
    ) -> Result<String, ToolError> {
        let state = &self.state;

        // Arm before the status flips so a response can never race past
        // an unarmed gate.
        let rx = state.gate.arm(&self.job_id);

        if let Err(e) =
            state
                .store
                .append_message(&self.conversation_id, MessageRole::Assistant, message)
        {
            state.gate.disarm(&self.job_id);
            return Err(ToolError::fatal(format!("persisting question: {e}")));
        }

        if let Err(e) = state
            .store
            .suspend_job(&self.job_id, kind, &self.call_id, &payload)
        {
            state.gate.disarm(&self.job_id);
            // A second suspending call in the same step finds the job
            // already waiting.
            return Err(match e {
                minder_store::StoreError::IllegalTransition { .. } => {
                    ToolError::invalid_args("a question is already pending for this job")
                }
                other => ToolError::fatal(format!("suspending job: {other}")),
            });
        }

        state.activities.record(
            &self.job_id,
            NewActivity::new(ActivityKind::Step, waiting_activity).detail(payload),
        );

        match rx.await {
            Ok(GateSignal::Response(text)) => Ok(text),
            Ok(GateSignal::Cancelled) => {
                Err(ToolError::external("cancelled while waiting for input"))
            }
            Err(_) => Err(ToolError::external("question gate dropped")),
        }
    }
}

#[async_trait::async_trait]
impl HostBridge for JobBridge {
    fn append_activity(&self, message: &str, detail: Option<Value>) {
        let mut activity = NewActivity::new(ActivityKind::Step, message);
        activity.detail = detail;
        self.state.activities.record(&self.job_id, activity);
    }

    async fn ask_user(
        &self,
        question: &str,
        options: Vec<String>,
    ) -> Result<String, ToolError> {
        let payload = serde_json::json!({
            "kind": "question",
            "question": question,
            "options": options,
        });
        let message = NewMessage {
            content: question.to_string(),
            metadata: Some(payload.clone()),
            ..Default::default()
        };
        self.suspend_on_gate(
            PendingKind::Question,
            message,
            payload,
            "waiting for user input",
        )
        .await
    }

    async fn delegate(
        &self,
        task: &str,
        allowed_tools: Option<Vec<String>>,
        max_steps: Option<u32>,
        explore: bool,
    ) -> Result<Value, ToolError> {
        let state = &self.state;
        let cfg = &state.config.delegate;

        let used = state
            .store
            .successful_delegate_count(&self.conversation_id)
            .map_err(|e| ToolError::fatal(e.to_string()))?;
        if used >= cfg.quota_per_conversation {
            return Err(ToolError::new(
                ToolErrorKind::QuotaExceeded,
                format!(
                    "delegate quota exhausted: {used}/{} for this conversation",
                    cfg.quota_per_conversation
                ),
            ));
        }

        let mode = if explore { "explore" } else { "delegate" };
        state.activities.record(
            &self.job_id,
            NewActivity::new(ActivityKind::DelegateStart, format!("{mode}: {}", truncate_str(task, 120)))
                .detail(serde_json::json!({ "mode": mode })),
        );
        // Give sibling delegates from the same step a chance to record
        // their start before any of them runs to completion.
        tokio::task::yield_now().await;

        let mut spec = if explore {
            SubAgentSpec::explore(task, cfg)
        } else {
            SubAgentSpec::delegate(task, cfg)
        };
        spec.allowed_tools = allowed_tools;
        if let Some(steps) = max_steps {
            spec.max_steps = steps.min(spec.max_steps);
        }

        let result = run_sub_agent(
            &state.llm,
            &state.tools,
            &state.activities,
            &state.workspace_root,
            &self.job_id,
            &self.conversation_id,
            self.cancel.clone(),
            spec,
        )
        .await;

        match &result {
            Ok(value) => {
                state.activities.record(
                    &self.job_id,
                    NewActivity::new(ActivityKind::DelegateEnd, format!("{mode} finished"))
                        .detail(serde_json::json!({
                            "mode": mode,
                            "summary": truncate_str(
                                value["summary"].as_str().unwrap_or_default(),
                                200
                            ),
                        })),
                );
            }
            Err(e) => {
                state.activities.record(
                    &self.job_id,
                    NewActivity::new(ActivityKind::DelegateEnd, format!("{mode} failed: {}", e.message))
                        .detail(serde_json::json!({ "mode": mode }))
                        .error(),
                );
            }
        }
        result
    }

    async fn schedule(
        &self,
        name: &str,
        prompt: &str,
        cron: &str,
        timezone: Option<String>,
    ) -> Result<String, ToolError> {
        let state = &self.state;
        validate_cron(cron).map_err(ToolError::invalid_args)?;

        let tz_name = timezone.unwrap_or_else(|| state.config.timezone.clone());
        let tz = parse_tz(&tz_name);
        let now = Utc::now();
        let next_fire_at = cron_next_tz(cron, &now, tz);

        let record = ScheduleRecord {
            id: Uuid::new_v4().to_string(),
            conversation_id: Some(self.conversation_id.clone()),
            name: name.to_string(),
            prompt: prompt.to_string(),
            cron: cron.to_string(),
            timezone: tz_name,
            enabled: true,
            next_fire_at,
            run_count: 0,
            source_conversation_id: Some(self.conversation_id.clone()),
            context: None,
            created_at: now,
            updated_at: now,
        };
        state
            .store
            .upsert_schedule(&record)
            .map_err(|e| ToolError::fatal(e.to_string()))?;
        state.scheduler.notify();

        self.append_activity(
            &format!("registered schedule '{name}'"),
            Some(serde_json::json!({ "schedule_id": record.id, "cron": cron })),
        );
        Ok(record.id)
    }

    async fn oauth_required(
        &self,
        provider: &str,
        auth_url: &str,
    ) -> Result<String, ToolError> {
        let payload = serde_json::json!({
            "kind": "oauth",
            "provider": provider,
            "auth_url": auth_url,
        });
        let message = NewMessage {
            content: format!("Authorization required for {provider}: {auth_url}"),
            metadata: Some(payload.clone()),
            ..Default::default()
        };
        self.suspend_on_gate(
            PendingKind::Oauth,
            message,
            payload,
            "waiting for oauth authorization",
        )
        .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent-facing tools built on the bridge
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AskUserTool;

#[async_trait::async_trait]
impl ToolHandler for AskUserTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "ask_user".into(),
            description: "Ask the user a question and wait for their answer. \
                          Use sparingly; the user may take a long time to reply."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "question": { "type": "string" },
                    "options": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Optional multiple-choice answers"
                    }
                },
                "required": ["question"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let question = args["question"].as_str().unwrap_or_default();
        let options = args["options"]
            .as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();
        let answer = ctx.bridge.ask_user(question, options).await?;
        Ok(Value::String(answer))
    }
}

pub struct DelegateTool;

#[async_trait::async_trait]
impl ToolHandler for DelegateTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "delegate".into(),
            description: "Run a sub-agent on a self-contained task. Several \
                          delegate calls in one reply run in parallel."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "task": { "type": "string", "description": "Complete task description" },
                    "allowed_tools": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Restrict the sub-agent to these tools"
                    },
                    "max_steps": { "type": "integer" }
                },
                "required": ["task"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let task = args["task"].as_str().unwrap_or_default();
        let allowed = args["allowed_tools"].as_array().map(|a| {
            a.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        });
        let max_steps = args["max_steps"].as_u64().map(|n| n as u32);
        ctx.bridge.delegate(task, allowed, max_steps, false).await
    }
}

pub struct ExploreTool;

#[async_trait::async_trait]
impl ToolHandler for ExploreTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "explore".into(),
            description: "Run a read-only sub-agent to inspect files or data \
                          and report back. Cannot modify anything."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "task": { "type": "string" },
                    "max_steps": { "type": "integer" }
                },
                "required": ["task"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let task = args["task"].as_str().unwrap_or_default();
        let max_steps = args["max_steps"].as_u64().map(|n| n as u32);
        ctx.bridge.delegate(task, None, max_steps, true).await
    }
}

pub struct ScheduleTool;

#[async_trait::async_trait]
impl ToolHandler for ScheduleTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "schedule".into(),
            description: "Register a recurring task. Each fire starts a fresh \
                          conversation with the given prompt."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "prompt": { "type": "string", "description": "Prompt submitted on each fire" },
                    "cron": { "type": "string", "description": "5-field cron expression" },
                    "timezone": { "type": "string", "description": "IANA timezone (default: host timezone)" }
                },
                "required": ["name", "prompt", "cron"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let schedule_id = ctx
            .bridge
            .schedule(
                args["name"].as_str().unwrap_or_default(),
                args["prompt"].as_str().unwrap_or_default(),
                args["cron"].as_str().unwrap_or_default(),
                args["timezone"].as_str().map(String::from),
            )
            .await?;
        Ok(serde_json::json!({ "schedule_id": schedule_id }))
    }
}

pub struct OauthRequiredTool;

#[async_trait::async_trait]
impl ToolHandler for OauthRequiredTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "oauth_required".into(),
            description: "Pause until the user completes an OAuth authorization \
                          at the given URL."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "provider": { "type": "string" },
                    "auth_url": { "type": "string" }
                },
                "required": ["provider", "auth_url"]
            }),
        }
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let confirmation = ctx
            .bridge
            .oauth_required(
                args["provider"].as_str().unwrap_or_default(),
                args["auth_url"].as_str().unwrap_or_default(),
            )
            .await?;
        Ok(Value::String(confirmation))
    }
}

/// Register the agent-facing tools into the main registry.
pub fn register_internal_tools(registry: &minder_tools::ToolRegistry) {
    registry.register(Arc::new(AskUserTool));
    registry.register(Arc::new(DelegateTool));
    registry.register(Arc::new(ExploreTool));
    registry.register(Arc::new(ScheduleTool));
    registry.register(Arc::new(OauthRequiredTool));
}
