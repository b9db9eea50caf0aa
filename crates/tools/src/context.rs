//! The immutable context threaded through every tool call. No ambient or
//! thread-local state: handlers receive everything they may touch.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use minder_domain::cancel::CancelToken;
use minder_domain::tool::ToolError;

/// Callbacks back into the runtime. Implemented per job by the host; the
/// built-in file/shell/fetch tools never use it, the agent-facing tools
/// (`ask_user`, `delegate`, `explore`, `schedule`) are built on it.
#[async_trait::async_trait]
pub trait HostBridge: Send + Sync {
    /// Append a progress record to the job's activity log.
    fn append_activity(&self, message: &str, detail: Option<Value>);

    /// Block until the user answers the question (the question gate).
    async fn ask_user(
        &self,
        question: &str,
        options: Vec<String>,
    ) -> Result<String, ToolError>;

    /// Run a bounded sub-agent and return its result summary.
    async fn delegate(
        &self,
        task: &str,
        allowed_tools: Option<Vec<String>>,
        max_steps: Option<u32>,
        explore: bool,
    ) -> Result<Value, ToolError>;

    /// Register a recurring schedule; returns its id.
    async fn schedule(
        &self,
        name: &str,
        prompt: &str,
        cron: &str,
        timezone: Option<String>,
    ) -> Result<String, ToolError>;

    /// Suspend on an OAuth grant; resumes when authorization completes.
    async fn oauth_required(
        &self,
        provider: &str,
        auth_url: &str,
    ) -> Result<String, ToolError>;
}

/// Bridge that rejects every runtime callback. Used by tests and by
/// delegate registries, where the suspending tools are never exposed.
pub struct NoopBridge;

#[async_trait::async_trait]
impl HostBridge for NoopBridge {
    fn append_activity(&self, _message: &str, _detail: Option<Value>) {}

    async fn ask_user(&self, _q: &str, _o: Vec<String>) -> Result<String, ToolError> {
        Err(ToolError::fatal("ask_user is not available here"))
    }

    async fn delegate(
        &self,
        _task: &str,
        _allowed: Option<Vec<String>>,
        _max_steps: Option<u32>,
        _explore: bool,
    ) -> Result<Value, ToolError> {
        Err(ToolError::fatal("delegate is not available here"))
    }

    async fn schedule(
        &self,
        _name: &str,
        _prompt: &str,
        _cron: &str,
        _tz: Option<String>,
    ) -> Result<String, ToolError> {
        Err(ToolError::fatal("schedule is not available here"))
    }

    async fn oauth_required(&self, _p: &str, _u: &str) -> Result<String, ToolError> {
        Err(ToolError::fatal("oauth_required is not available here"))
    }
}

/// Immutable per-invocation context.
#[derive(Clone)]
pub struct ToolContext {
    pub job_id: String,
    pub conversation_id: String,
    pub cancel: CancelToken,
    pub workspace_root: PathBuf,
    pub bridge: Arc<dyn HostBridge>,
}

impl ToolContext {
    /// Context for unit tests: temp workspace, no runtime callbacks.
    pub fn for_tests(workspace_root: PathBuf) -> Self {
        Self {
            job_id: "job-test".into(),
            conversation_id: "conv-test".into(),
            cancel: CancelToken::new(),
            workspace_root,
            bridge: Arc::new(NoopBridge),
        }
    }
}
