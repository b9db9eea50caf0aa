//! Row types shared by the store and the runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub(crate) fn now_str() -> String {
    Utc::now().to_rfc3339()
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forked_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_number: Option<i64>,
    pub is_archived: bool,
    /// Set when the conversation was created by a schedule fire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_id: Option<String>,
    pub is_scheduler_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Highest message seq covered by `summary`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_up_to_seq: Option<i64>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
    /// Hidden from clients, kept in LLM context (nudges, directives).
    Internal,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
            Self::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "tool" => Some(Self::Tool),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }

    /// Roles counted when checking the summary-boundary invariant.
    pub fn is_user_visible_dialogue(self) -> bool {
        matches!(self, Self::User | Self::Assistant)
    }
}

/// A persisted conversation message. `seq` is the stable per-conversation
/// integer id; ordering by `seq` is insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub conversation_id: String,
    pub seq: i64,
    pub role: MessageRole,
    pub content: String,
    /// Tool calls issued by this assistant message, in model order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    /// For tool messages: the id of the call this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Structured extras: question options, suggestions, attachments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Hidden from clients but included in LLM context.
    pub internal: bool,
    pub created_at: DateTime<Utc>,
}

/// Insert shape for a message.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub content: String,
    pub tool_calls: Option<Value>,
    pub tool_call_id: Option<String>,
    pub thinking: Option<String>,
    pub metadata: Option<Value>,
    pub internal: bool,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Jobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    WaitingForInput,
    OauthPending,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingForInput => "waiting_for_input",
            Self::OauthPending => "oauth_pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "waiting_for_input" => Some(Self::WaitingForInput),
            "oauth_pending" => Some(Self::OauthPending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// The job state machine. `Pending` re-entry from a suspended state
    /// is the explicit restart-resume path (the worker loop picks the job
    /// back up from persisted state), and `Running -> Pending` is crash
    /// recovery.
    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Running)
                | (Running, WaitingForInput)
                | (Running, OauthPending)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Pending)
                | (WaitingForInput, Running)
                | (WaitingForInput, Pending)
                | (WaitingForInput, Cancelled)
                | (OauthPending, Running)
                | (OauthPending, Pending)
                | (OauthPending, Cancelled)
        )
    }
}

/// What a suspended job is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingKind {
    Question,
    Oauth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub conversation_id: String,
    pub user_message: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub cancel_requested: bool,
    /// Tool-call id of the suspended `ask_user` / `oauth_required` call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_call_id: Option<String>,
    /// Question text + options, or OAuth url + provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_payload: Option<Value>,
    /// For scheduler-enqueued jobs: the intended fire instant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_time: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Activities
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Start,
    Routing,
    Step,
    LlmCall,
    ToolCall,
    DelegateStart,
    DelegateEnd,
    ExploreStep,
    Nudge,
    Error,
    Complete,
    Cancelled,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Routing => "routing",
            Self::Step => "step",
            Self::LlmCall => "llm_call",
            Self::ToolCall => "tool_call",
            Self::DelegateStart => "delegate_start",
            Self::DelegateEnd => "delegate_end",
            Self::ExploreStep => "explore_step",
            Self::Nudge => "nudge",
            Self::Error => "error",
            Self::Complete => "complete",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "start" => Some(Self::Start),
            "routing" => Some(Self::Routing),
            "step" => Some(Self::Step),
            "llm_call" => Some(Self::LlmCall),
            "tool_call" => Some(Self::ToolCall),
            "delegate_start" => Some(Self::DelegateStart),
            "delegate_end" => Some(Self::DelegateEnd),
            "explore_step" => Some(Self::ExploreStep),
            "nudge" => Some(Self::Nudge),
            "error" => Some(Self::Error),
            "complete" => Some(Self::Complete),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// One append-only record in a job's activity log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub job_id: String,
    /// Strictly increasing per job, starting at 1.
    pub seq: i64,
    pub at: DateTime<Utc>,
    pub kind: ActivityKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    pub is_error: bool,
}

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub kind: ActivityKind,
    pub message: String,
    pub detail: Option<Value>,
    pub tool_name: Option<String>,
    pub is_error: bool,
}

impl NewActivity {
    pub fn new(kind: ActivityKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            tool_name: None,
            is_error: false,
        }
    }

    pub fn detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    pub fn tool(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    pub fn error(mut self) -> Self {
        self.is_error = true;
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schedules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRecord {
    pub id: String,
    /// Conversation that owns the schedule (where it was created).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub name: String,
    pub prompt: String,
    pub cron: String,
    pub timezone: String,
    pub enabled: bool,
    /// Earliest instant ≥ now matching the cron when enabled; null when
    /// disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_fire_at: Option<DateTime<Utc>>,
    pub run_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_conversation_id: Option<String>,
    /// Captured context prepended to the prompt on each fire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub job_id: Option<String>,
    pub model: String,
    pub provider: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub cost_usd: f64,
    pub component: String,
    pub at: DateTime<Utc>,
}
