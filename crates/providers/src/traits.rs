use minder_domain::cancel::CancelToken;
use minder_domain::message::ChatMessage;
use minder_domain::tool::{ToolCall, ToolDefinition};
use minder_domain::usage::TokenUsage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalized failure kinds every adapter maps onto.
#[derive(thiserror::Error, Debug)]
pub enum LlmError {
    /// Transport or protocol failure at the provider.
    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    /// Provider throttling; `retry_after` is the hinted wait when given.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited {
        retry_after: Option<std::time::Duration>,
    },

    /// The request exceeds the provider's context capacity.
    #[error("context overflow: {0}")]
    ContextOverflow(String),

    /// The caller's cancellation handle fired mid-call.
    #[error("cancelled")]
    Cancelled,
}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Conversation messages; any leading system messages become the
    /// provider's system field where the wire format separates them.
    pub messages: Vec<ChatMessage>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature. `None` lets the provider choose.
    pub temperature: Option<f32>,
    /// Response token cap. `None` uses the adapter default.
    pub max_tokens: Option<u32>,
    /// Model override. `None` uses the adapter default.
    pub model: Option<String>,
    /// Cooperative cancellation; the call fails with
    /// [`LlmError::Cancelled`] when it fires.
    pub cancel: Option<CancelToken>,
}

/// A provider-agnostic chat completion response.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Assistant text.
    pub content: String,
    /// Optional reasoning/thinking block.
    pub thinking: Option<String>,
    /// Tool calls in the order the model emitted them.
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
    /// The model that actually produced the response.
    pub model: String,
    /// Provider-assigned finish reason (e.g. "stop", "tool_use").
    pub finish_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter implements.
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one completion request and wait for the full response.
    /// Tool-call ordering in the response matches the provider's output.
    async fn complete(&self, req: &ChatRequest) -> LlmResult<ChatResponse>;

    /// Stable identifier for this adapter instance (e.g. "anthropic").
    fn provider_id(&self) -> &str;

    /// Model used when the request does not override it.
    fn default_model(&self) -> &str;
}

/// Race a provider HTTP future against the request's cancel token.
pub(crate) async fn with_cancellation<F, T>(
    cancel: Option<&CancelToken>,
    fut: F,
) -> LlmResult<T>
where
    F: std::future::Future<Output = LlmResult<T>>,
{
    let Some(token) = cancel else { return fut.await };
    if token.is_cancelled() {
        return Err(LlmError::Cancelled);
    }
    let token = token.clone();
    let watcher = async move {
        loop {
            if token.is_cancelled() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    };
    tokio::select! {
        result = fut => result,
        _ = watcher => Err(LlmError::Cancelled),
    }
}
