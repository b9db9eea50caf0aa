//! Deterministic scripted client for the test suites.
//!
//! Push responses (or failures) onto the script; each `complete` call pops
//! the next entry and records the request it saw.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;

use minder_domain::tool::ToolCall;
use minder_domain::usage::TokenUsage;

use crate::traits::{ChatRequest, ChatResponse, LlmClient, LlmError, LlmResult};

enum Script {
    Respond(ChatResponse),
    RateLimited(Option<Duration>),
    Overflow,
    ProviderError(String),
    /// Block until the request's cancel token fires.
    Hang,
}

#[derive(Default)]
pub struct MockClient {
    script: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: Script) {
        self.script.lock().push_back(entry);
    }

    /// Queue a plain-text response.
    pub fn push_text(&self, text: &str) {
        self.push(Script::Respond(response(text, Vec::new())));
    }

    /// Queue a response carrying tool calls (plus optional text).
    pub fn push_tool_calls(&self, text: &str, calls: Vec<ToolCall>) {
        self.push(Script::Respond(response(text, calls)));
    }

    pub fn push_response(&self, resp: ChatResponse) {
        self.push(Script::Respond(resp));
    }

    pub fn push_rate_limited(&self, retry_after: Option<Duration>) {
        self.push(Script::RateLimited(retry_after));
    }

    pub fn push_overflow(&self) {
        self.push(Script::Overflow);
    }

    pub fn push_provider_error(&self, message: &str) {
        self.push(Script::ProviderError(message.into()));
    }

    /// Queue an entry that hangs until the request is cancelled.
    pub fn push_hang(&self) {
        self.push(Script::Hang);
    }

    /// Requests observed so far, in call order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

fn response(text: &str, tool_calls: Vec<ToolCall>) -> ChatResponse {
    ChatResponse {
        content: text.to_string(),
        thinking: None,
        tool_calls,
        usage: TokenUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
        },
        model: "mock-model".into(),
        finish_reason: Some("stop".into()),
    }
}

#[async_trait::async_trait]
impl LlmClient for MockClient {
    async fn complete(&self, req: &ChatRequest) -> LlmResult<ChatResponse> {
        self.requests.lock().push(req.clone());

        let entry = self.script.lock().pop_front();
        match entry {
            Some(Script::Respond(resp)) => Ok(resp),
            Some(Script::RateLimited(retry_after)) => Err(LlmError::RateLimited { retry_after }),
            Some(Script::Overflow) => Err(LlmError::ContextOverflow("scripted overflow".into())),
            Some(Script::ProviderError(message)) => Err(LlmError::Provider {
                provider: "mock".into(),
                message,
            }),
            Some(Script::Hang) => loop {
                if req
                    .cancel
                    .as_ref()
                    .map(|c| c.is_cancelled())
                    .unwrap_or(false)
                {
                    return Err(LlmError::Cancelled);
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            },
            None => Err(LlmError::Provider {
                provider: "mock".into(),
                message: "script exhausted".into(),
            }),
        }
    }

    fn provider_id(&self) -> &str {
        "mock"
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_pops_in_order() {
        let mock = MockClient::new();
        mock.push_text("first");
        mock.push_text("second");

        let req = ChatRequest::default();
        assert_eq!(mock.complete(&req).await.unwrap().content, "first");
        assert_eq!(mock.complete(&req).await.unwrap().content, "second");
        assert!(mock.complete(&req).await.is_err());
    }

    #[tokio::test]
    async fn requests_are_recorded() {
        let mock = MockClient::new();
        mock.push_text("ok");
        let req = ChatRequest {
            messages: vec![minder_domain::message::ChatMessage::user("hello")],
            ..Default::default()
        };
        mock.complete(&req).await.unwrap();
        let seen = mock.requests();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn hang_returns_cancelled_when_token_fires() {
        let mock = MockClient::new();
        mock.push_hang();

        let cancel = minder_domain::cancel::CancelToken::new();
        let req = ChatRequest {
            cancel: Some(cancel.clone()),
            ..Default::default()
        };

        let handle = tokio::spawn(async move { mock.complete(&req).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(LlmError::Cancelled)));
    }
}
