//! Provider-agnostic LLM client.
//!
//! Adapters translate the normalized [`ChatRequest`]/[`ChatResponse`]
//! shapes into each provider's HTTP wire format and map provider failures
//! onto the normalized [`LlmError`] kinds. Retry policy lives with the
//! caller; adapters never retry on their own.

mod anthropic;
mod mock;
mod openai_compat;
mod registry;
mod traits;

pub use anthropic::AnthropicClient;
pub use mock::MockClient;
pub use openai_compat::OpenAiCompatClient;
pub use registry::{ModelTier, ProviderRegistry, UsageEvent, UsageSink};
pub use traits::{ChatRequest, ChatResponse, LlmClient, LlmError, LlmResult};
