//! Tier registry — maps the `main` / `cheap` / `router` tiers to concrete
//! adapter + model pairs and emits one usage event per successful call.

use std::sync::Arc;

use minder_domain::config::LlmConfig;
use minder_domain::usage::{TokenUsage, UsageComponent};

use crate::anthropic::AnthropicClient;
use crate::openai_compat::OpenAiCompatClient;
use crate::traits::{ChatRequest, ChatResponse, LlmClient, LlmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Main,
    Cheap,
    Router,
}

/// One successful completion, for cost accounting.
#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub job_id: Option<String>,
    pub model: String,
    pub provider: String,
    pub usage: TokenUsage,
    pub component: UsageComponent,
}

/// Receiver for usage events; the host wires this to the store.
pub trait UsageSink: Send + Sync {
    fn record(&self, event: UsageEvent);
}

struct TierSlot {
    client: Arc<dyn LlmClient>,
    model: String,
}

pub struct ProviderRegistry {
    main: TierSlot,
    cheap: TierSlot,
    router: TierSlot,
    sink: Option<Arc<dyn UsageSink>>,
}

impl ProviderRegistry {
    /// Build adapters from `provider/model` tier specs. API keys come
    /// from the conventional environment variables
    /// (`ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, `<PROVIDER>_API_KEY`).
    pub fn from_config(cfg: &LlmConfig) -> minder_domain::Result<Self> {
        Ok(Self {
            main: build_slot(&cfg.model_main)?,
            cheap: build_slot(&cfg.model_cheap)?,
            router: build_slot(&cfg.model_router)?,
            sink: None,
        })
    }

    /// Test constructor: explicit clients per tier.
    pub fn with_clients(
        main: Arc<dyn LlmClient>,
        cheap: Arc<dyn LlmClient>,
        router: Arc<dyn LlmClient>,
    ) -> Self {
        let slot = |client: Arc<dyn LlmClient>| {
            let model = client.default_model().to_string();
            TierSlot { client, model }
        };
        Self {
            main: slot(main),
            cheap: slot(cheap),
            router: slot(router),
            sink: None,
        }
    }

    pub fn set_usage_sink(&mut self, sink: Arc<dyn UsageSink>) {
        self.sink = Some(sink);
    }

    fn slot(&self, tier: ModelTier) -> &TierSlot {
        match tier {
            ModelTier::Main => &self.main,
            ModelTier::Cheap => &self.cheap,
            ModelTier::Router => &self.router,
        }
    }

    pub fn model_for(&self, tier: ModelTier) -> &str {
        &self.slot(tier).model
    }

    /// Run one completion on the given tier. On success, a usage event is
    /// emitted tagged with the calling component and job.
    pub async fn complete(
        &self,
        tier: ModelTier,
        mut req: ChatRequest,
        component: UsageComponent,
        job_id: Option<&str>,
    ) -> LlmResult<ChatResponse> {
        let slot = self.slot(tier);
        if req.model.is_none() {
            req.model = Some(slot.model.clone());
        }

        let resp = slot.client.complete(&req).await?;

        if let Some(sink) = &self.sink {
            sink.record(UsageEvent {
                job_id: job_id.map(String::from),
                model: resp.model.clone(),
                provider: slot.client.provider_id().to_string(),
                usage: resp.usage,
                component,
            });
        }
        Ok(resp)
    }
}

fn build_slot(spec: &str) -> minder_domain::Result<TierSlot> {
    let (provider, model) = spec.split_once('/').ok_or_else(|| {
        minder_domain::Error::Config(format!("model spec '{spec}' is not provider/model"))
    })?;

    let client: Arc<dyn LlmClient> = match provider {
        "anthropic" => Arc::new(
            AnthropicClient::new(
                "https://api.anthropic.com",
                env_key("ANTHROPIC_API_KEY"),
                model.to_string(),
            )
            .map_err(|e| minder_domain::Error::Config(e.to_string()))?,
        ),
        "openai" => Arc::new(
            OpenAiCompatClient::new(
                "openai",
                "https://api.openai.com/v1",
                env_key("OPENAI_API_KEY"),
                model.to_string(),
            )
            .map_err(|e| minder_domain::Error::Config(e.to_string()))?,
        ),
        other => {
            // Any other provider id is assumed OpenAI-compatible with a
            // base URL supplied via <PROVIDER>_BASE_URL.
            let upper = other.to_uppercase().replace('-', "_");
            let base_url = std::env::var(format!("{upper}_BASE_URL")).map_err(|_| {
                minder_domain::Error::Config(format!(
                    "provider '{other}' requires {upper}_BASE_URL"
                ))
            })?;
            Arc::new(
                OpenAiCompatClient::new(
                    other,
                    &base_url,
                    env_key(&format!("{upper}_API_KEY")),
                    model.to_string(),
                )
                .map_err(|e| minder_domain::Error::Config(e.to_string()))?,
            )
        }
    };

    Ok(TierSlot {
        client,
        model: model.to_string(),
    })
}

fn env_key(var: &str) -> String {
    std::env::var(var).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockClient;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CollectingSink {
        events: Mutex<Vec<UsageEvent>>,
    }

    impl UsageSink for CollectingSink {
        fn record(&self, event: UsageEvent) {
            self.events.lock().push(event);
        }
    }

    fn mock_registry() -> (ProviderRegistry, Arc<MockClient>, Arc<MockClient>) {
        let main = Arc::new(MockClient::new());
        let cheap = Arc::new(MockClient::new());
        let router = Arc::new(MockClient::new());
        let registry =
            ProviderRegistry::with_clients(main.clone(), cheap.clone(), router.clone());
        (registry, main, cheap)
    }

    #[tokio::test]
    async fn tier_dispatch_uses_the_right_client() {
        let (registry, main, cheap) = mock_registry();
        main.push_text("from main");
        cheap.push_text("from cheap");

        let resp = registry
            .complete(
                ModelTier::Main,
                ChatRequest::default(),
                UsageComponent::Agent,
                None,
            )
            .await
            .unwrap();
        assert_eq!(resp.content, "from main");

        let resp = registry
            .complete(
                ModelTier::Cheap,
                ChatRequest::default(),
                UsageComponent::Delegate,
                None,
            )
            .await
            .unwrap();
        assert_eq!(resp.content, "from cheap");
    }

    #[tokio::test]
    async fn successful_calls_emit_usage_events() {
        let (mut registry, main, _) = mock_registry();
        main.push_text("ok");
        let sink = Arc::new(CollectingSink::default());
        registry.set_usage_sink(sink.clone());

        registry
            .complete(
                ModelTier::Main,
                ChatRequest::default(),
                UsageComponent::Agent,
                Some("job-1"),
            )
            .await
            .unwrap();

        let events = sink.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].job_id.as_deref(), Some("job-1"));
        assert_eq!(events[0].component, UsageComponent::Agent);
        assert_eq!(events[0].usage.prompt_tokens, 10);
    }

    #[tokio::test]
    async fn failed_calls_emit_nothing() {
        let (mut registry, main, _) = mock_registry();
        main.push_provider_error("boom");
        let sink = Arc::new(CollectingSink::default());
        registry.set_usage_sink(sink.clone());

        let result = registry
            .complete(
                ModelTier::Main,
                ChatRequest::default(),
                UsageComponent::Agent,
                None,
            )
            .await;
        assert!(result.is_err());
        assert!(sink.events.lock().is_empty());
    }
}
