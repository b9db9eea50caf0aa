//! Capability router — per-step selection of active instruction bundles
//! with TTL decay. Routing calls are amortized by `stride` and use the
//! small `router` tier; TTLs keep selections stable between calls.

use serde::Deserialize;

use minder_domain::capability::ActiveCapabilities;
use minder_domain::config::RouterConfig;
use minder_domain::message::ChatMessage;
use minder_domain::usage::UsageComponent;
use minder_providers::{ChatRequest, ModelTier, ProviderRegistry};
use minder_store::{MessageRole, Store};

use super::catalog::CapabilityCatalog;

/// The router model's verdict.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouterDecision {
    #[serde(default)]
    pub keep: Vec<String>,
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub drop: Vec<String>,
}

/// Outcome of one routing step, for the activity log.
pub struct RoutingOutcome {
    pub active: ActiveCapabilities,
    /// Set when the router tier was actually consulted.
    pub decision: Option<RouterDecision>,
}

/// Run the routing algorithm for one agent step.
///
/// `steps_since_routing` counts steps since the router tier was last
/// consulted; the caller resets it when `decision` comes back `Some`.
#[allow(clippy::too_many_arguments)]
pub async fn route_step(
    store: &Store,
    llm: &ProviderRegistry,
    catalog: &CapabilityCatalog,
    cfg: &RouterConfig,
    conversation_id: &str,
    job_id: &str,
    steps_since_routing: u32,
) -> RoutingOutcome {
    let mut active = match store.capability_set(conversation_id) {
        Ok(set) => set,
        Err(e) => {
            tracing::warn!(conversation_id, error = %e, "capability set load failed");
            ActiveCapabilities::new()
        }
    };
    active.decay();

    if catalog.is_empty() {
        persist(store, conversation_id, &active);
        return RoutingOutcome {
            active,
            decision: None,
        };
    }

    let newest_user = store
        .latest_message_with_role(conversation_id, MessageRole::User)
        .ok()
        .flatten()
        .map(|m| m.content)
        .unwrap_or_default();

    let active_names: Vec<&str> = active.names().collect();
    let cues = catalog.surface_cues(&newest_user, &active_names);

    if steps_since_routing < cfg.stride && cues.is_empty() {
        persist(store, conversation_id, &active);
        return RoutingOutcome {
            active,
            decision: None,
        };
    }

    let decision = consult_router(store, llm, catalog, cfg, conversation_id, job_id, &active).await;
    let decision = match decision {
        Some(d) => d,
        None => {
            // Router failure never blocks the step; the decayed set stands.
            persist(store, conversation_id, &active);
            return RoutingOutcome {
                active,
                decision: None,
            };
        }
    };

    // Unknown names are dropped before applying.
    let known = |names: &[String]| -> Vec<String> {
        names
            .iter()
            .filter(|n| catalog.contains(n))
            .cloned()
            .collect()
    };
    let keep = known(&decision.keep);
    let add = known(&decision.add);
    let drop = decision.drop.clone();

    active.apply(&keep, &add, &drop, cfg.default_ttl);
    persist(store, conversation_id, &active);

    RoutingOutcome {
        active,
        decision: Some(RouterDecision { keep, add, drop }),
    }
}

fn persist(store: &Store, conversation_id: &str, active: &ActiveCapabilities) {
    if let Err(e) = store.set_capability_set(conversation_id, active) {
        tracing::warn!(conversation_id, error = %e, "capability set persist failed");
    }
}

async fn consult_router(
    store: &Store,
    llm: &ProviderRegistry,
    catalog: &CapabilityCatalog,
    cfg: &RouterConfig,
    conversation_id: &str,
    job_id: &str,
    active: &ActiveCapabilities,
) -> Option<RouterDecision> {
    let recent = recent_dialogue(store, conversation_id, cfg.recent_messages);
    let active_list: Vec<&str> = active.names().collect();

    let prompt = format!(
        "You select which optional capabilities should be active for an \
         assistant's next steps.\n\n\
         CAPABILITIES:\n{index}\n\n\
         CURRENTLY ACTIVE: {active:?}\n\n\
         RECENT CONVERSATION:\n{recent}\n\n\
         Reply with JSON only: {{\"keep\": [..], \"add\": [..], \"drop\": [..]}}. \
         Keep means still useful, add means newly needed, drop means no \
         longer relevant. Be conservative about adding.",
        index = catalog.render_index(),
        active = active_list,
    );

    let req = ChatRequest {
        messages: vec![ChatMessage::user(prompt)],
        max_tokens: Some(300),
        temperature: Some(0.0),
        ..Default::default()
    };

    match llm
        .complete(ModelTier::Router, req, UsageComponent::Router, Some(job_id))
        .await
    {
        Ok(resp) => parse_decision(&resp.content),
        Err(e) => {
            tracing::warn!(error = %e, "capability router call failed");
            None
        }
    }
}

fn recent_dialogue(store: &Store, conversation_id: &str, limit: usize) -> String {
    let Ok(records) = store.read_messages(conversation_id, None, None) else {
        return String::new();
    };
    records
        .iter()
        .filter(|r| !r.internal && r.role.is_user_visible_dialogue())
        .rev()
        .take(limit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(|r| format!("{}: {}", r.role.as_str(), super::truncate_str(&r.content, 400)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract the first JSON object from the router's reply. Models wrap
/// JSON in prose or fences often enough that strict parsing loses.
pub fn parse_decision(text: &str) -> Option<RouterDecision> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}
