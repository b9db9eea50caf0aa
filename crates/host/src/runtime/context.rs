//! Context manager — token-bounded window assembly with hierarchical
//! summary compression.
//!
//! Compression collapses whole exchanges (one user message plus everything
//! up to the next user message) into the persisted conversation summary,
//! so an assistant tool-call message and its tool results are never split
//! across the boundary.

use minder_domain::config::ContextConfig;
use minder_domain::message::ChatMessage;
use minder_domain::tool::{ToolCall, ToolDefinition};
use minder_domain::usage::UsageComponent;
use minder_providers::{ChatRequest, ModelTier, ProviderRegistry};
use minder_store::{Conversation, MessageRecord, MessageRole, Store};

use super::truncate_str;

#[derive(thiserror::Error, Debug)]
pub enum ContextError {
    /// The window still exceeds the budget after compression.
    #[error("context overflow: {estimated} tokens over a budget of {budget}")]
    Overflow { estimated: u32, budget: u32 },

    #[error("store: {0}")]
    Store(#[from] minder_store::StoreError),

    #[error("summarizer: {0}")]
    Summarizer(String),
}

/// The assembled window for one step. Not mutated once returned.
#[derive(Debug)]
pub struct ContextSnapshot {
    pub messages: Vec<ChatMessage>,
    pub estimated_tokens: u32,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token estimation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const PER_MESSAGE_OVERHEAD: u32 = 4;

pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as u32 + 3) / 4
}

fn estimate_record(record: &MessageRecord) -> u32 {
    let mut total = estimate_tokens(&record.content) + PER_MESSAGE_OVERHEAD;
    if let Some(calls) = &record.tool_calls {
        total += estimate_tokens(&calls.to_string());
    }
    total
}

fn estimate_tool_defs(defs: &[ToolDefinition]) -> u32 {
    defs.iter()
        .map(|d| {
            estimate_tokens(&d.description)
                + estimate_tokens(&d.parameters.to_string())
                + PER_MESSAGE_OVERHEAD
        })
        .sum()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Exchange splitting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Split records into exchanges. A user message opens a new exchange only
/// when every tool call of the current exchange already has its result —
/// a gate response (user message persisted before the pending tool result)
/// therefore stays glued to the exchange that asked.
pub fn split_exchanges(records: &[MessageRecord]) -> Vec<Vec<&MessageRecord>> {
    let mut exchanges: Vec<Vec<&MessageRecord>> = Vec::new();
    let mut pending_calls: std::collections::HashSet<String> = Default::default();

    for record in records {
        let starts_new = record.role == MessageRole::User
            && pending_calls.is_empty()
            && !exchanges.is_empty();
        let first = exchanges.is_empty();

        match record.role {
            MessageRole::Assistant => {
                if let Some(calls) = &record.tool_calls {
                    if let Ok(parsed) = serde_json::from_value::<Vec<ToolCall>>(calls.clone()) {
                        for call in parsed {
                            pending_calls.insert(call.id);
                        }
                    }
                }
            }
            MessageRole::Tool => {
                if let Some(id) = &record.tool_call_id {
                    pending_calls.remove(id);
                }
            }
            _ => {}
        }

        if first || starts_new {
            exchanges.push(vec![record]);
        } else {
            exchanges.last_mut().expect("non-empty").push(record);
        }
    }
    exchanges
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record → LLM message conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn records_to_chat(records: &[&MessageRecord]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    for record in records {
        match record.role {
            MessageRole::User => messages.push(ChatMessage::user(&record.content)),
            MessageRole::Internal => messages.push(ChatMessage::system(&record.content)),
            MessageRole::Assistant => {
                let calls: Vec<ToolCall> = record
                    .tool_calls
                    .as_ref()
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default();
                if calls.is_empty() {
                    messages.push(ChatMessage::assistant(&record.content));
                } else {
                    messages.push(ChatMessage::assistant_with_calls(&record.content, &calls));
                }
            }
            MessageRole::Tool => {
                let Some(call_id) = &record.tool_call_id else {
                    continue; // unpaired tool output is never sent
                };
                let is_error = record
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("is_error"))
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                messages.push(ChatMessage::tool_result(call_id, &record.content, is_error));
            }
        }
    }
    messages
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the context snapshot for one step. Runs at most one compression;
/// the caller retries once with `keep_recent = 2` on overflow.
#[allow(clippy::too_many_arguments)]
pub async fn build_snapshot(
    store: &Store,
    llm: &ProviderRegistry,
    cfg: &ContextConfig,
    conversation_id: &str,
    job_id: &str,
    system_prompt: &str,
    tool_defs: &[ToolDefinition],
    keep_recent: usize,
    aggressive: bool,
) -> Result<ContextSnapshot, ContextError> {
    let conversation = store
        .get_conversation(conversation_id)?
        .ok_or_else(|| minder_store::StoreError::NotFound(conversation_id.to_string()))?;

    let records = store.read_messages(conversation_id, conversation.summary_up_to_seq, None)?;

    let overhead = estimate_tokens(system_prompt)
        + estimate_tool_defs(tool_defs)
        + summary_tokens(&conversation);
    let live: u32 = records.iter().map(estimate_record).sum();

    let threshold = (cfg.max_tokens as f64 * cfg.compression_threshold) as u32;
    if overhead + live <= threshold {
        return Ok(assemble(system_prompt, &conversation, &records, overhead + live));
    }

    // ── Compress ──────────────────────────────────────────────────
    let exchanges = split_exchanges(&records);
    if exchanges.len() <= keep_recent {
        // Nothing old enough to collapse; pass through if it still fits.
        let total = overhead + live;
        if total <= cfg.max_tokens {
            return Ok(assemble(system_prompt, &conversation, &records, total));
        }
        return Err(ContextError::Overflow {
            estimated: total,
            budget: cfg.max_tokens,
        });
    }

    let split_at = exchanges.len() - keep_recent;
    let collapsed: Vec<&MessageRecord> = exchanges[..split_at].concat();
    let retained: Vec<&MessageRecord> = exchanges[split_at..].concat();

    let new_summary = summarize(
        llm,
        cfg,
        job_id,
        conversation.summary.as_deref(),
        &collapsed,
        aggressive,
    )
    .await?;
    let boundary = collapsed.last().map(|r| r.seq).unwrap_or(0);
    store.set_summary(conversation_id, &new_summary, boundary)?;

    let conversation = store
        .get_conversation(conversation_id)?
        .ok_or_else(|| minder_store::StoreError::NotFound(conversation_id.to_string()))?;

    let retained_tokens: u32 = retained.iter().map(|r| estimate_record(r)).sum();
    let total = estimate_tokens(system_prompt)
        + estimate_tool_defs(tool_defs)
        + summary_tokens(&conversation)
        + retained_tokens;

    if total > cfg.max_tokens {
        return Err(ContextError::Overflow {
            estimated: total,
            budget: cfg.max_tokens,
        });
    }

    let mut messages = vec![ChatMessage::system(system_prompt)];
    if let Some(msg) = summary_message(&conversation) {
        messages.push(msg);
    }
    messages.extend(records_to_chat(&retained));
    Ok(ContextSnapshot {
        messages,
        estimated_tokens: total,
    })
}

fn assemble(
    system_prompt: &str,
    conversation: &Conversation,
    records: &[MessageRecord],
    estimated_tokens: u32,
) -> ContextSnapshot {
    let mut messages = vec![ChatMessage::system(system_prompt)];
    if let Some(msg) = summary_message(conversation) {
        messages.push(msg);
    }
    let refs: Vec<&MessageRecord> = records.iter().collect();
    messages.extend(records_to_chat(&refs));
    ContextSnapshot {
        messages,
        estimated_tokens,
    }
}

fn summary_message(conversation: &Conversation) -> Option<ChatMessage> {
    conversation.summary.as_ref().map(|s| {
        ChatMessage::system(format!("Summary of the earlier conversation:\n{s}"))
    })
}

fn summary_tokens(conversation: &Conversation) -> u32 {
    conversation
        .summary
        .as_deref()
        .map(estimate_tokens)
        .unwrap_or(0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summarization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn summarize(
    llm: &ProviderRegistry,
    cfg: &ContextConfig,
    job_id: &str,
    existing_summary: Option<&str>,
    collapsed: &[&MessageRecord],
    aggressive: bool,
) -> Result<String, ContextError> {
    let mut conversation_text = String::new();
    for record in collapsed {
        conversation_text.push_str(role_label(record.role));
        conversation_text.push_str(": ");
        conversation_text.push_str(&truncate_str(&record.content, 2000));
        conversation_text.push('\n');
    }

    let existing = existing_summary
        .map(|s| format!("EXISTING SUMMARY (extend, do not lose its facts):\n{s}\n\n"))
        .unwrap_or_default();

    let prompt = format!(
        "Summarize the following conversation history into at most \
         {max} tokens, preserving:\n\
         1. The goal being worked on\n\
         2. Key decisions and facts established\n\
         3. Open questions or unfinished threads\n\
         4. Tool state that still matters (files written, processes started)\n\n\
         Write in present tense. Omit pleasantries.\n\n\
         {existing}CONVERSATION:\n{conversation_text}",
        max = cfg.summary_max_tokens,
    );

    let req = ChatRequest {
        messages: vec![ChatMessage::user(prompt)],
        max_tokens: Some(cfg.summary_max_tokens),
        temperature: Some(0.1),
        ..Default::default()
    };
    let component = if aggressive {
        UsageComponent::Compressor
    } else {
        UsageComponent::Summarizer
    };
    let resp = llm
        .complete(ModelTier::Cheap, req, component, Some(job_id))
        .await
        .map_err(|e| ContextError::Summarizer(e.to_string()))?;

    // Hard cap in case the model ignores the token instruction.
    Ok(truncate_str(&resp.content, cfg.summary_max_tokens as usize * 4))
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "User",
        MessageRole::Assistant => "Assistant",
        MessageRole::Tool => "Tool",
        MessageRole::Internal => "System",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use minder_providers::MockClient;
    use minder_store::NewMessage;

    fn registry_with_summary(text: &str) -> (Arc<ProviderRegistry>, Arc<MockClient>) {
        let cheap = Arc::new(MockClient::new());
        cheap.push_text(text);
        let main = Arc::new(MockClient::new());
        let router = Arc::new(MockClient::new());
        (
            Arc::new(ProviderRegistry::with_clients(main, cheap.clone(), router)),
            cheap,
        )
    }

    fn seed_turns(store: &Store, conv: &str, start: usize, turns: usize) {
        for i in start..start + turns {
            store
                .append_message(conv, MessageRole::User, NewMessage::text(format!("question {i}")))
                .unwrap();
            store
                .append_message(
                    conv,
                    MessageRole::Assistant,
                    NewMessage::text(format!("answer {i}")),
                )
                .unwrap();
        }
    }

    fn small_config() -> ContextConfig {
        ContextConfig {
            max_tokens: 100,
            compression_threshold: 0.5,
            keep_recent: 2,
            summary_max_tokens: 50,
        }
    }

    #[tokio::test]
    async fn under_threshold_passes_through() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation(None).unwrap();
        seed_turns(&store, &conv.id, 0, 2);
        let (llm, cheap) = registry_with_summary("unused");

        let snapshot = build_snapshot(
            &store,
            &llm,
            &ContextConfig::default(),
            &conv.id,
            "job-1",
            "system prompt",
            &[],
            5,
            false,
        )
        .await
        .unwrap();

        // system + 4 conversation messages, no summarizer call.
        assert_eq!(snapshot.messages.len(), 5);
        assert_eq!(cheap.remaining(), 1);
    }

    #[tokio::test]
    async fn compression_collapses_old_exchanges() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation(None).unwrap();
        seed_turns(&store, &conv.id, 0, 10);
        let (llm, _) = registry_with_summary("goal: answer questions");

        let snapshot = build_snapshot(
            &store,
            &llm,
            &small_config(),
            &conv.id,
            "job-1",
            "sys",
            &[],
            2,
            false,
        )
        .await
        .unwrap();

        // system + summary + last 2 exchanges (4 messages).
        assert_eq!(snapshot.messages.len(), 6);

        let conv = store.get_conversation(&conv.id).unwrap().unwrap();
        assert_eq!(conv.summary.as_deref(), Some("goal: answer questions"));
        // 10 turns, keep 2 → boundary at the end of turn 8 (seq 16).
        assert_eq!(conv.summary_up_to_seq, Some(16));
    }

    #[tokio::test]
    async fn gate_response_does_not_orphan_the_tool_pair() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation(None).unwrap();
        seed_turns(&store, &conv.id, 0, 6);

        // ask_user shape: assistant tool call, then the user's answer,
        // then the tool result carrying that answer.
        store
            .append_message(
                &conv.id,
                MessageRole::User,
                NewMessage::text("pick a color for me"),
            )
            .unwrap();
        store
            .append_message(
                &conv.id,
                MessageRole::Assistant,
                NewMessage {
                    content: String::new(),
                    tool_calls: Some(serde_json::json!([
                        {"id": "tc_ask", "name": "ask_user", "arguments": {"question": "Which?"}}
                    ])),
                    ..Default::default()
                },
            )
            .unwrap();
        store
            .append_message(&conv.id, MessageRole::User, NewMessage::text("red"))
            .unwrap();
        store
            .append_message(
                &conv.id,
                MessageRole::Tool,
                NewMessage {
                    content: "red".into(),
                    tool_call_id: Some("tc_ask".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let records = store.read_messages(&conv.id, None, None).unwrap();
        let exchanges = split_exchanges(&records);

        // The answer "red" must not have opened a new exchange.
        let ask_exchange = exchanges
            .iter()
            .find(|e| e.iter().any(|r| r.tool_calls.is_some()))
            .expect("exchange with the ask_user call");
        assert!(ask_exchange
            .iter()
            .any(|r| r.tool_call_id.as_deref() == Some("tc_ask")));
        assert!(ask_exchange
            .iter()
            .any(|r| r.role == MessageRole::User && r.content == "red"));

        // And compression at any split point keeps the pair together:
        // walk every split and check no exchange boundary separates them.
        for window in 1..exchanges.len() {
            let retained: Vec<_> = exchanges[exchanges.len() - window..].concat();
            let has_call = retained.iter().any(|r| {
                r.tool_calls
                    .as_ref()
                    .map(|v| v.to_string().contains("tc_ask"))
                    .unwrap_or(false)
            });
            let has_result = retained
                .iter()
                .any(|r| r.tool_call_id.as_deref() == Some("tc_ask"));
            assert_eq!(has_call, has_result, "pair split at window {window}");
        }
    }

    #[tokio::test]
    async fn summary_extension_only_feeds_new_messages() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation(None).unwrap();
        seed_turns(&store, &conv.id, 0, 10);
        let (llm, _) = registry_with_summary("first summary");

        build_snapshot(
            &store, &llm, &small_config(), &conv.id, "job-1", "sys", &[], 2, false,
        )
        .await
        .unwrap();

        // More turns arrive, second compression extends the summary.
        seed_turns(&store, &conv.id, 10, 10);
        let (llm2, cheap2) = registry_with_summary("extended summary");

        build_snapshot(
            &store, &llm2, &small_config(), &conv.id, "job-1", "sys", &[], 2, false,
        )
        .await
        .unwrap();

        let requests = cheap2.requests();
        assert_eq!(requests.len(), 1);
        let prompt = requests[0].messages[0].content.joined_text();
        assert!(prompt.contains("EXISTING SUMMARY"));
        assert!(prompt.contains("first summary"));
        // Messages already under the old boundary are not re-fed.
        assert!(!prompt.contains("question 0\n"));

        let conv = store.get_conversation(&conv.id).unwrap().unwrap();
        assert_eq!(conv.summary.as_deref(), Some("extended summary"));
    }

    #[tokio::test]
    async fn overflow_when_even_compression_cannot_fit() {
        let store = Store::open_in_memory().unwrap();
        let conv = store.create_conversation(None).unwrap();
        let big = "x".repeat(4000);
        for _ in 0..4 {
            store
                .append_message(&conv.id, MessageRole::User, NewMessage::text(big.clone()))
                .unwrap();
            store
                .append_message(&conv.id, MessageRole::Assistant, NewMessage::text(big.clone()))
                .unwrap();
        }
        let (llm, _) = registry_with_summary("tiny");

        let cfg = ContextConfig {
            max_tokens: 500,
            compression_threshold: 0.5,
            keep_recent: 2,
            summary_max_tokens: 50,
        };
        let err = build_snapshot(&store, &llm, &cfg, &conv.id, "job-1", "sys", &[], 2, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::Overflow { .. }));
    }

    #[test]
    fn estimate_is_monotone_in_length() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert!(estimate_tokens(&"x".repeat(400)) >= 100);
    }
}
