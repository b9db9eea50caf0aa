//! End-to-end scenarios driving the full stack (store, queue, workers,
//! agent loop, gate, scheduler) against the scripted mock model.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path as AxPath, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{TimeZone, Utc};

use minder_domain::config::Config;
use minder_domain::tool::ToolCall;
use minder_host::api::jobs::{self, RespondBody, ViewQuery};
use minder_host::bootstrap::{build_state, start_background};
use minder_host::runtime::queue;
use minder_host::runtime::scheduler::{fire_due, reconcile_missed};
use minder_host::AppState;
use minder_providers::{MockClient, ProviderRegistry};
use minder_store::{ActivityKind, Job, JobStatus, MessageRole, ScheduleRecord, Store};

struct Harness {
    state: AppState,
    main: Arc<MockClient>,
    cheap: Arc<MockClient>,
    workers: Vec<tokio::task::JoinHandle<()>>,
    scheduler: tokio::task::JoinHandle<()>,
    _tmp: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.workspace_dir = tmp.path().join("ws").to_string_lossy().into_owned();
        tweak(&mut config);

        let main = Arc::new(MockClient::new());
        let cheap = Arc::new(MockClient::new());
        let router = Arc::new(MockClient::new());
        let llm =
            ProviderRegistry::with_clients(main.clone(), cheap.clone(), router.clone());

        let state = build_state(config, Store::open_in_memory().unwrap(), llm).unwrap();
        let (workers, scheduler) = start_background(&state);

        Self {
            state,
            main,
            cheap,
            workers,
            scheduler,
            _tmp: tmp,
        }
    }

    fn submit(&self, text: &str) -> (String, Job) {
        let (conv, _, job) = queue::submit(&self.state, None, text, None, None).unwrap();
        (conv, job)
    }

    async fn wait_for_status(&self, job_id: &str, status: JobStatus) -> Job {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job = self.state.store.get_job(job_id).unwrap().unwrap();
            if job.status == status {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {status:?}; job is {:?} ({:?})",
                job.status,
                job.error,
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        for handle in &self.workers {
            handle.abort();
        }
        self.scheduler.abort();
    }
}

fn tool_call(id: &str, name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments: args,
    }
}

fn activity_kinds(store: &Store, job_id: &str) -> Vec<ActivityKind> {
    store
        .read_activities(job_id, None)
        .unwrap()
        .0
        .iter()
        .map(|a| a.kind)
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S1 — simple completion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s1_simple_completion() {
    let h = Harness::new();
    h.main.push_text("hi");

    let (conv, job) = h.submit("hello");
    let done = h.wait_for_status(&job.id, JobStatus::Completed).await;
    assert_eq!(done.result.as_deref(), Some("hi"));

    let messages = h.state.store.read_messages(&conv, None, None).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, MessageRole::User);
    assert_eq!(messages[0].content, "hello");
    assert_eq!(messages[1].role, MessageRole::Assistant);
    assert_eq!(messages[1].content, "hi");

    let kinds = activity_kinds(&h.state.store, &job.id);
    for expected in [ActivityKind::Start, ActivityKind::LlmCall, ActivityKind::Complete] {
        assert!(kinds.contains(&expected), "missing {expected:?} in {kinds:?}");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S2 — ask-user loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s2_ask_user_roundtrip() {
    let h = Harness::new();
    h.main.push_tool_calls(
        "",
        vec![tool_call(
            "tc_ask",
            "ask_user",
            serde_json::json!({"question": "Which color?", "options": ["red", "blue"]}),
        )],
    );
    h.main.push_text("you picked red");

    let (conv, job) = h.submit("Pick a color: red or blue?");
    let waiting = h.wait_for_status(&job.id, JobStatus::WaitingForInput).await;

    let payload = waiting.pending_payload.unwrap();
    assert_eq!(payload["question"], "Which color?");
    assert_eq!(payload["options"], serde_json::json!(["red", "blue"]));

    // The job view exposes the question to pollers.
    let view = jobs::view(
        State(h.state.clone()),
        AxPath(job.id.clone()),
        Query(ViewQuery {
            since_activity_id: None,
        }),
    )
    .await
    .into_response();
    assert_eq!(view.status(), axum::http::StatusCode::OK);

    // Respond through the HTTP handler.
    let resp = jobs::respond(
        State(h.state.clone()),
        AxPath(job.id.clone()),
        Json(RespondBody {
            response: "red".into(),
        }),
    )
    .await
    .into_response();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);

    let done = h.wait_for_status(&job.id, JobStatus::Completed).await;
    assert_eq!(done.result.as_deref(), Some("you picked red"));
    assert!(done.pending_call_id.is_none());

    let messages = h.state.store.read_messages(&conv, None, None).unwrap();
    // The answer is persisted both as a user message and as the tool
    // result for the suspended call.
    assert!(messages
        .iter()
        .any(|m| m.role == MessageRole::User && m.content == "red"));
    assert!(messages
        .iter()
        .any(|m| m.role == MessageRole::Tool
            && m.tool_call_id.as_deref() == Some("tc_ask")
            && m.content == "red"));

    // And the model observed "red" as the tool result.
    let second_request = &h.main.requests()[1];
    let saw_result = second_request.messages.iter().any(|m| {
        serde_json::to_string(&m.content)
            .unwrap_or_default()
            .contains("tc_ask")
    });
    assert!(saw_result, "second model call should carry the tool result");
}

#[tokio::test]
async fn respond_without_pending_question_is_rejected() {
    let h = Harness::new();
    h.main.push_text("done");
    let (_, job) = h.submit("quick task");
    h.wait_for_status(&job.id, JobStatus::Completed).await;

    let resp = jobs::respond(
        State(h.state.clone()),
        AxPath(job.id.clone()),
        Json(RespondBody {
            response: "hello?".into(),
        }),
    )
    .await
    .into_response();
    assert_eq!(resp.status(), axum::http::StatusCode::CONFLICT);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S3 — cancellation during an LLM call
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s3_cancel_during_llm_call() {
    let h = Harness::new();
    h.main.push_hang();

    let (_, job) = h.submit("long task");
    h.wait_for_status(&job.id, JobStatus::Running).await;
    // Let the worker reach the hanging model call.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let resp = jobs::cancel(State(h.state.clone()), AxPath(job.id.clone()))
        .await
        .into_response();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);

    h.wait_for_status(&job.id, JobStatus::Cancelled).await;

    let (activities, latest) = h.state.store.read_activities(&job.id, None).unwrap();
    let cancelled_seq = activities
        .iter()
        .find(|a| a.kind == ActivityKind::Cancelled)
        .expect("cancelled activity")
        .seq;

    // Nothing is appended after the cancellation record.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let (_, latest_after) = h.state.store.read_activities(&job.id, None).unwrap();
    assert_eq!(latest, latest_after);
    assert_eq!(cancelled_seq, latest);
}

#[tokio::test]
async fn cancel_is_idempotent_on_terminal_jobs() {
    let h = Harness::new();
    h.main.push_text("done");
    let (_, job) = h.submit("task");
    h.wait_for_status(&job.id, JobStatus::Completed).await;

    for _ in 0..2 {
        let resp = jobs::cancel(State(h.state.clone()), AxPath(job.id.clone()))
            .await
            .into_response();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
        let job = h.state.store.get_job(&job.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S4 — parallel delegates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s4_parallel_delegates_preserve_order() {
    let h = Harness::new();
    h.main.push_tool_calls(
        "splitting the work",
        vec![
            tool_call("tc_a", "delegate", serde_json::json!({"task": "A"})),
            tool_call("tc_b", "delegate", serde_json::json!({"task": "B"})),
        ],
    );
    h.cheap.push_text("first sub-result");
    h.cheap.push_text("second sub-result");
    h.main.push_text("both delegates finished");

    let (conv, job) = h.submit("do A and B in parallel");
    h.wait_for_status(&job.id, JobStatus::Completed).await;

    let (activities, _) = h.state.store.read_activities(&job.id, None).unwrap();
    let seqs_of = |kind: ActivityKind| -> Vec<i64> {
        activities
            .iter()
            .filter(|a| a.kind == kind)
            .map(|a| a.seq)
            .collect()
    };

    let starts = seqs_of(ActivityKind::DelegateStart);
    let ends = seqs_of(ActivityKind::DelegateEnd);
    assert_eq!(starts.len(), 2);
    assert_eq!(ends.len(), 2);

    // Both starts precede both ends.
    assert!(starts.iter().max() < ends.iter().min());

    // The parent's next model call happens only after both ends.
    let llm_calls = seqs_of(ActivityKind::LlmCall);
    let last_llm = llm_calls.iter().max().unwrap();
    assert!(last_llm > ends.iter().max().unwrap());

    // Tool result messages land in call order regardless of completion
    // order.
    let messages = h.state.store.read_messages(&conv, None, None).unwrap();
    let tool_ids: Vec<_> = messages
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .map(|m| m.tool_call_id.clone().unwrap())
        .collect();
    assert_eq!(tool_ids, vec!["tc_a".to_string(), "tc_b".to_string()]);
}

#[tokio::test]
async fn delegate_quota_returns_tool_error_not_failure() {
    let h = Harness::with_config(|c| c.delegate.quota_per_conversation = 0);
    h.main.push_tool_calls(
        "",
        vec![tool_call("tc_d", "delegate", serde_json::json!({"task": "X"}))],
    );
    h.main.push_text("understood, no delegation available");

    let (conv, job) = h.submit("delegate something");
    let done = h.wait_for_status(&job.id, JobStatus::Completed).await;
    assert_eq!(done.status, JobStatus::Completed);

    let messages = h.state.store.read_messages(&conv, None, None).unwrap();
    let tool_msg = messages
        .iter()
        .find(|m| m.role == MessageRole::Tool)
        .unwrap();
    assert!(tool_msg.content.contains("quota_exceeded"));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S5 — CRON fire semantics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn seed_schedule(state: &AppState, next_fire: chrono::DateTime<Utc>) -> ScheduleRecord {
    let record = ScheduleRecord {
        id: uuid::Uuid::new_v4().to_string(),
        conversation_id: None,
        name: "report".into(),
        prompt: "run report".into(),
        cron: "*/5 * * * *".into(),
        timezone: "UTC".into(),
        enabled: true,
        next_fire_at: Some(next_fire),
        run_count: 0,
        source_conversation_id: None,
        context: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    state.store.upsert_schedule(&record).unwrap();
    record
}

#[tokio::test]
async fn s5_cron_fire_advances_cursor_before_running() {
    // Workers deliberately idle here: the fired job stays pending so the
    // queueing effects are observable.
    let h = Harness::new();
    for handle in &h.workers {
        handle.abort();
    }

    let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 12, 5, 0).unwrap();
    let schedule = seed_schedule(&h.state, t0);

    fire_due(&h.state, t0 + chrono::Duration::seconds(30)).await;

    // Cursor advanced from the intended fire time: 12:05 → 12:10.
    let loaded = h.state.store.get_schedule(&schedule.id).unwrap().unwrap();
    assert_eq!(
        loaded.next_fire_at.unwrap(),
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 10, 0).unwrap()
    );
    assert_eq!(loaded.run_count, 1);

    // One fresh, tagged conversation with the prompt enqueued.
    let (jobs, total) = h.state.store.list_jobs(None, None, 10, 0).unwrap();
    assert_eq!(total, 1);
    let job = &jobs[0];
    assert_eq!(job.user_message, "run report");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.trigger_time.unwrap(), t0);

    let conv = h
        .state
        .store
        .get_conversation(&job.conversation_id)
        .unwrap()
        .unwrap();
    assert!(conv.is_scheduler_run);
    assert_eq!(conv.scheduler_id.as_deref(), Some(schedule.id.as_str()));

    // Re-evaluating at the same instant does not double-fire.
    fire_due(&h.state, t0 + chrono::Duration::seconds(40)).await;
    let (_, total) = h.state.store.list_jobs(None, None, 10, 0).unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn s5_missed_fires_are_dropped_not_replayed() {
    let h = Harness::new();
    for handle in &h.workers {
        handle.abort();
    }

    // Process "died" at 12:07 with the cursor at 12:10; restart at 12:11.
    let missed = Utc.with_ymd_and_hms(2026, 8, 1, 12, 10, 0).unwrap();
    let schedule = seed_schedule(&h.state, missed);

    let restart = Utc.with_ymd_and_hms(2026, 8, 1, 12, 11, 0).unwrap();
    let skipped = reconcile_missed(&h.state, restart);
    assert_eq!(skipped, 1);

    // No retroactive job; cursor jumped to 12:15.
    let (_, total) = h.state.store.list_jobs(None, None, 10, 0).unwrap();
    assert_eq!(total, 0);
    let loaded = h.state.store.get_schedule(&schedule.id).unwrap().unwrap();
    assert_eq!(
        loaded.next_fire_at.unwrap(),
        Utc.with_ymd_and_hms(2026, 8, 1, 12, 15, 0).unwrap()
    );

    // The 12:15 fire then happens normally.
    fire_due(&h.state, Utc.with_ymd_and_hms(2026, 8, 1, 12, 15, 1).unwrap()).await;
    let (_, total) = h.state.store.list_jobs(None, None, 10, 0).unwrap();
    assert_eq!(total, 1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-conversation exclusivity under a multi-worker pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn one_job_per_conversation_even_with_spare_workers() {
    let h = Harness::with_config(|c| c.queue.worker_count = 2);
    h.main.push_hang();
    h.main.push_text("second done");

    let (conv, first) = h.submit("first");
    let (_, _, second) = queue::submit(&h.state, Some(&conv), "second", None, None).unwrap();

    h.wait_for_status(&first.id, JobStatus::Running).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    // A free worker exists, but the second job must stay parked.
    assert_eq!(
        h.state.store.get_job(&second.id).unwrap().unwrap().status,
        JobStatus::Pending
    );

    jobs::cancel(State(h.state.clone()), AxPath(first.id.clone()))
        .await
        .into_response();
    h.wait_for_status(&first.id, JobStatus::Cancelled).await;
    h.wait_for_status(&second.id, JobStatus::Completed).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Restart-resume of a suspended job
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn suspended_job_resumes_after_restart() {
    let h = Harness::new();
    h.main.push_tool_calls(
        "",
        vec![tool_call(
            "tc_q",
            "ask_user",
            serde_json::json!({"question": "Proceed?"}),
        )],
    );

    let (conv, job) = h.submit("needs confirmation");
    h.wait_for_status(&job.id, JobStatus::WaitingForInput).await;

    // Simulate a restart: the blocked worker (and its gate waiter) die.
    for handle in &h.workers {
        handle.abort();
    }
    h.state.gate.disarm(&job.id);

    // The answer arrives afterwards: requeue path.
    let resp = jobs::respond(
        State(h.state.clone()),
        AxPath(job.id.clone()),
        Json(RespondBody {
            response: "yes".into(),
        }),
    )
    .await
    .into_response();
    assert_eq!(resp.status(), axum::http::StatusCode::OK);
    assert_eq!(
        h.state.store.get_job(&job.id).unwrap().unwrap().status,
        JobStatus::Pending
    );

    // A fresh worker picks it up and rebuilds the pending tool result.
    h.main.push_text("confirmed, done");
    let workers = minder_host::runtime::queue::spawn_workers(h.state.clone());
    let done = h.wait_for_status(&job.id, JobStatus::Completed).await;
    assert_eq!(done.result.as_deref(), Some("confirmed, done"));

    let messages = h.state.store.read_messages(&conv, None, None).unwrap();
    assert!(messages
        .iter()
        .any(|m| m.role == MessageRole::Tool
            && m.tool_call_id.as_deref() == Some("tc_q")
            && m.content == "yes"));

    for handle in &workers {
        handle.abort();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loop detector nudges end-to-end
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn repeated_tool_calls_draw_a_nudge() {
    let h = Harness::new();
    let same_call = || {
        vec![tool_call(
            "tc_r",
            "list_dir",
            serde_json::json!({"path": "."}),
        )]
    };
    h.main.push_tool_calls("looking", same_call());
    h.main.push_tool_calls("looking", same_call());
    h.main.push_tool_calls("looking", same_call());
    h.main.push_text("giving a final answer instead");

    let (conv, job) = h.submit("inspect the workspace");
    h.wait_for_status(&job.id, JobStatus::Completed).await;

    let kinds = activity_kinds(&h.state.store, &job.id);
    assert!(kinds.contains(&ActivityKind::Nudge), "no nudge in {kinds:?}");

    // The directive is persisted for the model but hidden from clients.
    let all = h.state.store.read_messages(&conv, None, None).unwrap();
    assert!(all.iter().any(|m| m.role == MessageRole::Internal));
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S6 — compression safety and monotonicity across steps
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn s6_summary_boundary_only_moves_forward() {
    use minder_host::runtime::context::build_snapshot;
    use minder_store::NewMessage;

    let h = Harness::new();
    let store = &h.state.store;
    let conv = store.create_conversation(None).unwrap();

    let mut cfg = minder_domain::config::ContextConfig {
        max_tokens: 600,
        compression_threshold: 0.3,
        keep_recent: 5,
        summary_max_tokens: 50,
    };

    // 60 messages, with a tool pair in the middle.
    for i in 0..20 {
        store
            .append_message(&conv.id, MessageRole::User, NewMessage::text(format!("ask {i}")))
            .unwrap();
        if i == 10 {
            store
                .append_message(
                    &conv.id,
                    MessageRole::Assistant,
                    NewMessage {
                        content: "checking".into(),
                        tool_calls: Some(serde_json::json!([
                            {"id": "tc_mid", "name": "shell", "arguments": {"command": "ls"}}
                        ])),
                        ..Default::default()
                    },
                )
                .unwrap();
            store
                .append_message(
                    &conv.id,
                    MessageRole::Tool,
                    NewMessage {
                        content: "listing".into(),
                        tool_call_id: Some("tc_mid".into()),
                        ..Default::default()
                    },
                )
                .unwrap();
        } else {
            store
                .append_message(
                    &conv.id,
                    MessageRole::Assistant,
                    NewMessage::text(format!("reply {i}")),
                )
                .unwrap();
        }
    }

    h.cheap.push_text("summary pass one");
    let snap1 = build_snapshot(
        store, &h.state.llm, &cfg, &conv.id, "job-x", "sys", &[], cfg.keep_recent, false,
    )
    .await
    .unwrap();
    let boundary1 = store
        .get_conversation(&conv.id)
        .unwrap()
        .unwrap()
        .summary_up_to_seq
        .unwrap();

    // No orphan tool result in what the model sees.
    for msg in &snap1.messages {
        let rendered = serde_json::to_string(&msg.content).unwrap();
        if rendered.contains("tool_result") && rendered.contains("tc_mid") {
            let has_call = snap1.messages.iter().any(|m| {
                serde_json::to_string(&m.content)
                    .unwrap()
                    .contains("\"tool_use\"")
            });
            assert!(has_call, "orphan tool result in prompt");
        }
    }

    // More turns arrive; compress again with a tighter window.
    for i in 20..30 {
        store
            .append_message(&conv.id, MessageRole::User, NewMessage::text(format!("ask {i}")))
            .unwrap();
        store
            .append_message(
                &conv.id,
                MessageRole::Assistant,
                NewMessage::text(format!("reply {i}")),
            )
            .unwrap();
    }
    cfg.keep_recent = 2;
    h.cheap.push_text("summary pass two");
    build_snapshot(store, &h.state.llm, &cfg, &conv.id, "job-x", "sys", &[], 2, true)
        .await
        .unwrap();
    let boundary2 = store
        .get_conversation(&conv.id)
        .unwrap()
        .unwrap()
        .summary_up_to_seq
        .unwrap();

    // Older messages only become more summarized, never less.
    assert!(boundary2 >= boundary1);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fatal tool errors fail the job with an explanation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn step_budget_exhaustion_fails_the_job() {
    let h = Harness::with_config(|c| c.agent.max_steps = 2);
    for _ in 0..3 {
        h.main.push_tool_calls(
            "",
            vec![tool_call("tc", "list_dir", serde_json::json!({"path": "."}))],
        );
    }

    let (conv, job) = h.submit("never finishes");
    let failed = h.wait_for_status(&job.id, JobStatus::Failed).await;
    assert!(failed.error.unwrap().contains("exhausted"));

    // The user gets an explanatory assistant message.
    let messages = h.state.store.read_messages(&conv, None, None).unwrap();
    let last = messages.last().unwrap();
    assert_eq!(last.role, MessageRole::Assistant);
    assert!(last.content.contains("could not be completed"));
}

#[tokio::test]
async fn usage_records_are_written_per_call() {
    let h = Harness::new();
    h.main.push_text("hi");

    let (_, job) = h.submit("hello");
    h.wait_for_status(&job.id, JobStatus::Completed).await;

    let usage = h.state.store.usage_for_job(&job.id).unwrap();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].component, "agent");
    assert_eq!(usage[0].prompt_tokens, 10);
}
