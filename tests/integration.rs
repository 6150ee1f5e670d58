// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

// End-to-end tests exercising the full session pipeline:
// request → session → provider rounds → tokenizer → validation →
// tool orchestration → emitter → SSE response.
//
// Uses a scripted provider and test tool executors at the outer seams;
// everything else is the real engine. tower::ServiceExt::oneshot drives
// the real router in-process.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use dashmap::DashMap;
use framegate::artifacts::ArtifactsSink;
use framegate::config::Config;
use framegate::emitter::{ChannelSink, EventEmitter};
use framegate::provider::{ProviderClient, ProviderError, ProviderRequest, TokenStream};
use framegate::schema::builtin_registry;
use framegate::server;
use framegate::session::{run_session, SessionDeps, SessionMetrics, StreamRequest};
use framegate::tools::{IdempotencyCache, ToolError, ToolExecutor, ToolRegistry};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Sentinel frame builders
// ---------------------------------------------------------------------------

fn obj_frame(id: &str, schema: &str, body: &str) -> String {
    format!(
        "\u{27E6}BEGIN_OBJECT id={id} schema={schema}\u{27E7}{body}\u{27E6}END_OBJECT id={id} schema={schema}\u{27E7}"
    )
}

fn tool_frame(id: &str, name: &str, body: &str) -> String {
    format!(
        "\u{27E6}BEGIN_TOOL_CALL id={id} name={name}\u{27E7}{body}\u{27E6}END_TOOL_CALL id={id} name={name}\u{27E7}"
    )
}

fn result_open(id: &str) -> String {
    format!("\u{27E6}BEGIN_RESULT id={id} schema=AssistantReply\u{27E7}")
}

fn result_close(id: &str) -> String {
    format!("\u{27E6}END_RESULT id={id} schema=AssistantReply\u{27E7}")
}

fn result_frame(id: &str, body: &str) -> String {
    format!("{}{body}{}", result_open(id), result_close(id))
}

// ---------------------------------------------------------------------------
// Scripted provider
// ---------------------------------------------------------------------------

/// One provider round's behavior. `{{testKey}}` in chunks is substituted
/// with the request's testKey.
#[derive(Clone)]
enum Round {
    Chunks(Vec<String>),
    /// Stream some chunks, then produce nothing until dropped.
    ChunksThenHang(Vec<String>),
}

/// Replays a fixed script; the round index is the number of tool results
/// appended to the conversation so far.
struct ScriptedProvider {
    rounds: Vec<Round>,
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn stream_round(&self, request: ProviderRequest) -> Result<TokenStream, ProviderError> {
        let round_index = request.messages.len().saturating_sub(1);
        let round = self
            .rounds
            .get(round_index)
            .cloned()
            .unwrap_or(Round::Chunks(Vec::new()));
        let key = request.test_key.clone().unwrap_or_default();
        let substitute = move |chunks: Vec<String>| -> Vec<Result<String, ProviderError>> {
            chunks
                .into_iter()
                .map(|c| Ok(c.replace("{{testKey}}", &key)))
                .collect()
        };
        match round {
            Round::Chunks(chunks) => Ok(Box::pin(futures_util::stream::iter(substitute(chunks)))),
            Round::ChunksThenHang(chunks) => {
                use futures_util::StreamExt;
                Ok(Box::pin(
                    futures_util::stream::iter(substitute(chunks))
                        .chain(futures_util::stream::pending()),
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Test tools
// ---------------------------------------------------------------------------

struct PlacesSearch;

#[async_trait]
impl ToolExecutor for PlacesSearch {
    async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
        Ok(json!({"places": [{"id": "p1", "name": "Luigi's", "open": true}]}))
    }
}

struct BookingsCreate;

#[async_trait]
impl ToolExecutor for BookingsCreate {
    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        Ok(json!({
            "confirmed": true,
            "place_id": args["place_id"],
            "time": args["time"],
        }))
    }
}

/// Fails the first attempt for each distinct `key` argument, then reports
/// which attempt succeeded.
struct FlakyPerKey {
    attempts: DashMap<String, u32>,
}

impl FlakyPerKey {
    fn new() -> Self {
        Self {
            attempts: DashMap::new(),
        }
    }
}

#[async_trait]
impl ToolExecutor for FlakyPerKey {
    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let key = args["key"].as_str().unwrap_or_default().to_string();
        let n = {
            let mut entry = self.attempts.entry(key).or_insert(0);
            *entry += 1;
            *entry
        };
        if n == 1 {
            Err(ToolError::Failed("induced first-attempt failure".to_string()))
        } else {
            Ok(json!({"attempt": n}))
        }
    }
}

/// Never completes within any test timeout.
struct Hanging;

#[async_trait]
impl ToolExecutor for Hanging {
    async fn execute(&self, _args: Value) -> Result<Value, ToolError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(json!({}))
    }
}

/// Echoes arguments and counts real executions.
struct CountingEcho {
    calls: AtomicU32,
}

impl CountingEcho {
    fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl ToolExecutor for CountingEcho {
    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"echo": args}))
    }
}

// ---------------------------------------------------------------------------
// Recording artifacts sink
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingArtifacts {
    metrics: Mutex<Option<SessionMetrics>>,
    result: Mutex<Option<Value>>,
}

impl ArtifactsSink for RecordingArtifacts {
    fn write_prompt(&self, _record: &Value) {}
    fn append_frame(&self, _event: &str, _data: &Value) {}
    fn write_result(&self, reply: &Value) {
        *self.result.lock().unwrap() = Some(reply.clone());
    }
    fn write_metrics(&self, metrics: &SessionMetrics) {
        *self.metrics.lock().unwrap() = Some(metrics.clone());
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn harness(
    config: Config,
    rounds: Vec<Round>,
    register: impl FnOnce(&ToolRegistry),
) -> (Router, Arc<RecordingArtifacts>) {
    let tools = ToolRegistry::new();
    register(&tools);
    let artifacts = Arc::new(RecordingArtifacts::default());
    let deps = SessionDeps {
        config: Arc::new(config),
        provider: Arc::new(ScriptedProvider { rounds }),
        schemas: Arc::new(builtin_registry()),
        tools: Arc::new(tools),
        idempotency: Arc::new(IdempotencyCache::new()),
        artifacts: artifacts.clone(),
    };
    (server::build_router(deps), artifacts)
}

async fn post_stream(app: Router, body: Value, idem_key: Option<&str>) -> Vec<(String, Value)> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/v1/stream")
        .header("content-type", "application/json");
    if let Some(key) = idem_key {
        builder = builder.header("idempotency-key", key);
    }
    let resp = app
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    parse_events(&String::from_utf8_lossy(&bytes))
}

fn parse_events(text: &str) -> Vec<(String, Value)> {
    text.split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .map(|frame| {
            let mut name = String::new();
            let mut data = Value::Null;
            for line in frame.lines() {
                if let Some(n) = line.strip_prefix("event: ") {
                    name = n.to_string();
                } else if let Some(d) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(d).unwrap_or(Value::Null);
                }
            }
            (name, data)
        })
        .collect()
}

fn names(events: &[(String, Value)]) -> Vec<&str> {
    events.iter().map(|(n, _)| n.as_str()).collect()
}

/// Reassembled reply of the LAST result frame on the stream.
fn final_reply(events: &[(String, Value)]) -> Value {
    let last_begin = events
        .iter()
        .rposition(|(n, _)| n == "result.begin")
        .expect("a result frame");
    let body: String = events[last_begin..]
        .iter()
        .filter(|(n, _)| n == "result.delta")
        .filter_map(|(_, d)| d["chunk"].as_str().map(str::to_string))
        .collect();
    serde_json::from_str(&body).expect("reply body parses")
}

fn test_config() -> Config {
    Config {
        frame_timeout_ms: 2_000,
        tool_timeout_ms: 1_000,
        ..Config::default()
    }
}

// ---------------------------------------------------------------------------
// Scenario: happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn happy_path_orders_frames_tools_and_reply() {
    let rounds = vec![
        Round::Chunks(vec![
            "Let me plan. ".to_string(),
            obj_frame("o1", "Action", r#"{"type":"search","query":"pizza","limit":3}"#),
            tool_frame("t1", "places.search", r#"{"query":"pizza","limit":3}"#),
        ]),
        Round::Chunks(vec![tool_frame(
            "t2",
            "bookings.create",
            r#"{"place_id":"p1","time":"19:00"}"#,
        )]),
        Round::Chunks(vec![result_frame(
            "r1",
            r#"{"answer":"Booked at Luigi's for 19:00.","citations":["p1"]}"#,
        )]),
    ];
    let (app, artifacts) = harness(test_config(), rounds, |tools| {
        tools.register("places.search", Arc::new(PlacesSearch));
        tools.register("bookings.create", Arc::new(BookingsCreate));
    });

    let events = post_stream(app, json!({"prompt": "Find pizza; book at 7pm"}), None).await;
    let ordered = names(&events);

    let expected_order = [
        "json.begin",
        "json.end",
        "tool.call",
        "tool.result",
        "tool.call",
        "tool.result",
        "result.begin",
        "result.end",
        "done",
    ];
    let mut cursor = 0;
    for expected in expected_order {
        let found = ordered[cursor..]
            .iter()
            .position(|n| *n == expected)
            .unwrap_or_else(|| panic!("missing {expected} after index {cursor} in {ordered:?}"));
        cursor += found + 1;
    }

    // Tool pairing: each tool.result follows its tool.call with the same id.
    let call_ids: Vec<&str> = events
        .iter()
        .filter(|(n, _)| n == "tool.call")
        .map(|(_, d)| d["id"].as_str().unwrap())
        .collect();
    let result_ids: Vec<&str> = events
        .iter()
        .filter(|(n, _)| n == "tool.result")
        .map(|(_, d)| d["id"].as_str().unwrap())
        .collect();
    assert_eq!(call_ids, result_ids);
    assert_eq!(call_ids, vec!["t1", "t2"]);

    // No empty deltas anywhere.
    for (name, data) in &events {
        if name.ends_with(".delta") {
            assert!(!data["chunk"].as_str().unwrap().is_empty());
        }
    }

    let reply = final_reply(&events);
    assert!(reply["answer"].as_str().unwrap().contains("Booked at"));

    let metrics = artifacts.metrics.lock().unwrap().clone().unwrap();
    assert!(!metrics.degraded);
    assert_eq!(metrics.validation.ok_json, 1);
    assert_eq!(metrics.validation.ok_result, 1);
    assert!(metrics.tool_latency_ms.is_some());
}

// ---------------------------------------------------------------------------
// Scenario: tool call and trailing frames in a single delta
// ---------------------------------------------------------------------------

#[tokio::test]
async fn tool_call_followed_by_result_in_same_delta_keeps_pairing() {
    // One stream item carries a complete tool frame AND a complete result
    // frame. The round must abort at the tool call: the tool.result lands
    // before any terminal frame, and the raced-ahead reply of the aborted
    // round never reaches the wire.
    let rounds = vec![
        Round::Chunks(vec![format!(
            "{}{}",
            tool_frame("t1", "places.search", r#"{"query":"pizza"}"#),
            result_frame("r1", r#"{"answer":"premature","citations":[]}"#),
        )]),
        Round::Chunks(vec![result_frame(
            "r2",
            r#"{"answer":"after the tool","citations":[]}"#,
        )]),
    ];
    let (app, _) = harness(test_config(), rounds, |tools| {
        tools.register("places.search", Arc::new(PlacesSearch));
    });

    let events = post_stream(app, json!({"prompt": "go"}), None).await;
    let ordered = names(&events);

    let call = ordered.iter().position(|n| *n == "tool.call").unwrap();
    let result = ordered.iter().position(|n| *n == "tool.result").unwrap();
    let first_begin = ordered.iter().position(|n| *n == "result.begin").unwrap();
    assert!(call < result, "tool.result must follow its tool.call");
    assert!(
        result < first_begin,
        "no result frame may precede the pending tool.result"
    );

    let begin_ids: Vec<&str> = events
        .iter()
        .filter(|(n, _)| n == "result.begin")
        .map(|(_, d)| d["id"].as_str().unwrap())
        .collect();
    assert_eq!(begin_ids, vec!["r2"]);
    assert!(final_reply(&events)["answer"]
        .as_str()
        .unwrap()
        .contains("after the tool"));
    assert!(names(&events).contains(&"done"));
}

#[tokio::test]
async fn second_tool_call_in_same_delta_is_not_dispatched() {
    // Two complete tool frames in one stream item: the round aborts at the
    // first, the second is part of the aborted round. Exactly one
    // tool.call/tool.result pair reaches the wire and only the first
    // executor runs.
    let rounds = vec![
        Round::Chunks(vec![format!(
            "{}{}",
            tool_frame("t1", "echo.op", r#"{"x":1}"#),
            tool_frame("t2", "echo.op", r#"{"x":2}"#),
        )]),
        Round::Chunks(vec![result_frame(
            "r1",
            r#"{"answer":"ok","citations":[]}"#,
        )]),
    ];
    let echo = Arc::new(CountingEcho::new());
    let echo_for_registry = echo.clone();
    let (app, _) = harness(test_config(), rounds, move |tools| {
        tools.register("echo.op", echo_for_registry);
    });

    let events = post_stream(app, json!({"prompt": "go"}), None).await;

    let call_ids: Vec<&str> = events
        .iter()
        .filter(|(n, _)| n == "tool.call")
        .map(|(_, d)| d["id"].as_str().unwrap())
        .collect();
    let result_ids: Vec<&str> = events
        .iter()
        .filter(|(n, _)| n == "tool.result")
        .map(|(_, d)| d["id"].as_str().unwrap())
        .collect();
    assert_eq!(call_ids, vec!["t1"]);
    assert_eq!(result_ids, vec!["t1"]);
    assert_eq!(echo.calls.load(Ordering::SeqCst), 1);

    let (_, tool_result) = events
        .iter()
        .find(|(n, _)| n == "tool.result")
        .expect("tool result");
    assert_eq!(tool_result["result"]["echo"]["x"], 1);
    assert!(names(&events).contains(&"done"));
}

// ---------------------------------------------------------------------------
// Scenario: retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn retry_succeeds_on_second_attempt() {
    let rounds = vec![
        Round::Chunks(vec![tool_frame("t1", "flaky.op", r#"{"key":"{{testKey}}"}"#)]),
        Round::Chunks(vec![result_frame(
            "r1",
            r#"{"answer":"Retry attempts 2","citations":[]}"#,
        )]),
    ];
    let (app, _) = harness(test_config(), rounds, |tools| {
        tools.register("flaky.op", Arc::new(FlakyPerKey::new()));
    });

    let events = post_stream(app, json!({"mode": "retry_test", "testKey": "rt-1"}), None).await;

    let (_, tool_result) = events
        .iter()
        .find(|(n, _)| n == "tool.result")
        .expect("tool result");
    assert_eq!(tool_result["result"]["attempt"], 2);

    let last_delta = events
        .iter()
        .filter(|(n, _)| n == "result.delta")
        .next_back()
        .expect("result delta");
    assert!(last_delta.1["chunk"]
        .as_str()
        .unwrap()
        .contains("Retry attempts 2"));
}

// ---------------------------------------------------------------------------
// Scenario: timeout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timeout_surfaces_error_result_and_flow_continues() {
    let config = Config {
        tool_timeout_ms: 50,
        frame_timeout_ms: 5_000,
        ..Config::default()
    };
    let rounds = vec![
        Round::Chunks(vec![tool_frame("t1", "slow.op", r#"{}"#)]),
        Round::Chunks(vec![result_frame(
            "r1",
            r#"{"answer":"The tool timed out; no booking made.","citations":[]}"#,
        )]),
    ];
    let (app, _) = harness(config, rounds, |tools| {
        tools.register("slow.op", Arc::new(Hanging));
    });

    let events = post_stream(app, json!({"mode": "timeout_test"}), None).await;

    let (_, tool_result) = events
        .iter()
        .find(|(n, _)| n == "tool.result")
        .expect("tool result");
    assert!(tool_result["result"]["error"]
        .as_str()
        .unwrap()
        .contains("timed out"));

    let reply = final_reply(&events);
    assert!(reply["answer"].as_str().unwrap().contains("timed out"));
    assert!(names(&events).contains(&"done"));
}

// ---------------------------------------------------------------------------
// Scenario: backpressure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn backpressure_many_deltas_single_frame() {
    let answer = "b".repeat(600);
    let body = format!(r#"{{"answer":"{answer}","citations":[]}}"#);
    let mut chunks = vec![result_open("r1")];
    for piece in body.as_bytes().chunks(48) {
        chunks.push(String::from_utf8_lossy(piece).to_string());
    }
    chunks.push(result_close("r1"));
    let rounds = vec![Round::Chunks(chunks)];
    let (app, _) = harness(test_config(), rounds, |_| {});

    let events = post_stream(app, json!({"mode": "backpressure_test"}), None).await;
    let ordered = names(&events);

    let deltas = ordered.iter().filter(|n| **n == "result.delta").count();
    assert!(deltas >= 10, "expected >= 10 deltas, got {deltas}");
    assert_eq!(ordered.iter().filter(|n| **n == "result.begin").count(), 1);
    assert_eq!(ordered.iter().filter(|n| **n == "result.end").count(), 1);

    let reply = final_reply(&events);
    assert_eq!(reply["answer"].as_str().unwrap().len(), 600);
}

// ---------------------------------------------------------------------------
// Scenario: repair
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_reply_is_repaired_and_marked_degraded() {
    let rounds = vec![Round::Chunks(vec![result_frame(
        "r1",
        r#"{"wrong":"shape"}"#,
    )])];
    let (app, artifacts) = harness(test_config(), rounds, |_| {});

    let events = post_stream(app, json!({"mode": "repair_test"}), None).await;

    // Two result frames: the failed one, then the repaired replacement
    // under a fresh id.
    let begins: Vec<&str> = events
        .iter()
        .filter(|(n, _)| n == "result.begin")
        .map(|(_, d)| d["id"].as_str().unwrap())
        .collect();
    assert_eq!(begins.len(), 2);
    assert_ne!(begins[0], begins[1]);

    let reply = final_reply(&events);
    assert_eq!(reply["diagnostics"]["error"], "schema_repair_failed");
    assert!(reply["diagnostics"]["last_validator_errors"]
        .as_str()
        .unwrap()
        .contains("answer"));

    let metrics = artifacts.metrics.lock().unwrap().clone().unwrap();
    assert!(metrics.degraded);
    assert_eq!(metrics.validation.bad_result, 1);
    assert!(names(&events).contains(&"done"));
}

// ---------------------------------------------------------------------------
// Scenario: idempotency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn idempotency_key_dedupes_tool_invocations() {
    let rounds = vec![
        Round::Chunks(vec![tool_frame("t1", "flaky.op", r#"{"key":"{{testKey}}"}"#)]),
        Round::Chunks(vec![result_frame(
            "r1",
            r#"{"answer":"ok","citations":[]}"#,
        )]),
    ];
    let (app, _) = harness(test_config(), rounds, |tools| {
        tools.register("flaky.op", Arc::new(FlakyPerKey::new()));
    });

    let body = json!({"mode": "retry_test", "testKey": "idem-A"});
    let first = post_stream(app.clone(), body.clone(), Some("key-1")).await;
    let second = post_stream(app.clone(), body, Some("key-1")).await;

    let result_of = |events: &[(String, Value)]| {
        events
            .iter()
            .find(|(n, _)| n == "tool.result")
            .map(|(_, d)| d.clone())
            .expect("tool result")
    };
    let r1 = result_of(&first);
    let r2 = result_of(&second);
    assert_eq!(
        serde_json::to_vec(&r1["result"]).unwrap(),
        serde_json::to_vec(&r2["result"]).unwrap(),
        "cached results must be byte-equal"
    );
    assert_eq!(r1["result"]["attempt"], 2);

    // Different key and different args: executes afresh, still succeeds on
    // its second attempt.
    let third = post_stream(
        app,
        json!({"mode": "retry_test", "testKey": "idem-B"}),
        Some("key-2"),
    )
    .await;
    assert_eq!(result_of(&third)["result"]["attempt"], 2);
}

#[tokio::test]
async fn idempotency_cache_prevents_reexecution() {
    let rounds = vec![
        Round::Chunks(vec![tool_frame("t1", "echo.op", r#"{"x":1}"#)]),
        Round::Chunks(vec![result_frame(
            "r1",
            r#"{"answer":"ok","citations":[]}"#,
        )]),
    ];
    let echo = Arc::new(CountingEcho::new());
    let echo_for_registry = echo.clone();
    let (app, _) = harness(test_config(), rounds, move |tools| {
        tools.register("echo.op", echo_for_registry);
    });

    post_stream(app.clone(), json!({"prompt": "go"}), Some("same-key")).await;
    post_stream(app, json!({"prompt": "go"}), Some("same-key")).await;

    assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Scenario: silence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn frame_silence_emits_exactly_one_timeout_error() {
    let config = Config {
        frame_timeout_ms: 100,
        ..Config::default()
    };
    let rounds = vec![Round::ChunksThenHang(vec!["just text, no frames".to_string()])];
    let (app, _) = harness(config, rounds, |_| {});

    let events = post_stream(app, json!({"mode": "silence_test"}), None).await;

    let errors: Vec<&Value> = events
        .iter()
        .filter(|(n, _)| n == "error")
        .map(|(_, d)| d)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["code"], "frame_timeout");
    assert!(!names(&events).contains(&"done"));
}

// ---------------------------------------------------------------------------
// Scenario: provider fallback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn provider_without_result_falls_back_degraded() {
    let rounds = vec![Round::Chunks(vec![
        "I have opinions but no frames.".to_string(),
    ])];
    let (app, artifacts) = harness(test_config(), rounds, |_| {});

    let events = post_stream(app, json!({"mode": "provider_fallback_test"}), None).await;

    let reply = final_reply(&events);
    assert_eq!(reply["diagnostics"]["error"], "provider_no_result");
    assert_eq!(reply["answer"], "");

    let metrics = artifacts.metrics.lock().unwrap().clone().unwrap();
    assert!(metrics.degraded);
    assert!(names(&events).contains(&"done"));
}

// ---------------------------------------------------------------------------
// Scenario: provider transport failure
// ---------------------------------------------------------------------------

struct FailingProvider;

#[async_trait]
impl ProviderClient for FailingProvider {
    async fn stream_round(&self, _request: ProviderRequest) -> Result<TokenStream, ProviderError> {
        Err(ProviderError::Status {
            status: 503,
            body: "unavailable".to_string(),
        })
    }
}

#[tokio::test]
async fn provider_error_surfaces_internal_error() {
    let artifacts = Arc::new(RecordingArtifacts::default());
    let deps = SessionDeps {
        config: Arc::new(test_config()),
        provider: Arc::new(FailingProvider),
        schemas: Arc::new(builtin_registry()),
        tools: Arc::new(ToolRegistry::new()),
        idempotency: Arc::new(IdempotencyCache::new()),
        artifacts: artifacts.clone(),
    };
    let app = server::build_router(deps);

    let events = post_stream(app, json!({"prompt": "hi"}), None).await;
    let (_, error) = events
        .iter()
        .find(|(n, _)| n == "error")
        .expect("error event");
    assert_eq!(error["code"], "internal_error");
    assert!(!names(&events).contains(&"done"));
}

// ---------------------------------------------------------------------------
// Scenario: client cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_client_never_observes_done() {
    let rounds = vec![Round::Chunks(vec![result_frame(
        "r1",
        r#"{"answer":"plenty of content streaming here","citations":[]}"#,
    )])];
    let artifacts = Arc::new(RecordingArtifacts::default());
    let deps = SessionDeps {
        config: Arc::new(test_config()),
        provider: Arc::new(ScriptedProvider { rounds }),
        schemas: Arc::new(builtin_registry()),
        tools: Arc::new(ToolRegistry::new()),
        idempotency: Arc::new(IdempotencyCache::new()),
        artifacts: artifacts.clone(),
    };

    // A byte sink with room for one chunk; the "client" reads two events
    // and disconnects.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<bytes::Bytes>(1);
    let emitter = EventEmitter::new(ChannelSink::new(tx), 8);

    let reader = tokio::spawn(async move {
        let mut seen = String::new();
        for _ in 0..2 {
            if let Some(chunk) = rx.recv().await {
                seen.push_str(&String::from_utf8_lossy(&chunk));
            }
        }
        drop(rx); // client disconnect
        seen
    });

    run_session(
        deps,
        StreamRequest {
            prompt: Some("hi".to_string()),
            mode: None,
            test_key: None,
        },
        None,
        emitter,
    )
    .await;

    let seen = reader.await.unwrap();
    assert!(seen.contains("event: result.begin"));
    assert!(!seen.contains("event: done"));

    // The session still recorded its metrics locally.
    assert!(artifacts.metrics.lock().unwrap().is_some());
}
