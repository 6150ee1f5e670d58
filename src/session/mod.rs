// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

// Stream session controller.
//
// Owns the lifecycle of one request: drives provider rounds through the
// tokenizer, records validation notes, orchestrates tool calls between
// rounds, enforces the frame-silence deadline, decides fallback and
// repair, writes artifacts, and terminates cleanly. Frame handling is
// strictly serialized within the session.

use crate::artifacts::ArtifactsSink;
use crate::config::Config;
use crate::emitter::EventEmitter;
use crate::event::WireEvent;
use crate::provider::{
    ProviderClient, ProviderMessage, ProviderParams, ProviderRequest, Role,
};
use crate::repair::RepairPolicy;
use crate::schema::{SchemaRegistry, ValidationNote, ASSISTANT_REPLY};
use crate::stream::{FrameEvent, FrameKind, SentinelTokenizer};
use crate::tools::{IdempotencyCache, PendingToolCall, ToolOrchestrator, ToolRegistry};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Request, metrics, dependencies
// ---------------------------------------------------------------------------

/// Inbound request body of `POST /v1/stream`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamRequest {
    pub prompt: Option<String>,
    pub mode: Option<String>,
    #[serde(rename = "testKey")]
    pub test_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationCounts {
    pub ok_json: u32,
    pub bad_json: u32,
    pub ok_result: u32,
    pub bad_result: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionMetrics {
    pub total_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_latency_ms: Option<u64>,
    pub model: String,
    pub validation: ValidationCounts,
    pub degraded: bool,
}

/// Everything a session needs, injected behind trait seams. Shared state
/// across sessions is limited to the idempotency cache and the schema
/// registry; both are race-safe.
#[derive(Clone)]
pub struct SessionDeps {
    pub config: Arc<Config>,
    pub provider: Arc<dyn ProviderClient>,
    pub schemas: Arc<SchemaRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub idempotency: Arc<IdempotencyCache>,
    pub artifacts: Arc<dyn ArtifactsSink>,
}

// ---------------------------------------------------------------------------
// Session driver
// ---------------------------------------------------------------------------

enum SessionEnd {
    Completed,
    Cancelled,
    FrameTimeout,
    ProviderFailure(String),
}

enum RoundEnd {
    Finished,
    ToolPending,
    Cancelled,
    Timeout,
    ProviderFailure(String),
}

/// The single schema-validated frame currently open on the stream.
struct OpenFrameInfo {
    schema: String,
    kind: FrameKind,
}

/// Induced-failure orchestration paths run without retries.
fn retries_override(mode: Option<&str>) -> Option<u32> {
    match mode {
        Some("timeout_test") => Some(0),
        _ => None,
    }
}

/// Run one session to completion. Spawned per request; never panics the
/// server — all failure paths surface as `error` events.
pub async fn run_session(
    deps: SessionDeps,
    request: StreamRequest,
    idempotency_key: Option<String>,
    emitter: EventEmitter,
) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let started = Instant::now();

    deps.artifacts.write_prompt(&json!({
        "prompt": request.prompt,
        "mode": request.mode,
        "testKey": request.test_key,
        "model": deps.config.model_id,
        "temperature": deps.config.temperature,
        "seed": deps.config.seed,
        "maxTokens": deps.config.max_tokens,
    }));

    tracing::info!(
        session_id = %session_id,
        model = %deps.config.model_id,
        mode = request.mode.as_deref().unwrap_or(""),
        "session started"
    );

    let mut session = Session::new(&deps, idempotency_key, emitter, session_id);
    let end = session.drive(&deps, &request).await;
    session.finish(&deps, end, started).await;
}

struct Session {
    session_id: String,
    emitter: EventEmitter,
    tokenizer: SentinelTokenizer,
    repair: RepairPolicy,
    idempotency_key: String,
    deadline: Instant,
    frame_timeout: Duration,
    open_frame: Option<OpenFrameInfo>,
    validator_buf: String,
    notes: Vec<ValidationNote>,
    counts: ValidationCounts,
    result_seen: bool,
    last_reply: Option<Value>,
    degraded: bool,
    tool_latency_ms: u64,
    ran_tools: bool,
}

impl Session {
    fn new(
        deps: &SessionDeps,
        idempotency_key: Option<String>,
        emitter: EventEmitter,
        session_id: String,
    ) -> Self {
        let frame_timeout = Duration::from_millis(deps.config.frame_timeout_ms);
        Self {
            session_id,
            emitter,
            tokenizer: SentinelTokenizer::new(),
            repair: RepairPolicy::new(deps.config.repair_retries),
            idempotency_key: idempotency_key.unwrap_or_default(),
            deadline: Instant::now() + frame_timeout,
            frame_timeout,
            open_frame: None,
            validator_buf: String::new(),
            notes: Vec::new(),
            counts: ValidationCounts::default(),
            result_seen: false,
            last_reply: None,
            degraded: false,
            tool_latency_ms: 0,
            ran_tools: false,
        }
    }

    // -----------------------------------------------------------------------
    // Round loop
    // -----------------------------------------------------------------------

    async fn drive(&mut self, deps: &SessionDeps, request: &StreamRequest) -> SessionEnd {
        let orchestrator = ToolOrchestrator::new(
            deps.tools.clone(),
            deps.idempotency.clone(),
            Duration::from_millis(deps.config.tool_timeout_ms),
            deps.config.tool_retries,
        );
        let params = ProviderParams {
            model: deps.config.model_id.clone(),
            temperature: deps.config.temperature,
            seed: deps.config.seed,
            max_tokens: deps.config.max_tokens,
        };

        let initial = match (&request.prompt, &request.mode) {
            (Some(p), _) if !p.is_empty() => p.clone(),
            (_, Some(m)) => m.clone(),
            _ => String::new(),
        };
        let mut messages = vec![ProviderMessage::new(Role::User, initial)];

        for round in 0..deps.config.max_rounds {
            if self.emitter.is_closed() {
                return SessionEnd::Cancelled;
            }

            let provider_request = ProviderRequest {
                messages: messages.clone(),
                params: params.clone(),
                mode: request.mode.clone(),
                test_key: request.test_key.clone(),
            };

            let mut stream = tokio::select! {
                result = deps.provider.stream_round(provider_request) => match result {
                    Ok(stream) => stream,
                    Err(e) => return SessionEnd::ProviderFailure(e.to_string()),
                },
                () = tokio::time::sleep_until(self.deadline) => return SessionEnd::FrameTimeout,
            };

            let mut pending: Option<PendingToolCall> = None;
            let round_end = loop {
                tokio::select! {
                    delta = stream.next() => match delta {
                        Some(Ok(text)) => {
                            let events = self.tokenizer.feed(&text);
                            for ev in events {
                                self.handle_frame_event(deps, ev, &mut pending).await;
                                if pending.is_some() {
                                    // The round aborts at the first tool
                                    // call; trailing events in this delta
                                    // belong to the aborted round. Nothing
                                    // may reach the wire between a
                                    // tool.call and its tool.result.
                                    break;
                                }
                            }
                            if self.emitter.is_closed() {
                                break RoundEnd::Cancelled;
                            }
                            if pending.is_some() {
                                // Abort the round: the tool runs before the
                                // provider speaks again.
                                break RoundEnd::ToolPending;
                            }
                        }
                        Some(Err(e)) => break RoundEnd::ProviderFailure(e.to_string()),
                        None => break RoundEnd::Finished,
                    },
                    () = tokio::time::sleep_until(self.deadline) => break RoundEnd::Timeout,
                }
            };
            drop(stream);

            let (tail, left_open) = self.tokenizer.finish();
            for ev in tail {
                if pending.is_some() {
                    break;
                }
                self.handle_frame_event(deps, ev, &mut pending).await;
            }
            if let Some(open) = left_open {
                tracing::warn!(
                    session_id = %self.session_id,
                    frame_id = %open.id,
                    kind = open.kind.as_str(),
                    "frame left open at round end"
                );
                if open.kind == FrameKind::Object {
                    self.record_note(ValidationNote {
                        id: open.id,
                        schema: open.label,
                        kind: open.kind.as_str(),
                        ok: false,
                        errors: vec!["frame not closed".to_string()],
                    });
                }
                self.open_frame = None;
            }

            match round_end {
                RoundEnd::Cancelled => return SessionEnd::Cancelled,
                RoundEnd::Timeout => return SessionEnd::FrameTimeout,
                RoundEnd::ProviderFailure(msg) => return SessionEnd::ProviderFailure(msg),
                RoundEnd::ToolPending => {
                    let Some(call) = pending.take() else {
                        return SessionEnd::Completed;
                    };
                    let tool_started = Instant::now();
                    let outcome = orchestrator
                        .run(
                            &call,
                            &self.idempotency_key,
                            retries_override(request.mode.as_deref()),
                        )
                        .await;
                    self.tool_latency_ms += tool_started.elapsed().as_millis() as u64;
                    self.ran_tools = true;

                    // A client that went away mid-tool keeps the local result
                    // (and cache entry) but observes nothing further.
                    self.emit(
                        deps,
                        WireEvent::ToolResult {
                            id: call.id.clone(),
                            name: call.name.clone(),
                            result: outcome.invocation.result.clone(),
                        },
                    )
                    .await;

                    messages.push(ProviderMessage::new(
                        Role::User,
                        format!(
                            "TOOL_RESULT id={} name={}\n{}",
                            call.id, call.name, outcome.invocation.result
                        ),
                    ));
                    tracing::debug!(
                        session_id = %self.session_id,
                        round,
                        tool = %call.name,
                        attempts = outcome.invocation.attempts,
                        from_cache = outcome.from_cache,
                        "tool round completed"
                    );
                }
                RoundEnd::Finished => break,
            }
        }

        SessionEnd::Completed
    }

    // -----------------------------------------------------------------------
    // Frame event dispatch
    // -----------------------------------------------------------------------

    async fn handle_frame_event(
        &mut self,
        deps: &SessionDeps,
        event: FrameEvent,
        pending: &mut Option<PendingToolCall>,
    ) {
        match event {
            // Inter-frame text is discardable; clients only see frames.
            FrameEvent::Text { .. } => {}

            FrameEvent::JsonBegin { id, schema } => {
                self.open_frame = Some(OpenFrameInfo {
                    schema: schema.clone(),
                    kind: FrameKind::Object,
                });
                self.validator_buf.clear();
                self.emit(deps, WireEvent::JsonBegin { id, schema }).await;
            }
            FrameEvent::JsonDelta { id, chunk } => {
                self.validator_buf.push_str(&chunk);
                self.emit(deps, WireEvent::JsonDelta { id, chunk }).await;
            }
            FrameEvent::JsonEnd { id, length } => {
                self.emit(
                    deps,
                    WireEvent::JsonEnd {
                        id: id.clone(),
                        length,
                    },
                )
                .await;
                if let Some(open) = self.open_frame.take() {
                    let outcome =
                        deps.schemas
                            .validate_frame(open.kind, &id, &open.schema, &self.validator_buf);
                    if !outcome.note.ok {
                        tracing::warn!(
                            session_id = %self.session_id,
                            frame_id = %id,
                            schema = %open.schema,
                            errors = ?outcome.note.errors,
                            "object frame failed validation"
                        );
                    }
                    self.record_note(outcome.note);
                }
            }

            FrameEvent::ToolCall { id, name, args } => {
                self.emit(
                    deps,
                    WireEvent::ToolCall {
                        id: id.clone(),
                        name: name.clone(),
                        args: args.clone(),
                    },
                )
                .await;
                *pending = Some(PendingToolCall { id, name, args });
            }

            FrameEvent::ResultBegin { id, schema } => {
                self.open_frame = Some(OpenFrameInfo {
                    schema: schema.clone(),
                    kind: FrameKind::Result,
                });
                self.validator_buf.clear();
                self.emit(deps, WireEvent::ResultBegin { id, schema }).await;
            }
            FrameEvent::ResultDelta { id, chunk } => {
                self.validator_buf.push_str(&chunk);
                self.emit(deps, WireEvent::ResultDelta { id, chunk }).await;
            }
            FrameEvent::ResultEnd { id, length } => {
                self.emit(
                    deps,
                    WireEvent::ResultEnd {
                        id: id.clone(),
                        length,
                    },
                )
                .await;
                self.result_seen = true;
                let Some(open) = self.open_frame.take() else {
                    return;
                };
                let outcome =
                    deps.schemas
                        .validate_frame(open.kind, &id, &open.schema, &self.validator_buf);
                let note = outcome.note.clone();
                self.record_note(outcome.note);
                if note.ok {
                    self.last_reply = outcome.value;
                } else if let Some(repaired) = self.repair.try_repair(&note) {
                    tracing::warn!(
                        session_id = %self.session_id,
                        frame_id = %id,
                        errors = ?note.errors,
                        "reply failed validation; emitting repaired reply"
                    );
                    self.emit_result_frame(deps, &repaired).await;
                    self.degraded = true;
                    self.last_reply = Some(repaired);
                } else {
                    self.degraded = true;
                }
            }
        }
    }

    /// Emit a synthesized result frame (repair or fallback) with a new id.
    async fn emit_result_frame(&mut self, deps: &SessionDeps, reply: &Value) {
        let id = format!("r-{}", uuid::Uuid::new_v4());
        let body = reply.to_string();
        self.emit(
            deps,
            WireEvent::ResultBegin {
                id: id.clone(),
                schema: ASSISTANT_REPLY.to_string(),
            },
        )
        .await;
        self.emit(
            deps,
            WireEvent::ResultDelta {
                id: id.clone(),
                chunk: body.clone(),
            },
        )
        .await;
        self.emit(
            deps,
            WireEvent::ResultEnd {
                id,
                length: body.len(),
            },
        )
        .await;
        self.result_seen = true;
    }

    /// Write one event to the artifacts log and the emitter. Frame
    /// lifecycle events reset the silence deadline; nothing is written
    /// once the client is gone.
    async fn emit(&mut self, deps: &SessionDeps, event: WireEvent) {
        if self.emitter.is_closed() {
            return;
        }
        if event.is_frame_lifecycle() {
            self.deadline = Instant::now() + self.frame_timeout;
        }
        deps.artifacts.append_frame(event.name(), &event.data());
        self.emitter.send(event).await;
    }

    fn record_note(&mut self, note: ValidationNote) {
        match note.kind {
            "result" => {
                if note.ok {
                    self.counts.ok_result += 1;
                } else {
                    self.counts.bad_result += 1;
                }
            }
            _ => {
                if note.ok {
                    self.counts.ok_json += 1;
                } else {
                    self.counts.bad_json += 1;
                }
            }
        }
        self.notes.push(note);
    }

    // -----------------------------------------------------------------------
    // Termination
    // -----------------------------------------------------------------------

    async fn finish(mut self, deps: &SessionDeps, end: SessionEnd, started: Instant) {
        match end {
            SessionEnd::Cancelled => {
                // Client went away: suppress all further writes, no done.
                tracing::info!(session_id = %self.session_id, "session cancelled by client");
            }
            SessionEnd::FrameTimeout => {
                tracing::warn!(session_id = %self.session_id, "frame-silence deadline expired");
                self.emit(
                    deps,
                    WireEvent::Error {
                        code: "frame_timeout".to_string(),
                        message: format!(
                            "no frame activity within {}ms",
                            self.frame_timeout.as_millis()
                        ),
                    },
                )
                .await;
            }
            SessionEnd::ProviderFailure(msg) => {
                tracing::error!(session_id = %self.session_id, error = %msg, "provider failure");
                self.emit(
                    deps,
                    WireEvent::Error {
                        code: "internal_error".to_string(),
                        message: "provider request failed".to_string(),
                    },
                )
                .await;
            }
            SessionEnd::Completed => {
                if !self.result_seen {
                    let fallback = json!({
                        "answer": "",
                        "citations": [],
                        "diagnostics": {
                            "error": "provider_no_result",
                            "model": deps.config.model_id,
                        }
                    });
                    tracing::warn!(
                        session_id = %self.session_id,
                        "no result frame observed; emitting fallback reply"
                    );
                    self.emit_result_frame(deps, &fallback).await;
                    self.degraded = true;
                    self.last_reply = Some(fallback);
                }
                self.emit(deps, WireEvent::Done).await;
            }
        }

        if let Some(reply) = &self.last_reply {
            deps.artifacts.write_result(reply);
        }
        let metrics = SessionMetrics {
            total_ms: started.elapsed().as_millis() as u64,
            tool_latency_ms: self.ran_tools.then_some(self.tool_latency_ms),
            model: deps.config.model_id.clone(),
            validation: self.counts.clone(),
            degraded: self.degraded,
        };
        deps.artifacts.write_metrics(&metrics);
        tracing::info!(
            session_id = %self.session_id,
            total_ms = metrics.total_ms,
            degraded = metrics.degraded,
            frames_validated = self.notes.len(),
            "session finished"
        );

        self.emitter.close().await;
        self.emitter.join().await;
    }
}
