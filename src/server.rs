// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

// HTTP surface.
//
// Responsibilities:
// - POST /v1/stream: parse the request, honor Idempotency-Key, spawn the
//   session, stream the emitter's bytes as a text/event-stream response
// - GET /health: liveness probe with the configured model
// - 400 for malformed request bodies

use crate::emitter::{ChannelSink, EventEmitter};
use crate::session::{run_session, SessionDeps, StreamRequest};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Shared state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub deps: SessionDeps,
}

/// Build the router with the stream and health endpoints.
pub fn build_router(deps: SessionDeps) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/stream", post(stream_handler))
        .with_state(AppState { deps })
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(json!({"ok": true, "model": state.deps.config.model_id}))
}

async fn stream_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request: StreamRequest = if body.is_empty() {
        StreamRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                return (
                    StatusCode::BAD_REQUEST,
                    format!("request body is not valid JSON: {e}"),
                )
                    .into_response()
            }
        }
    };

    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    // The response body is the emitter's byte sink; a full channel is the
    // "not drained" signal that suspends the flusher.
    let (tx, rx) = mpsc::channel::<Bytes>(state.deps.config.max_queued_chunks);
    let emitter = EventEmitter::new(
        ChannelSink::new(tx),
        state.deps.config.max_queued_chunks,
    );

    tokio::spawn(run_session(
        state.deps.clone(),
        request,
        idempotency_key,
        emitter,
    ));

    let stream = ReceiverStream::new(rx).map(Ok::<Bytes, std::convert::Infallible>);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache, no-transform")
        .header(header::CONNECTION, "keep-alive")
        .header("x-accel-buffering", "no")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
