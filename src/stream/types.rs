// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

// Frame model: kinds, lifecycle events, per-frame accumulation state,
// and the sentinel grammar constants shared by the tokenizer.

use serde_json::Value;

// ---------------------------------------------------------------------------
// Sentinel grammar
// ---------------------------------------------------------------------------

/// Opening bracket of a sentinel, fixed to U+27E6.
pub const BRACKET_OPEN: char = '\u{27E6}';

/// Closing bracket of a sentinel, fixed to U+27E7.
pub const BRACKET_CLOSE: char = '\u{27E7}';

/// Maximum bytes between an opening bracket and its closing bracket before
/// the bracket is flushed as plain text. Bounds retention on stray brackets
/// that never form a header.
pub const MAX_HEADER_BYTES: usize = 256;

// ---------------------------------------------------------------------------
// Frame kinds and lifecycle events
// ---------------------------------------------------------------------------

/// The three frame kinds the sentinel grammar can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Free-standing structured document (`BEGIN_OBJECT`), schema-validated.
    Object,
    /// Tool invocation (`BEGIN_TOOL_CALL`), body buffered until close.
    Tool,
    /// Terminal reply (`BEGIN_RESULT`), schema-validated.
    Result,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Object => "object",
            FrameKind::Tool => "tool",
            FrameKind::Result => "result",
        }
    }
}

/// An event produced by the tokenizer, in stream order.
///
/// `Text` covers bytes between frames; upstream may discard it. The other
/// variants are the frame lifecycle: begin/delta/end for `Object` and
/// `Result` frames, and a single `ToolCall` at the close of a `Tool` frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    Text { chunk: String },
    JsonBegin { id: String, schema: String },
    JsonDelta { id: String, chunk: String },
    JsonEnd { id: String, length: usize },
    ToolCall { id: String, name: String, args: Value },
    ResultBegin { id: String, schema: String },
    ResultDelta { id: String, chunk: String },
    ResultEnd { id: String, length: usize },
}

// ---------------------------------------------------------------------------
// Per-frame state
// ---------------------------------------------------------------------------

/// Accumulation state for the single active frame.
///
/// Created by an opening sentinel, fed by body bytes, destroyed by the
/// closing sentinel. `label` is the schema name for `Object`/`Result`
/// frames and the tool name for `Tool` frames.
#[derive(Debug, Clone)]
pub struct FrameState {
    pub kind: FrameKind,
    pub id: String,
    pub label: String,
    pub body: String,
}

impl FrameState {
    pub fn new(kind: FrameKind, id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            label: label.into(),
            body: String::new(),
        }
    }
}

/// A frame left open when the input ended: invariant (iv) violation,
/// reported by `SentinelTokenizer::finish`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenFrame {
    pub kind: FrameKind,
    pub id: String,
    pub label: String,
}
