// Wire event model.
//
// These are the canonical outbound events every downstream component
// operates on: the tokenizer produces the frame-lifecycle subset, the
// orchestrator inserts tool results, the session controller adds the
// terminal events, and the emitter serializes all of them to the wire.

use serde_json::{json, Value};

/// One event on the outbound client stream.
///
/// The variant set is exactly the wire vocabulary: frame lifecycle events
/// for the three frame kinds, tool results, errors, the heartbeat, and the
/// terminal `done`.
#[derive(Debug, Clone, PartialEq)]
pub enum WireEvent {
    JsonBegin { id: String, schema: String },
    JsonDelta { id: String, chunk: String },
    JsonEnd { id: String, length: usize },
    ToolCall { id: String, name: String, args: Value },
    ToolResult { id: String, name: String, result: Value },
    ResultBegin { id: String, schema: String },
    ResultDelta { id: String, chunk: String },
    ResultEnd { id: String, length: usize },
    Error { code: String, message: String },
    Ping,
    Done,
}

impl WireEvent {
    /// The SSE `event:` name for this event.
    pub fn name(&self) -> &'static str {
        match self {
            WireEvent::JsonBegin { .. } => "json.begin",
            WireEvent::JsonDelta { .. } => "json.delta",
            WireEvent::JsonEnd { .. } => "json.end",
            WireEvent::ToolCall { .. } => "tool.call",
            WireEvent::ToolResult { .. } => "tool.result",
            WireEvent::ResultBegin { .. } => "result.begin",
            WireEvent::ResultDelta { .. } => "result.delta",
            WireEvent::ResultEnd { .. } => "result.end",
            WireEvent::Error { .. } => "error",
            WireEvent::Ping => "ping",
            WireEvent::Done => "done",
        }
    }

    /// The SSE `data:` payload for this event.
    pub fn data(&self) -> Value {
        match self {
            WireEvent::JsonBegin { id, schema } | WireEvent::ResultBegin { id, schema } => {
                json!({ "id": id, "schema": schema })
            }
            WireEvent::JsonDelta { id, chunk } | WireEvent::ResultDelta { id, chunk } => {
                json!({ "id": id, "chunk": chunk })
            }
            WireEvent::JsonEnd { id, length } | WireEvent::ResultEnd { id, length } => {
                json!({ "id": id, "length": length })
            }
            WireEvent::ToolCall { id, name, args } => {
                json!({ "id": id, "name": name, "args": args })
            }
            WireEvent::ToolResult { id, name, result } => {
                json!({ "id": id, "name": name, "result": result })
            }
            WireEvent::Error { code, message } => {
                json!({ "code": code, "message": message })
            }
            WireEvent::Ping | WireEvent::Done => json!({}),
        }
    }

    /// True for frame lifecycle events: those reset the session's
    /// frame-silence deadline. Heartbeats and errors do not.
    pub fn is_frame_lifecycle(&self) -> bool {
        !matches!(
            self,
            WireEvent::Error { .. } | WireEvent::Ping | WireEvent::Done
        )
    }
}
