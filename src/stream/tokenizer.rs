// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

// Sentinel tokenizer and frame demultiplexer.
//
// A push-driven parser: callers feed text chunks of arbitrary size and
// boundaries, and receive a totally ordered sequence of frame lifecycle
// events. The parser is restart-safe across feeds and never backtracks
// across an emitted event.
//
// Outside a frame it scans for an opening sentinel header; inside a frame
// it scans for the matching end sentinel, tracking JSON string literals so
// bracket characters inside strings never terminate a frame.

use super::types::{
    FrameEvent, FrameKind, FrameState, OpenFrame, BRACKET_CLOSE, BRACKET_OPEN, MAX_HEADER_BYTES,
};
use regex::Regex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Header grammar
// ---------------------------------------------------------------------------

static HEADER_RE: OnceLock<Regex> = OnceLock::new();

fn header_re() -> &'static Regex {
    HEADER_RE.get_or_init(|| {
        Regex::new(&format!(
            "^{open}BEGIN_(OBJECT|TOOL_CALL|RESULT) id=([A-Za-z0-9_.:-]+) (schema|name)=([A-Za-z0-9_.:-]+){close}$",
            open = BRACKET_OPEN,
            close = BRACKET_CLOSE,
        ))
        .expect("sentinel header pattern compiles")
    })
}

/// Parse a complete `⟦...⟧` candidate as an opening sentinel header.
///
/// Strict by construction: unknown kinds, missing fields, and a field name
/// that does not match the kind (`schema=` for object/result, `name=` for
/// tool calls) are all rejected. End sentinels never match (they carry
/// `END_`, not `BEGIN_`).
fn parse_header(candidate: &str) -> Option<(FrameKind, String, String)> {
    let caps = header_re().captures(candidate)?;
    let kind = match &caps[1] {
        "OBJECT" => FrameKind::Object,
        "TOOL_CALL" => FrameKind::Tool,
        "RESULT" => FrameKind::Result,
        _ => return None,
    };
    let field_ok = match kind {
        FrameKind::Tool => &caps[3] == "name",
        FrameKind::Object | FrameKind::Result => &caps[3] == "schema",
    };
    if !field_ok {
        return None;
    }
    Some((kind, caps[2].to_string(), caps[4].to_string()))
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

enum State {
    Outside,
    Inside {
        frame: FrameState,
        /// The exact closing sentinel for the active frame (the opening
        /// header with `BEGIN_` replaced by `END_`).
        end_token: String,
        /// JSON string tracker: inside an unterminated string literal.
        in_string: bool,
        /// JSON string tracker: previous char was a backslash escape.
        escaped: bool,
    },
}

/// Where the inside-scan stopped relative to the unconsumed buffer.
enum ScanOutcome {
    /// The whole buffer is frame body.
    Consumed,
    /// A prefix of the end sentinel starts at this byte offset; retain it.
    Partial(usize),
    /// The complete end sentinel starts at this byte offset.
    Close(usize),
}

/// Push-driven sentinel tokenizer. One instance per session; frame ids are
/// unique for the lifetime of the instance.
pub struct SentinelTokenizer {
    buf: String,
    state: State,
    seen_ids: HashSet<String>,
}

impl SentinelTokenizer {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            state: State::Outside,
            seen_ids: HashSet::new(),
        }
    }

    /// Feed one chunk; returns every event completed by this chunk, in
    /// stream order. Partial headers and partial end sentinels are retained
    /// for the next feed.
    pub fn feed(&mut self, chunk: &str) -> Vec<FrameEvent> {
        self.buf.push_str(chunk);
        let mut events = Vec::new();
        loop {
            let progressed = if matches!(self.state, State::Outside) {
                self.scan_outside(&mut events)
            } else {
                self.scan_inside(&mut events)
            };
            if !progressed {
                break;
            }
        }
        events
    }

    /// End of input. Flushes retained text and reports a frame left open
    /// (invariant violation: every opened frame must be closed). The
    /// tokenizer resets to the outside state but keeps its id registry, so
    /// a session may finish one provider round and feed the next.
    pub fn finish(&mut self) -> (Vec<FrameEvent>, Option<OpenFrame>) {
        let mut events = Vec::new();
        let state = std::mem::replace(&mut self.state, State::Outside);
        let open = match state {
            State::Outside => {
                let text = std::mem::take(&mut self.buf);
                push_text(&mut events, text);
                None
            }
            State::Inside { frame, .. } => {
                self.buf.clear();
                Some(OpenFrame {
                    kind: frame.kind,
                    id: frame.id,
                    label: frame.label,
                })
            }
        };
        (events, open)
    }

    // -----------------------------------------------------------------------
    // Outside: scan for an opening header
    // -----------------------------------------------------------------------

    fn scan_outside(&mut self, events: &mut Vec<FrameEvent>) -> bool {
        if self.buf.is_empty() {
            return false;
        }

        let Some(pos) = self.buf.find(BRACKET_OPEN) else {
            let text = std::mem::take(&mut self.buf);
            push_text(events, text);
            return false;
        };

        if pos > 0 {
            let text: String = self.buf.drain(..pos).collect();
            push_text(events, text);
        }

        // Opening bracket is now at offset 0.
        let Some(close_pos) = self.buf.find(BRACKET_CLOSE) else {
            if self.buf.len() > MAX_HEADER_BYTES {
                // No header fits anymore; release the bracket as text and
                // rescan the remainder.
                let text: String = self.buf.drain(..BRACKET_OPEN.len_utf8()).collect();
                push_text(events, text);
                return true;
            }
            // A header may still be completing; retain.
            return false;
        };

        let end = close_pos + BRACKET_CLOSE.len_utf8();
        let candidate = self.buf[..end].to_string();

        match parse_header(&candidate) {
            Some((kind, id, label)) => {
                if !self.seen_ids.insert(id.clone()) {
                    tracing::warn!(frame_id = %id, "duplicate frame id; header treated as text");
                    self.buf.drain(..end);
                    push_text(events, candidate);
                    return true;
                }
                self.buf.drain(..end);
                match kind {
                    FrameKind::Object => events.push(FrameEvent::JsonBegin {
                        id: id.clone(),
                        schema: label.clone(),
                    }),
                    FrameKind::Result => events.push(FrameEvent::ResultBegin {
                        id: id.clone(),
                        schema: label.clone(),
                    }),
                    // Tool frames emit nothing at open.
                    FrameKind::Tool => {}
                }
                let end_token = candidate.replacen("BEGIN_", "END_", 1);
                self.state = State::Inside {
                    frame: FrameState::new(kind, id, label),
                    end_token,
                    in_string: false,
                    escaped: false,
                };
                true
            }
            None => {
                // Malformed header or stray end sentinel: text. Flush only up
                // to the next opening bracket inside the candidate, if any, so
                // a real header following it is still recognized.
                let cut = self.buf[BRACKET_OPEN.len_utf8()..end]
                    .find(BRACKET_OPEN)
                    .map(|p| p + BRACKET_OPEN.len_utf8())
                    .unwrap_or(end);
                let text: String = self.buf.drain(..cut).collect();
                push_text(events, text);
                true
            }
        }
    }

    // -----------------------------------------------------------------------
    // Inside: scan for the matching end sentinel outside JSON strings
    // -----------------------------------------------------------------------

    fn scan_inside(&mut self, events: &mut Vec<FrameEvent>) -> bool {
        let (end_token, mut in_string, mut escaped) = match &self.state {
            State::Inside {
                end_token,
                in_string,
                escaped,
                ..
            } => (end_token.clone(), *in_string, *escaped),
            State::Outside => return false,
        };
        if self.buf.is_empty() {
            return false;
        }

        let mut outcome = ScanOutcome::Consumed;
        for (i, ch) in self.buf.char_indices() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == '"' {
                    in_string = false;
                }
            } else if ch == '"' {
                in_string = true;
            } else if ch == BRACKET_OPEN {
                let rest = &self.buf[i..];
                if rest.starts_with(end_token.as_str()) {
                    outcome = ScanOutcome::Close(i);
                    break;
                }
                if rest.len() < end_token.len() && end_token.starts_with(rest) {
                    outcome = ScanOutcome::Partial(i);
                    break;
                }
                // A bracket in the body that is not this frame's end
                // sentinel: plain body content (no nesting).
            }
        }

        match outcome {
            ScanOutcome::Consumed => {
                let body = std::mem::take(&mut self.buf);
                self.append_body(events, body, in_string, escaped);
                false
            }
            ScanOutcome::Partial(i) => {
                let body: String = self.buf.drain(..i).collect();
                self.append_body(events, body, in_string, escaped);
                false
            }
            ScanOutcome::Close(i) => {
                let body: String = self.buf.drain(..i).collect();
                self.buf.drain(..end_token.len());
                self.append_body(events, body, in_string, escaped);

                let state = std::mem::replace(&mut self.state, State::Outside);
                if let State::Inside { frame, .. } = state {
                    match frame.kind {
                        FrameKind::Object => events.push(FrameEvent::JsonEnd {
                            id: frame.id,
                            length: frame.body.len(),
                        }),
                        FrameKind::Result => events.push(FrameEvent::ResultEnd {
                            id: frame.id,
                            length: frame.body.len(),
                        }),
                        FrameKind::Tool => {
                            // args = null when the buffered body is not valid
                            // JSON; the orchestrator surfaces the error.
                            let args = serde_json::from_str::<Value>(frame.body.trim())
                                .unwrap_or(Value::Null);
                            events.push(FrameEvent::ToolCall {
                                id: frame.id,
                                name: frame.label,
                                args,
                            });
                        }
                    }
                }
                true
            }
        }
    }

    /// Append consumed body bytes to the active frame, emitting a delta for
    /// object/result frames. Deltas are never empty.
    fn append_body(
        &mut self,
        events: &mut Vec<FrameEvent>,
        body: String,
        in_string_now: bool,
        escaped_now: bool,
    ) {
        if let State::Inside {
            frame,
            in_string,
            escaped,
            ..
        } = &mut self.state
        {
            *in_string = in_string_now;
            *escaped = escaped_now;
            if body.is_empty() {
                return;
            }
            frame.body.push_str(&body);
            match frame.kind {
                FrameKind::Object => events.push(FrameEvent::JsonDelta {
                    id: frame.id.clone(),
                    chunk: body,
                }),
                FrameKind::Result => events.push(FrameEvent::ResultDelta {
                    id: frame.id.clone(),
                    chunk: body,
                }),
                // Tool bodies are buffered only.
                FrameKind::Tool => {}
            }
        }
    }
}

impl Default for SentinelTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

fn push_text(events: &mut Vec<FrameEvent>, text: String) {
    if !text.is_empty() {
        events.push(FrameEvent::Text { chunk: text });
    }
}
