// Provider client: streams textual token deltas for a message list.
//
// The core only needs this trait; the production implementation speaks
// the OpenAI-compatible chat-completions SSE wire format. Cancelling a
// round is dropping the stream.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};
use std::pin::Pin;

// ---------------------------------------------------------------------------
// Message and request types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One message in the conversation sent to the provider.
#[derive(Debug, Clone)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Deterministic sampling parameters forwarded on every round.
#[derive(Debug, Clone)]
pub struct ProviderParams {
    pub model: String,
    pub temperature: f64,
    pub seed: u64,
    pub max_tokens: u32,
}

/// One provider round: the conversation so far plus the request's
/// passthrough fields (`mode`/`test_key` are ignored by real providers;
/// scripted test providers branch on them).
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub messages: Vec<ProviderMessage>,
    pub params: ProviderParams,
    pub mode: Option<String>,
    pub test_key: Option<String>,
}

/// Textual token deltas for one round. Dropping the stream aborts the
/// round; it never aborts the session.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider transport error: {0}")]
    Transport(String),

    #[error("provider returned status {status}")]
    Status { status: u16, body: String },
}

#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn stream_round(&self, request: ProviderRequest) -> Result<TokenStream, ProviderError>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible implementation
// ---------------------------------------------------------------------------

/// Streams `/v1/chat/completions` deltas from any OpenAI-compatible
/// endpoint.
pub struct OpenAiProviderClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiProviderClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl ProviderClient for OpenAiProviderClient {
    async fn stream_round(&self, request: ProviderRequest) -> Result<TokenStream, ProviderError> {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        let body = json!({
            "model": request.params.model,
            "temperature": request.params.temperature,
            "seed": request.params.seed,
            "max_tokens": request.params.max_tokens,
            "stream": true,
            "messages": messages,
        });

        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let mut req = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>> =
            Box::pin(resp.bytes_stream());
        Ok(delta_stream(bytes))
    }
}

// ---------------------------------------------------------------------------
// SSE delta extraction
// ---------------------------------------------------------------------------

enum LineOutcome {
    Delta(String),
    Done,
    Skip,
}

/// Extract the content delta from one SSE line of an OpenAI-compatible
/// stream. Control chunks (role-only deltas, finish reasons, comments)
/// are skipped; `data: [DONE]` terminates.
fn delta_from_line(line: &str) -> LineOutcome {
    let Some(data) = line
        .strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
    else {
        return LineOutcome::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return LineOutcome::Done;
    }
    let Ok(json) = serde_json::from_str::<Value>(data) else {
        return LineOutcome::Skip;
    };
    match json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("delta"))
        .and_then(|d| d.get("content"))
        .and_then(|v| v.as_str())
    {
        Some(content) if !content.is_empty() => LineOutcome::Delta(content.to_string()),
        _ => LineOutcome::Skip,
    }
}

struct LineReassembly {
    inner: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buf: String,
    done: bool,
}

/// Reassemble SSE lines across arbitrary chunk boundaries and yield the
/// textual content deltas.
fn delta_stream(
    bytes: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
) -> TokenStream {
    let state = LineReassembly {
        inner: bytes,
        buf: String::new(),
        done: false,
    };
    Box::pin(futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if st.done {
                return None;
            }
            while let Some(pos) = st.buf.find('\n') {
                let line: String = st.buf.drain(..=pos).collect();
                match delta_from_line(line.trim()) {
                    LineOutcome::Delta(text) => return Some((Ok(text), st)),
                    LineOutcome::Done => {
                        st.done = true;
                        return None;
                    }
                    LineOutcome::Skip => {}
                }
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => st.buf.push_str(&String::from_utf8_lossy(&chunk)),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(ProviderError::Transport(e.to_string())), st));
                }
                None => {
                    st.done = true;
                    let line = std::mem::take(&mut st.buf);
                    if let LineOutcome::Delta(text) = delta_from_line(line.trim()) {
                        return Some((Ok(text), st));
                    }
                    return None;
                }
            }
        }
    }))
}
