// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

// Tool execution: the executor trait, the name registry, and the
// invocation record the orchestrator produces for every tool call.

mod idempotency;
mod orchestrator;

pub use idempotency::IdempotencyCache;
pub use orchestrator::{ToolOrchestrator, ToolOutcome};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Errors a tool executor can return. Timeouts are enforced by the
/// orchestrator, not by executors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("execution failed: {0}")]
    Failed(String),

    #[error("external service error: {0}")]
    ExternalService(String),
}

/// A registered tool: validated JSON arguments in, JSON result out.
///
/// Implementations must be Send + Sync; the registry shares them across
/// sessions via `Arc`.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, args: Value) -> Result<Value, ToolError>;
}

/// Process-wide tool registry. Registration and lookup are concurrent-safe.
pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
        }
    }

    pub fn register(&self, name: impl Into<String>, executor: Arc<dyn ToolExecutor>) {
        self.tools.insert(name.into(), executor);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolExecutor>> {
        self.tools.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A `tool.call` captured from the frame stream, awaiting orchestration.
#[derive(Debug, Clone)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    /// `Value::Null` when the frame body was not valid JSON.
    pub args: Value,
}

/// Record of one orchestrated tool invocation.
///
/// `result` is the `tool.result` payload: the executor's output on
/// success, `{"error": …}` otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub args: Value,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub idempotency_key: String,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: Value,
}
