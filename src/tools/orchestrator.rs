// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

// Tool orchestrator: executes captured tool calls with timeout, retry,
// and idempotency, producing exactly one result per call.
//
// Per call: Pending → Running → (Succeeded | TimedOut | Errored); a
// non-terminal outcome with attempts remaining loops back to Running
// after a bounded backoff. Every terminal state yields one result.

use super::{IdempotencyCache, PendingToolCall, ToolInvocation, ToolRegistry};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Backoff before retry `attempt + 1`: 100 ms per completed attempt,
/// capped at 500 ms.
fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(u64::from((100 * (attempt + 1)).min(500)))
}

/// Outcome of orchestrating one tool call.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub invocation: ToolInvocation,
    /// True when the result was served from the idempotency cache.
    pub from_cache: bool,
}

/// Orchestrates tool calls against the registry, one at a time.
pub struct ToolOrchestrator {
    registry: Arc<ToolRegistry>,
    cache: Arc<IdempotencyCache>,
    timeout: Duration,
    retries: u32,
}

impl ToolOrchestrator {
    pub fn new(
        registry: Arc<ToolRegistry>,
        cache: Arc<IdempotencyCache>,
        timeout: Duration,
        retries: u32,
    ) -> Self {
        Self {
            registry,
            cache,
            timeout,
            retries,
        }
    }

    /// Run one captured tool call to a terminal state.
    ///
    /// `retries_override` replaces the configured retry budget for induced
    /// failure paths that must not retry.
    pub async fn run(
        &self,
        call: &PendingToolCall,
        idempotency_key: &str,
        retries_override: Option<u32>,
    ) -> ToolOutcome {
        let started_at = Utc::now();
        let finish = |attempts: u32, result: Value, from_cache: bool| ToolOutcome {
            invocation: ToolInvocation {
                id: call.id.clone(),
                name: call.name.clone(),
                args: call.args.clone(),
                idempotency_key: idempotency_key.to_string(),
                attempts,
                started_at,
                finished_at: Utc::now(),
                result,
            },
            from_cache,
        };

        // Malformed frame body: surface the error without executing.
        if call.args.is_null() {
            return finish(0, json!({"error": "malformed tool arguments"}), false);
        }

        let cache_key = IdempotencyCache::key(idempotency_key, &call.name, &call.args);
        if let Some(cached) = self.cache.get(&cache_key) {
            tracing::debug!(tool = %call.name, call_id = %call.id, "idempotency cache hit");
            return finish(0, cached, true);
        }

        let Some(executor) = self.registry.get(&call.name) else {
            return finish(0, json!({"error": "Unknown tool"}), false);
        };

        let retries = retries_override.unwrap_or(self.retries);
        let mut last_error = String::new();

        for attempt in 0..=retries {
            match tokio::time::timeout(self.timeout, executor.execute(call.args.clone())).await {
                Ok(Ok(result)) => {
                    self.cache.insert(cache_key, result.clone());
                    tracing::debug!(
                        tool = %call.name,
                        call_id = %call.id,
                        attempts = attempt + 1,
                        "tool succeeded"
                    );
                    return finish(attempt + 1, result, false);
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                }
                Err(_) => {
                    last_error = format!(
                        "tool '{}' timed out after {}ms",
                        call.name,
                        self.timeout.as_millis()
                    );
                }
            }
            tracing::warn!(
                tool = %call.name,
                call_id = %call.id,
                attempt = attempt + 1,
                error = %last_error,
                "tool attempt failed"
            );
            if attempt < retries {
                tokio::time::sleep(backoff(attempt)).await;
            }
        }

        finish(retries + 1, json!({"error": last_error}), false)
    }
}
