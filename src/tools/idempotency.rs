// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

// Idempotency cache: dedupes tool invocations keyed by
// (idempotency key, tool name, canonical args). In-process, no TTL,
// no eviction; lifetime is the process.

use dashmap::DashMap;
use serde_json::Value;

/// Concurrent map from canonical invocation key to cached tool result.
///
/// Shared across all sessions of the process. Two invocations with equal
/// `(key, name, args)` observe byte-equal results.
pub struct IdempotencyCache {
    entries: DashMap<String, Value>,
}

impl IdempotencyCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Canonical key: idempotency key (may be empty) ∥ tool name ∥ the JSON
    /// serialization of the arguments. `serde_json` objects are sorted-key
    /// maps, so structurally equal arguments serialize identically.
    pub fn key(idempotency_key: &str, name: &str, args: &Value) -> String {
        let args_json = serde_json::to_string(args).unwrap_or_default();
        format!("{idempotency_key}{name}{args_json}")
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, key: String, result: Value) {
        self.entries.insert(key, result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new()
    }
}
