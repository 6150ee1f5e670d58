// Repair module: minimal valid fallback for a failed reply validation.
//
// Repair is bounded (`REPAIR_RETRIES`, default 1) and first-order only:
// the minimal object is valid by construction, so a repaired reply is
// never itself repaired.

use crate::schema::ValidationNote;
use serde_json::{json, Value};

/// Per-session repair budget.
pub struct RepairPolicy {
    budget: u32,
    used: u32,
}

impl RepairPolicy {
    pub fn new(budget: u32) -> Self {
        Self { budget, used: 0 }
    }

    /// Attempt a repair for a failed reply note. Returns the minimal valid
    /// reply while budget remains, `None` once the budget is spent.
    pub fn try_repair(&mut self, note: &ValidationNote) -> Option<Value> {
        if self.used >= self.budget {
            return None;
        }
        self.used += 1;
        Some(minimal_reply(note))
    }
}

/// The minimal valid `AssistantReply`, carrying the validator's findings in
/// `diagnostics` so the failure is visible rather than papered over.
fn minimal_reply(note: &ValidationNote) -> Value {
    let serialized_errors =
        serde_json::to_string(&note.errors).unwrap_or_else(|_| "[]".to_string());
    json!({
        "answer": "",
        "citations": [],
        "diagnostics": {
            "error": "schema_repair_failed",
            "last_validator_errors": serialized_errors,
        }
    })
}
