// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

// Built-in schemas registered at startup.
//
// `AssistantReply` is the terminal reply contract every session ends with;
// `Action` and `Extraction` are the demonstration schemas the object frames
// of the stock prompts use.

use super::{FieldDef, FieldType, ObjectSchema, SchemaDef, SchemaRegistry};
use serde_json::json;

/// Schema name of the terminal reply.
pub const ASSISTANT_REPLY: &str = "AssistantReply";

/// A registry pre-populated with the built-in schemas.
pub fn builtin_registry() -> SchemaRegistry {
    let registry = SchemaRegistry::new();
    registry.register(ASSISTANT_REPLY, assistant_reply());
    registry.register("Action", action());
    registry.register("Extraction", extraction());
    registry
}

/// The terminal reply: an answer, its citations, and optional free-form
/// diagnostics (used by the repair and fallback paths).
fn assistant_reply() -> SchemaDef {
    SchemaDef::Object(ObjectSchema::new(vec![
        FieldDef::required("answer", FieldType::string()),
        FieldDef::required("citations", FieldType::array_of(FieldType::string(), 0)),
        FieldDef::optional(
            "diagnostics",
            FieldType::Object(Box::new(ObjectSchema::open(vec![]))),
        ),
    ]))
}

/// A planned action: a union on `type` between a search and a booking.
fn action() -> SchemaDef {
    SchemaDef::Union {
        discriminant: "type".to_string(),
        variants: vec![
            (
                "search".to_string(),
                ObjectSchema::new(vec![
                    FieldDef::required("type", FieldType::string_enum(&["search"])),
                    FieldDef::required("query", FieldType::string()),
                    FieldDef::defaulted(
                        "limit",
                        FieldType::number(Some(1.0), Some(50.0)),
                        json!(10),
                    ),
                ]),
            ),
            (
                "book".to_string(),
                ObjectSchema::new(vec![
                    FieldDef::required("type", FieldType::string_enum(&["book"])),
                    FieldDef::required("place_id", FieldType::string()),
                    FieldDef::required("time", FieldType::string()),
                    FieldDef::defaulted(
                        "party_size",
                        FieldType::number(Some(1.0), Some(20.0)),
                        json!(2),
                    ),
                ]),
            ),
        ],
    }
}

/// Structured extraction: enum, bounded confidence, non-empty entity list.
fn extraction() -> SchemaDef {
    SchemaDef::Object(ObjectSchema::new(vec![
        FieldDef::required(
            "sentiment",
            FieldType::string_enum(&["positive", "negative", "neutral"]),
        ),
        FieldDef::required("confidence", FieldType::number(Some(0.0), Some(1.0))),
        FieldDef::required("entities", FieldType::array_of(FieldType::string(), 1)),
        FieldDef::optional("notes", FieldType::string()),
    ]))
}
