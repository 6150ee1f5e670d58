// Copyright 2026 The Framegate Project
// SPDX-License-Identifier: Apache-2.0

// Schema registry and streaming validator.
//
// Schemas are declarative: an object field table, or a tagged union
// resolved by a discriminant field. Validation runs once per completed
// frame, against the fully accumulated body; it never mutates the stream,
// it only records notes. Unknown schema names are recorded as failures.

mod builtin;

pub use builtin::{builtin_registry, ASSISTANT_REPLY};

use crate::stream::FrameKind;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Schema definitions
// ---------------------------------------------------------------------------

/// Constraint applied to a single field value.
#[derive(Debug, Clone)]
pub enum FieldType {
    /// A string, optionally restricted to an enum of allowed values.
    String { one_of: Option<Vec<String>> },
    /// A number with optional inclusive bounds.
    Number { min: Option<f64>, max: Option<f64> },
    Bool,
    /// An array with an item constraint and a minimum length.
    Array {
        items: Box<FieldType>,
        min_items: usize,
    },
    /// A nested object with its own field table.
    Object(Box<ObjectSchema>),
    /// Any JSON value.
    Any,
}

impl FieldType {
    pub fn string() -> Self {
        FieldType::String { one_of: None }
    }

    pub fn string_enum(allowed: &[&str]) -> Self {
        FieldType::String {
            one_of: Some(allowed.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn number(min: Option<f64>, max: Option<f64>) -> Self {
        FieldType::Number { min, max }
    }

    pub fn array_of(items: FieldType, min_items: usize) -> Self {
        FieldType::Array {
            items: Box::new(items),
            min_items,
        }
    }
}

/// One field in an object schema.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub required: bool,
    pub default: Option<Value>,
    pub ty: FieldType,
}

impl FieldDef {
    pub fn required(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            required: true,
            default: None,
            ty,
        }
    }

    pub fn optional(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: None,
            ty,
        }
    }

    /// Optional field filled with `default` when absent.
    pub fn defaulted(name: impl Into<String>, ty: FieldType, default: Value) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: Some(default),
            ty,
        }
    }
}

/// An object field table. `deny_unknown` rejects keys not in the table.
#[derive(Debug, Clone)]
pub struct ObjectSchema {
    pub fields: Vec<FieldDef>,
    pub deny_unknown: bool,
}

impl ObjectSchema {
    /// Closed object: unknown keys are validation failures.
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self {
            fields,
            deny_unknown: true,
        }
    }

    /// Open object: unknown keys pass through unvalidated.
    pub fn open(fields: Vec<FieldDef>) -> Self {
        Self {
            fields,
            deny_unknown: false,
        }
    }
}

/// A named schema: a plain object, or a union of object variants selected
/// by a string discriminant field.
#[derive(Debug, Clone)]
pub enum SchemaDef {
    Object(ObjectSchema),
    Union {
        discriminant: String,
        variants: Vec<(String, ObjectSchema)>,
    },
}

impl SchemaDef {
    /// Validate a parsed document. On success returns the normalized value
    /// (defaults applied); on failure returns every constraint violation.
    pub fn validate(&self, value: &Value) -> Result<Value, Vec<String>> {
        let mut errors = Vec::new();
        let normalized = match self {
            SchemaDef::Object(schema) => validate_object(schema, value, "$", &mut errors),
            SchemaDef::Union {
                discriminant,
                variants,
            } => match value.get(discriminant).and_then(|v| v.as_str()) {
                Some(tag) => match variants.iter().find(|(name, _)| name == tag) {
                    Some((_, schema)) => validate_object(schema, value, "$", &mut errors),
                    None => {
                        let allowed: Vec<&str> =
                            variants.iter().map(|(n, _)| n.as_str()).collect();
                        errors.push(format!(
                            "$.{discriminant}: \"{tag}\" is not one of {allowed:?}"
                        ));
                        value.clone()
                    }
                },
                None => {
                    errors.push(format!("$.{discriminant}: missing or non-string discriminant"));
                    value.clone()
                }
            },
        };
        if errors.is_empty() {
            Ok(normalized)
        } else {
            Err(errors)
        }
    }
}

// ---------------------------------------------------------------------------
// Validation walk
// ---------------------------------------------------------------------------

fn validate_object(schema: &ObjectSchema, value: &Value, path: &str, errors: &mut Vec<String>) -> Value {
    let Some(map) = value.as_object() else {
        errors.push(format!("{path}: expected object, got {}", type_name(value)));
        return value.clone();
    };

    let mut out = Map::new();
    for field in &schema.fields {
        let child = format!("{path}.{}", field.name);
        match map.get(&field.name) {
            Some(Value::Null) | None => {
                if let Some(default) = &field.default {
                    out.insert(field.name.clone(), default.clone());
                } else if field.required {
                    errors.push(format!("{child}: missing required field"));
                }
            }
            Some(v) => {
                let normalized = validate_value(&field.ty, v, &child, errors);
                out.insert(field.name.clone(), normalized);
            }
        }
    }

    for key in map.keys() {
        if !schema.fields.iter().any(|f| &f.name == key) {
            if schema.deny_unknown {
                errors.push(format!("{path}.{key}: unknown field"));
            } else {
                out.insert(key.clone(), map[key].clone());
            }
        }
    }

    Value::Object(out)
}

fn validate_value(ty: &FieldType, value: &Value, path: &str, errors: &mut Vec<String>) -> Value {
    match ty {
        FieldType::String { one_of } => {
            match value.as_str() {
                Some(s) => {
                    if let Some(allowed) = one_of {
                        if !allowed.iter().any(|a| a == s) {
                            errors.push(format!("{path}: \"{s}\" is not one of {allowed:?}"));
                        }
                    }
                }
                None => errors.push(format!(
                    "{path}: expected string, got {}",
                    type_name(value)
                )),
            }
            value.clone()
        }
        FieldType::Number { min, max } => {
            match value.as_f64() {
                Some(n) => {
                    if let Some(lo) = min {
                        if n < *lo {
                            errors.push(format!("{path}: {n} is below minimum {lo}"));
                        }
                    }
                    if let Some(hi) = max {
                        if n > *hi {
                            errors.push(format!("{path}: {n} exceeds maximum {hi}"));
                        }
                    }
                }
                None => errors.push(format!(
                    "{path}: expected number, got {}",
                    type_name(value)
                )),
            }
            value.clone()
        }
        FieldType::Bool => {
            if !value.is_boolean() {
                errors.push(format!(
                    "{path}: expected boolean, got {}",
                    type_name(value)
                ));
            }
            value.clone()
        }
        FieldType::Array { items, min_items } => match value.as_array() {
            Some(arr) => {
                if arr.len() < *min_items {
                    errors.push(format!(
                        "{path}: {} items is below minimum length {min_items}",
                        arr.len()
                    ));
                }
                let normalized: Vec<Value> = arr
                    .iter()
                    .enumerate()
                    .map(|(i, item)| validate_value(items, item, &format!("{path}[{i}]"), errors))
                    .collect();
                Value::Array(normalized)
            }
            None => {
                errors.push(format!("{path}: expected array, got {}", type_name(value)));
                value.clone()
            }
        },
        FieldType::Object(schema) => validate_object(schema, value, path, errors),
        FieldType::Any => value.clone(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Validation notes
// ---------------------------------------------------------------------------

/// Outcome of validating one completed frame. Append-only per session;
/// queried for repair decisions and metrics.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationNote {
    pub id: String,
    pub schema: String,
    pub kind: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// What the validator produced for a completed frame: the note, plus the
/// normalized document when validation passed.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub note: ValidationNote,
    pub value: Option<Value>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Process-wide schema registry. Shared across sessions; concurrent
/// registration and lookup are safe.
pub struct SchemaRegistry {
    schemas: DashMap<String, Arc<SchemaDef>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            schemas: DashMap::new(),
        }
    }

    pub fn register(&self, name: impl Into<String>, schema: SchemaDef) {
        self.schemas.insert(name.into(), Arc::new(schema));
    }

    pub fn get(&self, name: &str) -> Option<Arc<SchemaDef>> {
        self.schemas.get(name).map(|entry| entry.value().clone())
    }

    /// Validate a completed frame body against its named schema.
    ///
    /// JSON parse failures and unknown schema names both record `ok=false`.
    pub fn validate_frame(
        &self,
        kind: FrameKind,
        id: &str,
        schema_name: &str,
        body: &str,
    ) -> ValidationOutcome {
        let note = |ok: bool, errors: Vec<String>| ValidationNote {
            id: id.to_string(),
            schema: schema_name.to_string(),
            kind: kind.as_str(),
            ok,
            errors,
        };

        let parsed: Value = match serde_json::from_str(body) {
            Ok(v) => v,
            Err(e) => {
                return ValidationOutcome {
                    note: note(false, vec![format!("invalid JSON: {e}")]),
                    value: None,
                }
            }
        };

        let Some(schema) = self.get(schema_name) else {
            return ValidationOutcome {
                note: note(false, vec![format!("unknown schema \"{schema_name}\"")]),
                value: None,
            };
        };

        match schema.validate(&parsed) {
            Ok(normalized) => ValidationOutcome {
                note: note(true, Vec::new()),
                value: Some(normalized),
            },
            Err(errors) => ValidationOutcome {
                note: note(false, errors),
                value: None,
            },
        }
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
