//! Field validation for incoming writes
//!
//! Type-checks the payload of create/update/replace against the entity's
//! declared fields and reference links. Failures are aggregated into one
//! [`CompoundValidationError`] keyed by field name.

use crate::core::entity::{Entity, FieldKind, Item, LinkKind, is_internal};
use crate::core::error::{CellarError, CompoundValidationError, Result};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Whether absent required fields are errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Create and replace: the payload is the whole item
    Full,
    /// Update: only the given fields change
    Partial,
}

/// Validator for one entity, patterns compiled once
#[derive(Debug, Clone)]
pub struct FieldValidator {
    entity: Arc<Entity>,
    patterns: HashMap<String, Regex>,
}

impl FieldValidator {
    pub fn new(entity: Arc<Entity>) -> Result<Self> {
        let mut patterns = HashMap::new();
        for field in entity.fields().values() {
            if let Some(pattern) = &field.pattern {
                let regex = Regex::new(pattern).map_err(|e| {
                    CellarError::config(format!(
                        "invalid pattern on '{}.{}': {}",
                        entity.name(),
                        field.name,
                        e
                    ))
                })?;
                patterns.insert(field.name.clone(), regex);
            }
        }
        Ok(Self { entity, patterns })
    }

    /// Validate `input`, returning it without internal fields
    pub fn validate(&self, input: &Item, mode: ValidationMode) -> Result<Item> {
        let mut errors = CompoundValidationError::new();
        let mut output = Item::new();

        for (name, value) in input {
            if is_internal(name) {
                continue;
            }
            if let Some(field) = self.entity.field(name) {
                if let Err(message) = self.check_field(name, field.kind, field.required, value) {
                    errors.add(name, message);
                }
            } else if let Some(link) = self.entity.link(name) {
                match link.kind {
                    LinkKind::Reference { multiple } => {
                        if let Err(message) = check_reference(value, multiple, link.required) {
                            errors.add(name, message);
                        }
                    }
                    LinkKind::Inverse { .. } => errors.add(name, "inverse links are read-only"),
                }
            } else {
                errors.add(name, "unknown field");
                continue;
            }
            output.insert(name.clone(), value.clone());
        }

        if mode == ValidationMode::Full {
            for field in self.entity.fields().values().filter(|f| f.required) {
                if !input.contains_key(&field.name) {
                    errors.add(&field.name, "required");
                }
            }
            for link in self.entity.links().values().filter(|l| l.required && l.is_reference()) {
                if !input.contains_key(&link.name) {
                    errors.add(&link.name, "required");
                }
            }
        }

        errors.into_result()?;
        Ok(output)
    }

    fn check_field(
        &self,
        name: &str,
        kind: FieldKind,
        required: bool,
        value: &Value,
    ) -> std::result::Result<(), String> {
        if value.is_null() {
            return if required {
                Err("required".to_string())
            } else {
                Ok(())
            };
        }

        let ok = match kind {
            FieldKind::Text => value.is_string(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Float => value.is_number(),
            FieldKind::Boolean => value.is_boolean(),
            FieldKind::Reference => value.is_string(),
            FieldKind::List => value.is_array(),
            FieldKind::Object => value.is_object(),
            FieldKind::Any => true,
        };
        if !ok {
            return Err(format!("expected {}", kind_name(kind)));
        }

        if let (Some(regex), Some(text)) = (self.patterns.get(name), value.as_str())
            && !regex.is_match(text)
        {
            return Err(format!("does not match pattern '{}'", regex.as_str()));
        }
        Ok(())
    }
}

fn check_reference(value: &Value, multiple: bool, required: bool) -> std::result::Result<(), String> {
    match value {
        Value::Null if required => Err("required".to_string()),
        Value::Null => Ok(()),
        Value::String(_) if !multiple => Ok(()),
        Value::Array(ids) if multiple && ids.iter().all(Value::is_string) => Ok(()),
        _ if multiple => Err("expected a list of ids".to_string()),
        _ => Err("expected an id".to_string()),
    }
}

fn kind_name(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "text",
        FieldKind::Integer => "integer",
        FieldKind::Float => "number",
        FieldKind::Boolean => "boolean",
        FieldKind::Reference => "an id",
        FieldKind::List => "list",
        FieldKind::Object => "object",
        FieldKind::Any => "any",
    }
}
