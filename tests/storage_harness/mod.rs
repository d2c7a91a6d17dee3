//! Shared test harness for storage backend testing
//!
//! Provides a small polymorphic model (`Animal <- Dog`, `Keeper`) and helpers
//! for building items, plus the `storage_contract_tests!` macro.
//!
//! # Usage
//!
//! From any integration test file in `tests/`:
//! ```rust,ignore
//! #[macro_use]
//! mod storage_harness;
//! use storage_harness::*;
//! ```

#![allow(dead_code)]

#[macro_use]
mod storage_contract;

use cellar::core::entity::{EntityDef, FieldDef, FieldKind, Item, LinkDef};
use cellar::core::model::Model;
use serde_json::Value;

/// Model used by the storage contract suite
pub fn test_model() -> Model {
    Model::builder()
        .entity(
            EntityDef::new("Animal")
                .field(FieldDef::new("name", FieldKind::Text).required())
                .field(FieldDef::new("age", FieldKind::Integer))
                .field(FieldDef::new("tags", FieldKind::List))
                .link(LinkDef::reference("keeper", "Keeper"))
                .unique("name"),
        )
        .entity(
            EntityDef::new("Dog")
                .extends("Animal")
                .field(FieldDef::new("breed", FieldKind::Text)),
        )
        .entity(EntityDef::new("Keeper").field(FieldDef::new("name", FieldKind::Text)))
        .freeze()
        .expect("valid test model")
}

/// Build an item from a JSON object literal
pub fn item(value: Value) -> Item {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Names of `items`, in order
pub fn names(items: &[Item]) -> Vec<String> {
    items
        .iter()
        .filter_map(|i| i.get("name").and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}
