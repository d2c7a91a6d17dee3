//! Core module containing the rule engine, the data model and the options pipeline

pub mod context;
pub mod entity;
pub mod error;
pub mod expression;
pub mod model;
pub mod options;
pub mod query;
pub mod rules;
pub mod service;
pub mod validation;

pub use context::{Context, Lookup};
pub use entity::{Entity, EntityDef, FieldDef, FieldKind, Item, LinkDef, LinkKind, OnDelete};
pub use error::{CellarError, CompoundValidationError, ErrorResponse, Result};
pub use expression::{Accessor, CompareOp, Expr, Operand, identity, item};
pub use model::{Model, ModelBuilder};
pub use options::{EmbedPlan, ListParams, ListSettings, Options, OptionsFactory, RawOptions};
pub use query::{Filter, SortDirection, SortKey};
pub use rules::{Method, Methods, RuleSet, RuleSetBuilder};
pub use service::{Storage, StorageQuery};
pub use validation::{FieldValidator, ValidationMode};
