//! # Cellar
//!
//! A declarative REST API framework: declare entities, links between them and
//! per-method authorization rules, and get a filterable, sortable API whose
//! responses respect field visibility and link embedding.
//!
//! ## Features
//!
//! - **Expression rules**: authorization as pure boolean trees over the request context
//! - **Item and non-item rules**: role checks run before storage, ownership checks after
//! - **Options pipeline**: limit clamping, filter/sort allow-lists, hidden-field rights
//! - **Embedding**: one level of linked items inlined per response, memoized per type
//! - **Polymorphic entities**: single-inheritance hierarchies with dotted `_type` tags
//! - **Configuration-Based**: declare the whole API in YAML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cellar::prelude::*;
//!
//! let model = Model::builder()
//!     .entity(
//!         EntityDef::new("Post")
//!             .field(FieldDef::new("title", FieldKind::Text).required())
//!             .field(FieldDef::new("owner", FieldKind::Text)),
//!     )
//!     .freeze()?;
//!
//! let rules = RuleSet::builder()
//!     .allow([Method::List, Method::Get, Method::Create])
//!     .require([Method::Update, Method::Delete], item().field("owner").equals(identity().field("id")))
//!     .build();
//!
//! let api = Api::builder(model, Arc::new(InMemoryStorage::new()))
//!     .interface(InterfaceDef::new("Posts", "Post").rules(rules).max_limit(50))
//!     .build()?;
//!
//! let posts = api.interface("Posts").unwrap();
//! let listing = posts.list(RawOptions::new().with_limit(10)).await?;
//! ```

pub mod config;
pub mod core;
pub mod interface;
pub mod server;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Rules ===
    pub use crate::core::{
        context::Context,
        expression::{Accessor, Expr, Operand, identity, item},
        rules::{Method, Methods, RuleSet},
    };

    // === Model ===
    pub use crate::core::{
        entity::{EntityDef, FieldDef, FieldKind, Item, LinkDef, OnDelete},
        model::Model,
    };

    // === Options ===
    pub use crate::core::{
        options::{ListSettings, RawOptions},
        query::{Filter, SortKey},
    };

    // === Errors ===
    pub use crate::core::error::{CellarError, Result};

    // === Interfaces ===
    pub use crate::interface::{Api, Interface, InterfaceDef, Linked, Listing};

    // === Storage ===
    pub use crate::core::service::{Storage, StorageQuery};
    pub use crate::storage::InMemoryStorage;

    // === Config ===
    pub use crate::config::{ApiConfig, InterfaceConfig, RuleConfig};

    // === Server ===
    pub use crate::server::{Identity, RestExposure, ServerBuilder};

    // === External dependencies ===
    pub use async_trait::async_trait;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};
    pub use std::sync::Arc;
}
