//! Interfaces: the orchestration of rules, storage and embedding per entity

pub mod collection;
pub mod embedding;
pub mod registry;

pub use collection::{Interface, Linked, Listing};
pub use embedding::remove_hidden_fields;
pub use registry::{Api, ApiBuilder, InterfaceDef};
