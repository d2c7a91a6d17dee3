//! Storage collaborator trait
//!
//! Interfaces are agnostic to the underlying storage. A backend stores items
//! of an entity family in one collection keyed by the hierarchy root, stamps
//! `_id` and `_type` on create, and restricts reads of a subtype to items
//! whose type tag belongs to that subtype.

use crate::core::context::Context;
use crate::core::entity::{Entity, Item};
use crate::core::error::Result;
use crate::core::query::{self, Filter, SortKey};
use async_trait::async_trait;
use std::collections::HashSet;

/// Read parameters for [`Storage::get`] and [`Storage::get_by_ids`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageQuery {
    pub filter: Option<Filter>,
    /// Projection; internal fields are always returned
    pub fields: Option<HashSet<String>>,
    pub sort: Vec<SortKey>,
    pub offset: usize,
    /// `None` returns every match
    pub limit: Option<usize>,
}

impl StorageQuery {
    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            ..Default::default()
        }
    }
}

/// CRUD operations over one backend
#[async_trait]
pub trait Storage: Send + Sync {
    /// Items of `entity` (and its subtypes) matching the query
    async fn get(&self, entity: &Entity, query: &StorageQuery) -> Result<Vec<Item>>;

    /// Number of items matching `filter`, ignoring paging
    async fn count(&self, entity: &Entity, filter: Option<&Filter>) -> Result<usize>;

    async fn get_by_id(&self, entity: &Entity, id: &str) -> Result<Option<Item>>;

    /// Items whose id is in `ids`, then filtered, sorted and paged by `query`
    async fn get_by_ids(
        &self,
        entity: &Entity,
        ids: &[String],
        query: &StorageQuery,
    ) -> Result<Vec<Item>>;

    /// Store a new item and return its id
    async fn create(&self, entity: &Entity, fields: Item) -> Result<String>;

    /// Merge (or with `replace`, overwrite) fields; `None` when the id is unknown
    async fn update(
        &self,
        entity: &Entity,
        id: &str,
        fields: Item,
        replace: bool,
    ) -> Result<Option<Item>>;

    async fn delete(&self, entity: &Entity, id: &str) -> Result<()>;

    /// Validate filter fields and substitute `$identity.<path>` tokens
    ///
    /// Backends with their own query language may override this to also
    /// translate the filter.
    fn check_filter(
        &self,
        filter: &Filter,
        allowed: Option<&HashSet<String>>,
        context: &Context,
    ) -> Result<Filter> {
        query::check_filter(filter, allowed, context)
    }
}
