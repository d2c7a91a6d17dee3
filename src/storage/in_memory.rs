//! In-memory implementation of Storage for testing and development

use crate::core::entity::{Entity, ID_FIELD, Item, TYPE_FIELD, is_internal};
use crate::core::error::{CellarError, Result};
use crate::core::expression::values_equal;
use crate::core::query::{Filter, compare_items};
use crate::core::service::{Storage, StorageQuery};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

type Collection = IndexMap<String, Item>;

/// In-memory storage
///
/// One collection per hierarchy root, in insertion order. Uses RwLock for
/// thread-safe access.
#[derive(Clone, Default)]
pub struct InMemoryStorage {
    collections: Arc<RwLock<HashMap<String, Collection>>>,
}

impl InMemoryStorage {
    /// Create a new, empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items in the family rooted at `root`
    pub fn len(&self, root: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(root).map_or(0, IndexMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, root: &str) -> bool {
        self.len(root) == 0
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<String, Collection>) -> T) -> Result<T> {
        let collections = self
            .collections
            .read()
            .map_err(|e| CellarError::storage(format!("Failed to acquire read lock: {}", e)))?;
        Ok(f(&collections))
    }

    fn write<T>(&self, f: impl FnOnce(&mut HashMap<String, Collection>) -> Result<T>) -> Result<T> {
        let mut collections = self
            .collections
            .write()
            .map_err(|e| CellarError::storage(format!("Failed to acquire write lock: {}", e)))?;
        f(&mut collections)
    }
}

fn belongs_to(entity: &Entity, item: &Item) -> bool {
    item.get(TYPE_FIELD)
        .and_then(Value::as_str)
        .is_some_and(|tag| entity.matches_type(tag))
}

fn select<'a>(
    entity: &Entity,
    items: impl Iterator<Item = &'a Item>,
    query: &StorageQuery,
) -> Vec<Item> {
    let mut matched: Vec<Item> = items
        .filter(|item| belongs_to(entity, item))
        .filter(|item| query.filter.as_ref().is_none_or(|f| f.matches(item)))
        .cloned()
        .collect();

    if !query.sort.is_empty() {
        matched.sort_by(|a, b| compare_items(a, b, &query.sort));
    }

    let paged = matched.into_iter().skip(query.offset);
    let paged: Vec<Item> = match query.limit {
        Some(limit) => paged.take(limit).collect(),
        None => paged.collect(),
    };

    match &query.fields {
        Some(fields) => paged
            .into_iter()
            .map(|mut item| {
                item.retain(|k, _| is_internal(k) || fields.contains(k));
                item
            })
            .collect(),
        None => paged,
    }
}

fn check_unique(entity: &Entity, collection: &Collection, id: &str, item: &Item) -> Result<()> {
    for field in entity.unique_fields() {
        let Some(value) = item.get(field).filter(|v| !v.is_null()) else {
            continue;
        };
        let taken = collection.iter().any(|(other_id, other)| {
            other_id != id && other.get(field).is_some_and(|v| values_equal(v, value))
        });
        if taken {
            return Err(CellarError::Duplicate {
                entity: entity.name().to_string(),
                field: field.clone(),
            });
        }
    }
    Ok(())
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, entity: &Entity, query: &StorageQuery) -> Result<Vec<Item>> {
        self.read(|collections| {
            collections
                .get(entity.root())
                .map(|c| select(entity, c.values(), query))
                .unwrap_or_default()
        })
    }

    async fn count(&self, entity: &Entity, filter: Option<&Filter>) -> Result<usize> {
        self.read(|collections| {
            collections.get(entity.root()).map_or(0, |c| {
                c.values()
                    .filter(|item| belongs_to(entity, item))
                    .filter(|item| filter.is_none_or(|f| f.matches(item)))
                    .count()
            })
        })
    }

    async fn get_by_id(&self, entity: &Entity, id: &str) -> Result<Option<Item>> {
        self.read(|collections| {
            collections
                .get(entity.root())
                .and_then(|c| c.get(id))
                .filter(|item| belongs_to(entity, item))
                .cloned()
        })
    }

    async fn get_by_ids(
        &self,
        entity: &Entity,
        ids: &[String],
        query: &StorageQuery,
    ) -> Result<Vec<Item>> {
        self.read(|collections| {
            collections
                .get(entity.root())
                .map(|c| select(entity, ids.iter().filter_map(|id| c.get(id)), query))
                .unwrap_or_default()
        })
    }

    async fn create(&self, entity: &Entity, mut fields: Item) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        fields.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        fields.insert(
            TYPE_FIELD.to_string(),
            Value::String(entity.type_tag().to_string()),
        );

        self.write(|collections| {
            let collection = collections.entry(entity.root().to_string()).or_default();
            check_unique(entity, collection, &id, &fields)?;
            collection.insert(id.clone(), fields);
            Ok(())
        })?;

        Ok(id)
    }

    async fn update(
        &self,
        entity: &Entity,
        id: &str,
        fields: Item,
        replace: bool,
    ) -> Result<Option<Item>> {
        self.write(|collections| {
            let Some(collection) = collections.get_mut(entity.root()) else {
                return Ok(None);
            };
            let Some(current) = collection.get(id).filter(|item| belongs_to(entity, item)) else {
                return Ok(None);
            };

            let mut updated = if replace {
                current
                    .iter()
                    .filter(|(k, _)| is_internal(k))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            } else {
                current.clone()
            };
            for (key, value) in fields {
                if !is_internal(&key) {
                    updated.insert(key, value);
                }
            }

            check_unique(entity, collection, id, &updated)?;
            collection.insert(id.to_string(), updated.clone());
            Ok(Some(updated))
        })
    }

    async fn delete(&self, entity: &Entity, id: &str) -> Result<()> {
        self.write(|collections| {
            if let Some(collection) = collections.get_mut(entity.root()) {
                collection.shift_remove(id);
            }
            Ok(())
        })
    }
}
