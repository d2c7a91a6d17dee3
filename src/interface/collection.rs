//! The CRUD surface of one entity
//!
//! Every public operation follows the same sequence: check the method is
//! enabled, build [`Options`], run the non-item rules, call storage, run the
//! item rules on what storage returned, then strip hidden fields and embed
//! links. `bypass_authorization` skips both rule passes.

use crate::core::entity::{Entity, ID_FIELD, Item, LinkDef, LinkKind, OnDelete, TYPE_FIELD, item_id};
use crate::core::error::{CellarError, CompoundValidationError, Result};
use crate::core::model::Model;
use crate::core::options::{Options, OptionsFactory, RawOptions};
use crate::core::query::Filter;
use crate::core::rules::{Method, RuleSet};
use crate::core::service::{Storage, StorageQuery};
use crate::core::validation::{FieldValidator, ValidationMode};
use crate::interface::embedding::{remove_hidden_fields, resolve_embedded};
use crate::interface::registry::Api;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of [`Interface::list`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Listing {
    Items(Vec<Item>),
    Count(usize),
}

impl Listing {
    pub fn items(self) -> Option<Vec<Item>> {
        match self {
            Listing::Items(items) => Some(items),
            Listing::Count(_) => None,
        }
    }

    pub fn count(&self) -> Option<usize> {
        match self {
            Listing::Items(_) => None,
            Listing::Count(n) => Some(*n),
        }
    }
}

/// A resolved link value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Linked {
    One(Item),
    Many(Vec<Item>),
}

impl Linked {
    pub fn into_value(self) -> Value {
        match self {
            Linked::One(item) => Value::Object(item),
            Linked::Many(items) => Value::Array(items.into_iter().map(Value::Object).collect()),
        }
    }
}

/// Declaration-time pieces of an interface, assembled by the registry
pub(crate) struct InterfaceParts {
    pub name: String,
    pub plural: String,
    pub entity: Arc<Entity>,
    pub rules: RuleSet,
    pub options: OptionsFactory,
    pub validators: HashMap<String, FieldValidator>,
}

/// CRUD operations over one entity family
pub struct Interface {
    name: String,
    plural: String,
    entity: Arc<Entity>,
    rules: RuleSet,
    options: OptionsFactory,
    validators: HashMap<String, FieldValidator>,
    model: Arc<Model>,
    storage: Arc<dyn Storage>,
    api: Weak<Api>,
}

impl Interface {
    pub(crate) fn new(
        parts: InterfaceParts,
        model: Arc<Model>,
        storage: Arc<dyn Storage>,
        api: Weak<Api>,
    ) -> Self {
        Self {
            name: parts.name,
            plural: parts.plural,
            entity: parts.entity,
            rules: parts.rules,
            options: parts.options,
            validators: parts.validators,
            model,
            storage,
            api,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection name used in routes
    pub fn plural(&self) -> &str {
        &self.plural
    }

    pub fn entity(&self) -> &Arc<Entity> {
        &self.entity
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Build options for a call on this interface
    pub fn create_options(&self, raw: RawOptions, list: bool) -> Result<Options> {
        self.options.create(raw, list, self.storage.as_ref())
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// List items, or count them with `count`
    pub async fn list(&self, raw: RawOptions) -> Result<Listing> {
        self.rules.ensure_enabled(&self.name, Method::List)?;
        let mut options = self.create_options(raw, true)?;
        self.authorize(Method::List, &options)?;

        let params = options.list_params();
        if params.count {
            let count = self
                .storage
                .count(&self.entity, params.filter.as_ref())
                .await?;
            return Ok(Listing::Count(count));
        }

        let items = self
            .storage
            .get(&self.entity, &params.storage_query())
            .await?;
        self.authorize_items(Method::List, &items, &mut options)?;

        debug!(interface = %self.name, count = items.len(), "listed");
        Ok(Listing::Items(self.prepare_items(items, &options).await?))
    }

    pub async fn get(&self, id: &str, raw: RawOptions) -> Result<Item> {
        self.rules.ensure_enabled(&self.name, Method::Get)?;
        let mut options = self.create_options(raw, false)?;
        self.authorize(Method::Get, &options)?;

        let item = self.fetch_stored(id).await?;
        self.authorize_items(Method::Get, std::slice::from_ref(&item), &mut options)?;

        self.prepare_item(item, &options).await
    }

    /// Validate and store a new item
    ///
    /// A `_type` tag in `fields` creates an item of that subtype.
    pub async fn create(&self, fields: Item, raw: RawOptions) -> Result<Item> {
        self.rules.ensure_enabled(&self.name, Method::Create)?;
        let mut options = self.create_options(raw, false)?;
        self.authorize(Method::Create, &options)?;

        let entity = self.requested_type(&fields)?;
        let validated = self.validator(&entity)?.validate(&fields, ValidationMode::Full)?;

        if !options.bypass_authorization {
            let mut candidate = validated.clone();
            candidate.insert(
                TYPE_FIELD.to_string(),
                Value::String(entity.type_tag().to_string()),
            );
            self.rules
                .enforce_item_rule(Method::Create, &candidate, &mut options.context)?;
        }

        let id = self.storage.create(&entity, validated).await?;
        info!(interface = %self.name, entity = %entity.name(), %id, "item created");

        let created = self
            .storage
            .get_by_id(&entity, &id)
            .await?
            .ok_or_else(|| CellarError::not_found(entity.name(), id.as_str()))?;
        self.prepare_item(created, &options).await
    }

    /// Merge `fields` into an existing item
    pub async fn update(&self, id: &str, fields: Item, raw: RawOptions) -> Result<Item> {
        self.write(Method::Update, id, fields, raw).await
    }

    /// Overwrite an existing item with `fields`
    pub async fn replace(&self, id: &str, fields: Item, raw: RawOptions) -> Result<Item> {
        self.write(Method::Replace, id, fields, raw).await
    }

    /// Delete an item after applying the cascade policy of its inverse links
    pub async fn delete(&self, id: &str, raw: RawOptions) -> Result<()> {
        self.rules.ensure_enabled(&self.name, Method::Delete)?;
        let mut options = self.create_options(raw, false)?;
        self.authorize(Method::Delete, &options)?;

        let item = self.fetch_stored(id).await?;
        self.authorize_items(Method::Delete, std::slice::from_ref(&item), &mut options)?;

        let mut visited = HashSet::new();
        self.delete_item(item, &mut visited).await
    }

    /// Follow `link_name` from the item `id`
    ///
    /// The source item is authorized under [`Method::Link`]; the target is
    /// read with authorization bypassed. Returns `None` when the link holds
    /// nothing. List options on a single link are a `BadRequest`.
    pub async fn link(&self, id: &str, link_name: &str, raw: RawOptions) -> Result<Option<Linked>> {
        self.rules.ensure_enabled(&self.name, Method::Link)?;
        let mut options = self.create_options(raw.clone(), false)?;
        self.authorize(Method::Link, &options)?;

        let item = self.fetch_stored(id).await?;
        self.authorize_items(Method::Link, std::slice::from_ref(&item), &mut options)?;

        let entity = self.concrete_entity(&item)?;
        let link = entity
            .link(link_name)
            .filter(|_| options.can_show_hidden || !entity.hidden_fields().contains(link_name))
            .ok_or_else(|| CellarError::not_found(format!("{}.link", entity.name()), link_name))?;

        if !link.is_multiple() && raw.has_list_params() {
            return Err(CellarError::bad_request(format!(
                "link '{}' holds a single item and takes no filter, sort, offset, limit or count",
                link_name
            )));
        }

        // Caller list options are checked against the target's allow-lists;
        // only the target's rules are skipped
        let target = self.api()?.get_interface_for_entity(&link.entity)?;
        let nested = RawOptions {
            show_hidden: options.reveals_hidden(),
            ..raw
        };
        let mut nested = target.create_options(nested, link.is_multiple())?;
        nested.bypass_authorization = true;
        target.fetch_link(link, &item, &nested).await
    }

    // =========================================================================
    // Internal entry points
    // =========================================================================

    /// Read the value of `link` (declared on `source`'s entity) from this
    /// interface, which exposes the link's target
    pub(crate) fn fetch_link<'a>(
        &'a self,
        link: &'a LinkDef,
        source: &'a Item,
        options: &'a Options,
    ) -> BoxFuture<'a, Result<Option<Linked>>> {
        Box::pin(async move {
            let target = self.model.require(&link.entity)?;
            let params = options.list_params();

            let items = match &link.kind {
                LinkKind::Reference { multiple: false } => {
                    let Some(id) = source.get(&link.name).and_then(Value::as_str) else {
                        return Ok(None);
                    };
                    match self.storage.get_by_id(&target, id).await? {
                        Some(item) => vec![item],
                        None => return Ok(None),
                    }
                }
                LinkKind::Reference { multiple: true } => {
                    let Some(Value::Array(ids)) = source.get(&link.name) else {
                        return Ok(None);
                    };
                    let ids: Vec<String> = ids
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect();
                    self.storage
                        .get_by_ids(&target, &ids, &params.storage_query())
                        .await?
                }
                LinkKind::Inverse { field, .. } => {
                    let Some(id) = item_id(source) else {
                        return Ok(None);
                    };
                    let mut query = params.storage_query();
                    let owned = Filter::equals(field.as_str(), id);
                    query.filter = Some(match query.filter.take() {
                        Some(filter) => owned.and(filter),
                        None => owned,
                    });
                    self.storage.get(&target, &query).await?
                }
            };

            let items = self.prepare_items(items, options).await?;
            Ok(if link.is_multiple() {
                Some(Linked::Many(items))
            } else {
                items.into_iter().next().map(Linked::One)
            })
        })
    }

    /// Delete `item` and handle its dependents; trusted, no rules
    ///
    /// `visited` guards against cycles in cascading graphs.
    fn delete_item<'a>(
        &'a self,
        item: Item,
        visited: &'a mut HashSet<String>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let id = item_id(&item)
                .map(str::to_string)
                .ok_or_else(|| CellarError::storage(format!("stored {} without {}", self.entity.name(), ID_FIELD)))?;
            if !visited.insert(format!("{}/{}", self.entity.root(), id)) {
                return Ok(());
            }

            let entity = self.concrete_entity(&item)?;
            for link in entity.links().values() {
                let LinkKind::Inverse {
                    field,
                    on_delete: Some(policy),
                    ..
                } = &link.kind
                else {
                    continue;
                };

                let target = self.model.require(&link.entity)?;
                let query = StorageQuery::filtered(Filter::equals(field.as_str(), id.as_str()));
                let dependents = self.storage.get(&target, &query).await?;
                if dependents.is_empty() {
                    continue;
                }

                info!(
                    entity = %entity.name(),
                    %id,
                    link = %link.name,
                    policy = ?policy,
                    count = dependents.len(),
                    "applying delete policy"
                );
                match policy {
                    OnDelete::Cascade => {
                        let interface = self.api()?.get_interface_for_entity(target.name())?;
                        for dependent in dependents {
                            interface.delete_item(dependent, &mut *visited).await?;
                        }
                    }
                    OnDelete::Nullify => {
                        for dependent in &dependents {
                            self.nullify(&target, dependent, field, &id).await?;
                        }
                    }
                }
            }

            self.storage.delete(&entity, &id).await?;
            info!(interface = %self.name, entity = %entity.name(), %id, "item deleted");
            Ok(())
        })
    }

    /// Clear `dependent.field` of its reference to `id`
    async fn nullify(&self, target: &Entity, dependent: &Item, field: &str, id: &str) -> Result<()> {
        let Some(dependent_id) = item_id(dependent) else {
            return Ok(());
        };
        let cleared = match dependent.get(field) {
            Some(Value::Array(ids)) => Value::Array(
                ids.iter()
                    .filter(|v| v.as_str() != Some(id))
                    .cloned()
                    .collect(),
            ),
            _ => Value::Null,
        };

        let mut patch = Item::new();
        patch.insert(field.to_string(), cleared);
        self.storage
            .update(target, dependent_id, patch, false)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn write(&self, method: Method, id: &str, fields: Item, raw: RawOptions) -> Result<Item> {
        self.rules.ensure_enabled(&self.name, method)?;
        let mut options = self.create_options(raw, false)?;
        self.authorize(method, &options)?;

        let stored = self.fetch_stored(id).await?;
        self.authorize_items(method, std::slice::from_ref(&stored), &mut options)?;

        let replace = method == Method::Replace;
        let mode = if replace {
            ValidationMode::Full
        } else {
            ValidationMode::Partial
        };
        let entity = self.concrete_entity(&stored)?;
        let validated = self.validator(&entity)?.validate(&fields, mode)?;

        let updated = self
            .storage
            .update(&entity, id, validated, replace)
            .await?
            .ok_or_else(|| CellarError::not_found(entity.name(), id))?;
        info!(interface = %self.name, %id, %method, "item written");

        self.prepare_item(updated, &options).await
    }

    fn authorize(&self, method: Method, options: &Options) -> Result<()> {
        if options.bypass_authorization {
            return Ok(());
        }
        self.rules.enforce_non_item_rules(method, &options.context)
    }

    fn authorize_items(&self, method: Method, items: &[Item], options: &mut Options) -> Result<()> {
        if options.bypass_authorization {
            return Ok(());
        }
        self.rules
            .enforce_item_rules(method, items, &mut options.context)
    }

    async fn fetch_stored(&self, id: &str) -> Result<Item> {
        self.storage
            .get_by_id(&self.entity, id)
            .await?
            .ok_or_else(|| CellarError::not_found(self.entity.name(), id))
    }

    fn concrete_entity(&self, item: &Item) -> Result<Arc<Entity>> {
        match item.get(TYPE_FIELD).and_then(Value::as_str) {
            Some(tag) => self.model.resolve_type(&self.entity, tag),
            None => Ok(Arc::clone(&self.entity)),
        }
    }

    /// Entity named by the `_type` of a create payload
    ///
    /// The tag is client input, so a bad one is a validation failure.
    fn requested_type(&self, fields: &Item) -> Result<Arc<Entity>> {
        let found = match fields.get(TYPE_FIELD) {
            None | Some(Value::Null) => return Ok(Arc::clone(&self.entity)),
            Some(Value::String(tag)) => self.model.subtype_of(&self.entity, tag),
            Some(_) => None,
        };
        found.ok_or_else(|| {
            let mut errors = CompoundValidationError::new();
            errors.add(
                TYPE_FIELD,
                format!("must name '{}' or one of its subtypes", self.entity.name()),
            );
            errors.into()
        })
    }

    fn validator(&self, entity: &Entity) -> Result<&FieldValidator> {
        self.validators.get(entity.name()).ok_or_else(|| {
            CellarError::config(format!(
                "interface '{}' has no validator for '{}'",
                self.name,
                entity.name()
            ))
        })
    }

    fn api(&self) -> Result<Arc<Api>> {
        self.api
            .upgrade()
            .ok_or_else(|| CellarError::config(format!("interface '{}' outlived its api", self.name)))
    }

    async fn prepare_items(&self, items: Vec<Item>, options: &Options) -> Result<Vec<Item>> {
        let mut prepared = Vec::with_capacity(items.len());
        for item in items {
            prepared.push(self.prepare_item(item, options).await?);
        }
        Ok(prepared)
    }

    /// Strip hidden fields and embed links
    async fn prepare_item(&self, item: Item, options: &Options) -> Result<Item> {
        let type_name = item
            .get(TYPE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or(self.entity.type_tag())
            .to_string();
        let plan = options.get_embed_for_type(&self.model, &self.entity, &type_name)?;

        let embedded = if options.allow_embedding && !plan.embed.is_empty() {
            let api = self.api()?;
            resolve_embedded(&api, &plan, &item, options).await?
        } else {
            Vec::new()
        };

        let mut item = remove_hidden_fields(&plan.entity, item, options);
        for (name, value) in embedded {
            item.insert(name, value);
        }
        Ok(item)
    }
}
