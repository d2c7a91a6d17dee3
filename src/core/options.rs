//! Per-call options resolution
//!
//! Every interface call starts from a [`RawOptions`] value (what the caller
//! asked for) that the interface's [`OptionsFactory`] turns into a validated
//! [`Options`]: defaults applied, `limit` clamped, filter and sort checked
//! against the interface allow-lists, and the hidden-field right computed.
//! An `Options` value lives for exactly one call.

use crate::core::context::{Context, ITEM};
use crate::core::entity::{Entity, ID_FIELD, TYPE_FIELD};
use crate::core::error::{CellarError, Result};
use crate::core::expression::Expr;
use crate::core::model::Model;
use crate::core::query::{Filter, SortKey};
use crate::core::service::{Storage, StorageQuery};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Options as supplied by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawOptions {
    pub embed: Option<Vec<String>>,
    pub fields: Option<Vec<String>>,
    pub show_hidden: bool,
    pub context: Context,
    pub bypass_authorization: bool,
    pub allow_embedding: bool,
    pub filter: Option<Filter>,
    pub sort: Option<Vec<SortKey>>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub count: bool,
}

impl Default for RawOptions {
    fn default() -> Self {
        Self {
            embed: None,
            fields: None,
            show_hidden: false,
            context: Context::default(),
            bypass_authorization: false,
            allow_embedding: true,
            filter: None,
            sort: None,
            offset: None,
            limit: None,
            count: false,
        }
    }
}

impl RawOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn with_embed<S: Into<String>>(mut self, embed: impl IntoIterator<Item = S>) -> Self {
        self.embed = Some(embed.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sort(mut self, sort: impl IntoIterator<Item = SortKey>) -> Self {
        self.sort = Some(sort.into_iter().collect());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn show_hidden(mut self) -> Self {
        self.show_hidden = true;
        self
    }

    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }

    /// Trusted internal call: no rules, no allow-lists, no clamping
    pub fn bypass(mut self) -> Self {
        self.bypass_authorization = true;
        self
    }

    /// Any of filter, sort, offset, limit or count was supplied
    pub fn has_list_params(&self) -> bool {
        self.filter.is_some()
            || self.sort.is_some()
            || self.offset.is_some()
            || self.limit.is_some()
            || self.count
    }
}

/// List-only part of [`Options`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListParams {
    pub filter: Option<Filter>,
    pub sort: Vec<SortKey>,
    pub offset: usize,
    pub limit: Option<usize>,
    pub count: bool,
}

impl ListParams {
    pub fn storage_query(&self) -> StorageQuery {
        StorageQuery {
            filter: self.filter.clone(),
            fields: None,
            sort: self.sort.clone(),
            offset: self.offset,
            limit: self.limit,
        }
    }
}

/// Resolved embedding for one concrete type
#[derive(Debug, Clone)]
pub struct EmbedPlan {
    pub entity: Arc<Entity>,
    pub embed: Arc<HashSet<String>>,
}

/// Validated options for one call
#[derive(Debug)]
pub struct Options {
    pub embed: Option<HashSet<String>>,
    pub fields: Option<HashSet<String>>,
    pub show_hidden: bool,
    pub can_show_hidden: bool,
    pub context: Context,
    pub bypass_authorization: bool,
    pub allow_embedding: bool,
    /// Set for list calls only
    pub list: Option<ListParams>,
    embed_by_type: RwLock<HashMap<String, EmbedPlan>>,
}

impl Options {
    /// Whether hidden fields end up in the response
    pub fn reveals_hidden(&self) -> bool {
        self.show_hidden && self.can_show_hidden
    }

    pub fn list_params(&self) -> ListParams {
        self.list.clone().unwrap_or_default()
    }

    /// Resolve `type_name` within `base`'s hierarchy and compute its embed set
    ///
    /// Memoized per type name for the lifetime of these options.
    pub fn get_embed_for_type(
        &self,
        model: &Model,
        base: &Arc<Entity>,
        type_name: &str,
    ) -> Result<EmbedPlan> {
        if let Ok(cache) = self.embed_by_type.read()
            && let Some(plan) = cache.get(type_name)
        {
            return Ok(plan.clone());
        }

        let entity = model.resolve_type(base, type_name)?;
        let embed = self.compute_embed(&entity);
        debug!(entity = %entity.name(), type_name, embed = ?embed, "embed plan");

        let plan = EmbedPlan {
            entity,
            embed: Arc::new(embed),
        };
        if let Ok(mut cache) = self.embed_by_type.write() {
            cache.insert(type_name.to_string(), plan.clone());
        }
        Ok(plan)
    }

    fn compute_embed(&self, entity: &Entity) -> HashSet<String> {
        let embeddable = entity.embeddable();
        let mut embed: HashSet<String> = match &self.embed {
            Some(requested) => requested.intersection(embeddable).cloned().collect(),
            None => entity.embed_by_default().clone(),
        };
        if let Some(fields) = &self.fields {
            embed.extend(fields.intersection(embeddable).cloned());
        }
        if !self.reveals_hidden() {
            embed.retain(|name| !entity.hidden_fields().contains(name));
        }
        embed
    }
}

/// Field allow-list in both hidden-inclusive and hidden-exclusive form
#[derive(Debug, Clone, Default)]
struct AllowList {
    with_hidden: HashSet<String>,
    without_hidden: HashSet<String>,
}

impl AllowList {
    fn new(fields: HashSet<String>, hidden: &HashSet<String>) -> Self {
        let without_hidden = fields.difference(hidden).cloned().collect();
        Self {
            with_hidden: fields,
            without_hidden,
        }
    }

    fn get(&self, can_show_hidden: bool) -> &HashSet<String> {
        if can_show_hidden {
            &self.with_hidden
        } else {
            &self.without_hidden
        }
    }
}

/// Declared list behaviour of one interface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListSettings {
    /// Filterable fields; `None` allows every stored field
    pub enabled_filters: Option<Vec<String>>,
    /// Sortable fields; `None` allows every stored field
    pub enabled_sort: Option<Vec<String>>,
    pub default_sort: Vec<SortKey>,
    pub default_limit: Option<usize>,
    pub max_limit: Option<usize>,
    /// Grants the right to see hidden fields; must not use `item`
    #[serde(with = "serde_yaml::with::singleton_map_recursive")]
    pub hidden_field_authorization: Option<Expr>,
}

/// Builds [`Options`] for one interface
///
/// Allow-lists are computed once here, not per call.
#[derive(Debug, Clone)]
pub struct OptionsFactory {
    default_sort: Vec<SortKey>,
    default_limit: Option<usize>,
    max_limit: Option<usize>,
    filters: AllowList,
    sort: AllowList,
    hidden_field_authorization: Option<Expr>,
}

impl OptionsFactory {
    pub fn new(model: &Model, entity: &Entity, settings: ListSettings) -> Result<Self> {
        if let Some(rule) = &settings.hidden_field_authorization
            && rule.uses(ITEM)
        {
            return Err(CellarError::config(format!(
                "hidden field authorization of '{}' must not use item",
                entity.name()
            )));
        }

        let stored = stored_fields(model, entity);
        let hidden = hierarchy_hidden(model, entity);
        let allow_list = |declared: Option<Vec<String>>| match declared {
            Some(names) => AllowList::new(names.into_iter().collect(), &hidden),
            None => AllowList::new(stored.clone(), &hidden),
        };

        Ok(Self {
            default_sort: settings.default_sort,
            default_limit: settings.default_limit,
            max_limit: settings.max_limit,
            filters: allow_list(settings.enabled_filters),
            sort: allow_list(settings.enabled_sort),
            hidden_field_authorization: settings.hidden_field_authorization,
        })
    }

    pub fn max_limit(&self) -> Option<usize> {
        self.max_limit
    }

    /// Turn caller options into validated options
    pub fn create(&self, raw: RawOptions, list: bool, storage: &dyn Storage) -> Result<Options> {
        let bypass = raw.bypass_authorization;
        let can_show_hidden = bypass
            || self
                .hidden_field_authorization
                .as_ref()
                .is_some_and(|rule| rule.evaluate(&raw.context));

        let list = if list {
            Some(self.list_params(&raw, bypass, can_show_hidden, storage)?)
        } else {
            None
        };

        let options = Options {
            embed: raw.embed.map(|e| e.into_iter().collect()),
            fields: raw.fields.map(|f| f.into_iter().collect()),
            show_hidden: raw.show_hidden,
            can_show_hidden,
            context: raw.context,
            bypass_authorization: bypass,
            allow_embedding: raw.allow_embedding,
            list,
            embed_by_type: RwLock::new(HashMap::new()),
        };
        debug!(
            bypass,
            can_show_hidden,
            list = ?options.list,
            "options resolved"
        );
        Ok(options)
    }

    fn list_params(
        &self,
        raw: &RawOptions,
        bypass: bool,
        can_show_hidden: bool,
        storage: &dyn Storage,
    ) -> Result<ListParams> {
        let mut limit = raw.limit.or(self.default_limit);
        if !bypass && let Some(max) = self.max_limit {
            limit = Some(limit.map_or(max, |l| l.min(max)));
        }

        let filter = match &raw.filter {
            Some(filter) if !bypass => Some(storage.check_filter(
                filter,
                Some(self.filters.get(can_show_hidden)),
                &raw.context,
            )?),
            other => other.clone(),
        };

        let sort = match &raw.sort {
            Some(keys) => {
                if !bypass {
                    self.check_sort(keys, can_show_hidden)?;
                }
                keys.clone()
            }
            None => self.default_sort.clone(),
        };

        Ok(ListParams {
            filter,
            sort,
            offset: raw.offset.unwrap_or(0),
            limit,
            count: raw.count,
        })
    }

    fn check_sort(&self, keys: &[SortKey], can_show_hidden: bool) -> Result<()> {
        let allowed = self.sort.get(can_show_hidden);
        match keys.iter().find(|k| !allowed.contains(&k.field)) {
            Some(key) => Err(CellarError::disabled_field(key.field.as_str())),
            None => Ok(()),
        }
    }
}

/// Entity plus descendants, which a listing of `entity` may return
fn family<'a>(model: &'a Model, entity: &'a Entity) -> impl Iterator<Item = Arc<Entity>> + 'a {
    model
        .entity(entity.name())
        .into_iter()
        .chain(entity.descendants().iter().filter_map(|d| model.entity(d)))
}

fn stored_fields(model: &Model, entity: &Entity) -> HashSet<String> {
    let mut names = HashSet::from([ID_FIELD.to_string(), TYPE_FIELD.to_string()]);
    for member in family(model, entity) {
        names.extend(member.fields().keys().cloned());
        names.extend(
            member
                .links()
                .values()
                .filter(|l| l.is_reference())
                .map(|l| l.name.clone()),
        );
    }
    names
}

fn hierarchy_hidden(model: &Model, entity: &Entity) -> HashSet<String> {
    family(model, entity)
        .flat_map(|member| member.hidden_fields().clone())
        .collect()
}
