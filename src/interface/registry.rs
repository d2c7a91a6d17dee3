//! Interface registry
//!
//! An [`Api`] owns every interface of a model. Interfaces find each other
//! through it (embedding, link traversal, cascade deletes), so the registry
//! and its interfaces are built together with `Arc::new_cyclic`: each
//! interface keeps a weak handle back to the `Api`.

use crate::core::error::{CellarError, Result};
use crate::core::expression::Expr;
use crate::core::model::Model;
use crate::core::options::{ListSettings, OptionsFactory};
use crate::core::query::SortKey;
use crate::core::rules::RuleSet;
use crate::core::service::Storage;
use crate::core::validation::FieldValidator;
use crate::interface::collection::{Interface, InterfaceParts};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Declaration of one interface
#[derive(Debug, Clone)]
pub struct InterfaceDef {
    pub name: String,
    pub entity: String,
    /// Route segment; defaults to the lowercased, pluralized name
    pub plural: Option<String>,
    pub rules: RuleSet,
    pub settings: ListSettings,
}

impl InterfaceDef {
    pub fn new(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            plural: None,
            rules: RuleSet::default(),
            settings: ListSettings::default(),
        }
    }

    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = Some(plural.into());
        self
    }

    pub fn rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn settings(mut self, settings: ListSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn enabled_filters<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.settings.enabled_filters = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn enabled_sort<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.settings.enabled_sort = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn default_sort(mut self, keys: impl IntoIterator<Item = SortKey>) -> Self {
        self.settings.default_sort = keys.into_iter().collect();
        self
    }

    pub fn default_limit(mut self, limit: usize) -> Self {
        self.settings.default_limit = Some(limit);
        self
    }

    pub fn max_limit(mut self, limit: usize) -> Self {
        self.settings.max_limit = Some(limit);
        self
    }

    pub fn hidden_field_authorization(mut self, rule: Expr) -> Self {
        self.settings.hidden_field_authorization = Some(rule);
        self
    }
}

/// Builder for [`Api`]
pub struct ApiBuilder {
    model: Model,
    storage: Arc<dyn Storage>,
    defs: Vec<InterfaceDef>,
}

impl ApiBuilder {
    pub fn interface(mut self, def: InterfaceDef) -> Self {
        self.defs.push(def);
        self
    }

    pub fn interfaces(mut self, defs: impl IntoIterator<Item = InterfaceDef>) -> Self {
        self.defs.extend(defs);
        self
    }

    /// Check declarations and wire interfaces together
    pub fn build(self) -> Result<Arc<Api>> {
        let model = Arc::new(self.model);
        let mut parts = Vec::with_capacity(self.defs.len());
        let mut by_entity = HashMap::new();

        for def in self.defs {
            if parts.iter().any(|p: &InterfaceParts| p.name == def.name) {
                return Err(CellarError::config(format!(
                    "interface '{}' declared twice",
                    def.name
                )));
            }
            let entity = model.require(&def.entity)?;
            if let Some(other) = by_entity.insert(entity.name().to_string(), def.name.clone()) {
                return Err(CellarError::config(format!(
                    "entity '{}' is exposed by both '{}' and '{}'",
                    entity.name(),
                    other,
                    def.name
                )));
            }

            let mut validators = HashMap::new();
            let family = std::iter::once(entity.name().to_string()).chain(entity.descendants().iter().cloned());
            for name in family {
                let member = model.require(&name)?;
                validators.insert(name, FieldValidator::new(member)?);
            }

            parts.push(InterfaceParts {
                plural: def.plural.unwrap_or_else(|| default_plural(&def.name)),
                options: OptionsFactory::new(&model, &entity, def.settings)?,
                name: def.name,
                entity,
                rules: def.rules,
                validators,
            });
        }

        let storage = self.storage;
        let api = Arc::new_cyclic(|weak| {
            let interfaces = parts
                .into_iter()
                .map(|part| {
                    let name = part.name.clone();
                    let interface =
                        Interface::new(part, Arc::clone(&model), Arc::clone(&storage), weak.clone());
                    (name, Arc::new(interface))
                })
                .collect();
            Api {
                model: Arc::clone(&model),
                storage: Arc::clone(&storage),
                interfaces,
                by_entity,
            }
        });

        info!(interfaces = api.interfaces.len(), "api built");
        Ok(api)
    }
}

/// Lowercase English plural of an interface name
///
/// A name ending in a single `s` is taken to be plural already.
fn default_plural(name: &str) -> String {
    const VOWELS: [char; 5] = ['a', 'e', 'i', 'o', 'u'];

    let lower = name.to_lowercase();
    match lower.as_str() {
        s if s.ends_with("ss")
            || s.ends_with("sh")
            || s.ends_with("ch")
            || s.ends_with('x')
            || s.ends_with('z') =>
        {
            format!("{}es", s)
        }
        s if s.ends_with('s') || s.is_empty() => lower,
        s if s.len() > 1 && s.ends_with('y') && !s[..s.len() - 1].ends_with(VOWELS) => {
            format!("{}ies", &s[..s.len() - 1])
        }
        s if s.len() > 2 && s.ends_with("fe") => format!("{}ves", &s[..s.len() - 2]),
        s if s.len() > 1 && s.ends_with('f') => format!("{}ves", &s[..s.len() - 1]),
        s => format!("{}s", s),
    }
}

/// Every interface of a model, sharing one storage backend
pub struct Api {
    model: Arc<Model>,
    storage: Arc<dyn Storage>,
    interfaces: IndexMap<String, Arc<Interface>>,
    by_entity: HashMap<String, String>,
}

impl Api {
    pub fn builder(model: Model, storage: Arc<dyn Storage>) -> ApiBuilder {
        ApiBuilder {
            model,
            storage,
            defs: Vec::new(),
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn interface(&self, name: &str) -> Option<Arc<Interface>> {
        self.interfaces.get(name).cloned()
    }

    pub fn interfaces(&self) -> impl Iterator<Item = &Arc<Interface>> {
        self.interfaces.values()
    }

    /// The interface exposing `entity`, or its nearest exposed ancestor
    pub fn get_interface_for_entity(&self, entity: &str) -> Result<Arc<Interface>> {
        let node = self.model.require(entity)?;
        std::iter::once(node.name())
            .chain(node.ancestors().iter().rev().map(String::as_str))
            .find_map(|name| self.by_entity.get(name))
            .and_then(|name| self.interfaces.get(name))
            .cloned()
            .ok_or_else(|| {
                CellarError::config(format!("no interface exposes entity '{}'", entity))
            })
    }
}
