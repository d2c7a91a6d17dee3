//! Entity registry
//!
//! Declaration is two-phase: entities are collected as [`EntityDef`]s into a
//! [`ModelBuilder`], then [`ModelBuilder::freeze`] resolves parent and link
//! targets by name, computes the hierarchy unions (fields, links, hidden,
//! embeddable, embed-by-default) and produces an immutable [`Model`] shared
//! by every interface.

use crate::core::entity::{Entity, EntityDef, LinkKind};
use crate::core::error::{CellarError, Result};
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Collects entity declarations before freezing
#[derive(Debug, Default)]
pub struct ModelBuilder {
    defs: Vec<EntityDef>,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, def: EntityDef) -> Self {
        self.defs.push(def);
        self
    }

    pub fn entities(mut self, defs: impl IntoIterator<Item = EntityDef>) -> Self {
        self.defs.extend(defs);
        self
    }

    /// Resolve names and compute hierarchy unions
    pub fn freeze(self) -> Result<Model> {
        let mut defs: IndexMap<String, EntityDef> = IndexMap::new();
        for def in self.defs {
            if defs.contains_key(&def.name) {
                return Err(CellarError::config(format!(
                    "entity '{}' declared twice",
                    def.name
                )));
            }
            defs.insert(def.name.clone(), def);
        }

        let mut chains: IndexMap<String, Vec<String>> = IndexMap::new();
        for name in defs.keys() {
            chains.insert(name.clone(), ancestor_chain(&defs, name)?);
        }

        let mut entities = IndexMap::new();
        for (name, chain) in &chains {
            let entity = merge(&defs, name, chain, &chains);
            debug!(entity = %name, type_tag = %entity.type_tag, "entity frozen");
            entities.insert(name.clone(), Arc::new(entity));
        }

        let model = Model { entities };
        model.check_links()?;
        Ok(model)
    }
}

/// Ancestors of `name`, root first, excluding `name`
fn ancestor_chain(defs: &IndexMap<String, EntityDef>, name: &str) -> Result<Vec<String>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::from([name.to_string()]);
    let mut current = defs.get(name).and_then(|d| d.parent.clone());

    while let Some(parent) = current {
        let Some(def) = defs.get(&parent) else {
            return Err(CellarError::config(format!(
                "entity '{}' extends unknown entity '{}'",
                name, parent
            )));
        };
        if !seen.insert(parent.clone()) {
            return Err(CellarError::config(format!(
                "inheritance cycle through '{}'",
                parent
            )));
        }
        chain.push(parent);
        current = def.parent.clone();
    }

    chain.reverse();
    Ok(chain)
}

fn merge(
    defs: &IndexMap<String, EntityDef>,
    name: &str,
    chain: &[String],
    chains: &IndexMap<String, Vec<String>>,
) -> Entity {
    let mut fields = IndexMap::new();
    let mut links = IndexMap::new();
    let mut hidden_fields = HashSet::new();
    let mut unique = Vec::new();

    let lineage = chain.iter().map(String::as_str).chain(std::iter::once(name));
    for def in lineage.filter_map(|n| defs.get(n)) {
        for field in &def.fields {
            if field.hidden {
                hidden_fields.insert(field.name.clone());
            }
            fields.insert(field.name.clone(), field.clone());
        }
        for link in &def.links {
            if link.hidden {
                hidden_fields.insert(link.name.clone());
            }
            links.insert(link.name.clone(), link.clone());
        }
        hidden_fields.extend(def.hidden_fields.iter().cloned());
        for field in &def.unique {
            if !unique.contains(field) {
                unique.push(field.clone());
            }
        }
    }

    // embed_by_default implies embeddable
    let embeddable = links
        .values()
        .filter(|l| l.embeddable || l.embed_by_default)
        .map(|l| l.name.clone())
        .collect();
    let embed_by_default = links
        .values()
        .filter(|l| l.embed_by_default)
        .map(|l| l.name.clone())
        .collect();

    let descendants = chains
        .iter()
        .filter(|(_, ancestors)| ancestors.iter().any(|a| a == name))
        .map(|(n, _)| n.clone())
        .collect();

    let mut tag_parts: Vec<&str> = chain.iter().map(String::as_str).collect();
    tag_parts.push(name);

    Entity {
        name: name.to_string(),
        type_tag: tag_parts.join("."),
        root: chain.first().cloned().unwrap_or_else(|| name.to_string()),
        ancestors: chain.to_vec(),
        descendants,
        fields,
        links,
        hidden_fields,
        embeddable,
        embed_by_default,
        unique,
    }
}

/// Frozen, read-only entity registry
#[derive(Debug, Clone, Default)]
pub struct Model {
    entities: IndexMap<String, Arc<Entity>>,
}

impl Model {
    pub fn builder() -> ModelBuilder {
        ModelBuilder::new()
    }

    pub fn entity(&self, name: &str) -> Option<Arc<Entity>> {
        self.entities.get(name).cloned()
    }

    /// Like [`Model::entity`], with a configuration error when unknown
    pub fn require(&self, name: &str) -> Result<Arc<Entity>> {
        self.entity(name)
            .ok_or_else(|| CellarError::config(format!("unknown entity '{}'", name)))
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.entities.values()
    }

    /// Map a polymorphic type tag back to a node of `base`'s hierarchy
    ///
    /// Only the last segment of a dotted tag matters. The result is `base`
    /// itself or one of its descendants; anything else is a broken tag.
    pub fn resolve_type(&self, base: &Arc<Entity>, type_name: &str) -> Result<Arc<Entity>> {
        self.subtype_of(base, type_name).ok_or_else(|| {
            CellarError::config(format!(
                "type '{}' is not part of the '{}' hierarchy",
                type_name,
                base.name()
            ))
        })
    }

    /// Like [`Model::resolve_type`] without the error, for tags sent by clients
    pub fn subtype_of(&self, base: &Arc<Entity>, type_name: &str) -> Option<Arc<Entity>> {
        let last = type_name.rsplit('.').next().unwrap_or(type_name);
        if last == base.name() {
            return Some(Arc::clone(base));
        }
        if base.descendants().iter().any(|d| d == last) {
            return self.entity(last);
        }
        None
    }

    fn check_links(&self) -> Result<()> {
        for entity in self.entities.values() {
            for link in entity.links().values() {
                let Some(target) = self.entities.get(&link.entity) else {
                    return Err(CellarError::config(format!(
                        "link '{}.{}' targets unknown entity '{}'",
                        entity.name(),
                        link.name,
                        link.entity
                    )));
                };
                if let LinkKind::Inverse { field, .. } = &link.kind
                    && !target.is_stored_field(field)
                {
                    return Err(CellarError::config(format!(
                        "inverse link '{}.{}' uses '{}.{}' which is not a stored field",
                        entity.name(),
                        link.name,
                        target.name(),
                        field
                    )));
                }
            }
        }
        Ok(())
    }
}
