//! Configuration loading and management
//!
//! An [`ApiConfig`] declares a whole API in YAML: the entities of the model
//! and the interfaces exposing them, with their rules and list settings.
//!
//! ```yaml
//! entities:
//!   - name: Post
//!     fields:
//!       - { name: title, kind: text, required: true }
//!       - { name: owner, kind: text }
//! interfaces:
//!   - name: Posts
//!     entity: Post
//!     max_limit: 50
//!     rules:
//!       - methods: [list, get]
//!       - methods: [update, delete]
//!         rule:
//!           compare: { op: eq, left: { path: item.owner }, right: { path: identity.id } }
//! ```

use crate::core::entity::EntityDef;
use crate::core::expression::Expr;
use crate::core::model::Model;
use crate::core::options::ListSettings;
use crate::core::rules::{Method, RuleSet};
use crate::core::service::Storage;
use crate::interface::{Api, InterfaceDef};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// One `methods -> rule` entry; a missing rule enables the methods unconditionally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub methods: Vec<Method>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_yaml::with::singleton_map_recursive"
    )]
    pub rule: Option<Expr>,
}

/// Configuration for one interface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,

    /// Exposed entity
    pub entity: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plural: Option<String>,

    /// Methods absent from every entry are disabled
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    #[serde(flatten)]
    pub settings: ListSettings,
}

impl InterfaceConfig {
    pub fn to_def(&self) -> InterfaceDef {
        let rules = RuleSet::new(
            self.rules
                .iter()
                .map(|entry| (entry.methods.clone(), entry.rule.clone())),
        );
        let def = InterfaceDef::new(&self.name, &self.entity)
            .rules(rules)
            .settings(self.settings.clone());
        match &self.plural {
            Some(plural) => def.plural(plural),
            None => def,
        }
    }
}

/// Complete configuration of an API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub entities: Vec<EntityDef>,

    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
}

impl ApiConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Merge several configurations, later ones replacing same-named entries
    pub fn merge(configs: Vec<ApiConfig>) -> Self {
        let mut merged = ApiConfig::default();
        for config in configs {
            for entity in config.entities {
                match merged.entities.iter_mut().find(|e| e.name == entity.name) {
                    Some(existing) => *existing = entity,
                    None => merged.entities.push(entity),
                }
            }
            for interface in config.interfaces {
                match merged.interfaces.iter_mut().find(|i| i.name == interface.name) {
                    Some(existing) => *existing = interface,
                    None => merged.interfaces.push(interface),
                }
            }
        }
        merged
    }

    /// Freeze the declared entities
    pub fn model(&self) -> crate::core::error::Result<Model> {
        Model::builder().entities(self.entities.iter().cloned()).freeze()
    }

    /// Build the API over `storage`
    pub fn build(&self, storage: Arc<dyn Storage>) -> crate::core::error::Result<Arc<Api>> {
        Api::builder(self.model()?, storage)
            .interfaces(self.interfaces.iter().map(InterfaceConfig::to_def))
            .build()
    }
}
