//! Entity declarations and their frozen form
//!
//! Entities are declared as plain data ([`EntityDef`], [`FieldDef`],
//! [`LinkDef`]), either in code or from YAML, and referenced by name so a
//! link may point at an entity declared later. [`Model`](crate::core::model::Model)
//! resolves those names and freezes every declaration into an [`Entity`]
//! carrying the unions computed across its ancestor chain.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// A stored item: a JSON object
pub type Item = Map<String, Value>;

/// Identifier field set by storage
pub const ID_FIELD: &str = "_id";

/// Polymorphic type tag field, e.g. `Animal.Dog`
pub const TYPE_FIELD: &str = "_type";

/// Fields starting with this marker are internal and always preserved
pub const INTERNAL_PREFIX: char = '_';

pub fn is_internal(field: &str) -> bool {
    field.starts_with(INTERNAL_PREFIX)
}

/// Identifier of an item, when present and textual
pub fn item_id(item: &Item) -> Option<&str> {
    item.get(ID_FIELD).and_then(Value::as_str)
}

/// Expected shape of a field value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Integer,
    Float,
    Boolean,
    /// Id of another item
    Reference,
    List,
    Object,
    #[default]
    Any,
}

/// A declared field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub hidden: bool,
    /// Regex a text value must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            hidden: false,
            pattern: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}

/// What happens to dependents when the referenced item is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    /// Delete the dependents too
    Cascade,
    /// Clear the dependents' reference
    Nullify,
}

/// How a link is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkKind {
    /// The item holds the target id (or ids) under the link name
    Reference {
        #[serde(default)]
        multiple: bool,
    },
    /// The target items hold this item's id under `field`
    Inverse {
        field: String,
        #[serde(default = "default_true")]
        multiple: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_delete: Option<OnDelete>,
    },
}

fn default_true() -> bool {
    true
}

/// A declared relationship to another entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDef {
    pub name: String,
    /// Target entity name
    pub entity: String,
    #[serde(flatten)]
    pub kind: LinkKind,
    #[serde(default)]
    pub embeddable: bool,
    #[serde(default)]
    pub embed_by_default: bool,
    /// Field restriction applied when this link is embedded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_fields: Option<Vec<String>>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub required: bool,
}

impl LinkDef {
    /// A link stored on this item as the target's id
    pub fn reference(name: impl Into<String>, entity: impl Into<String>) -> Self {
        Self::with_kind(name, entity, LinkKind::Reference { multiple: false })
    }

    /// A back-reference: targets whose `field` holds this item's id
    pub fn inverse(
        name: impl Into<String>,
        entity: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            name,
            entity,
            LinkKind::Inverse {
                field: field.into(),
                multiple: true,
                on_delete: None,
            },
        )
    }

    fn with_kind(name: impl Into<String>, entity: impl Into<String>, kind: LinkKind) -> Self {
        Self {
            name: name.into(),
            entity: entity.into(),
            kind,
            embeddable: false,
            embed_by_default: false,
            embedded_fields: None,
            hidden: false,
            required: false,
        }
    }

    /// Hold several targets instead of one
    pub fn multiple(mut self) -> Self {
        match &mut self.kind {
            LinkKind::Reference { multiple } | LinkKind::Inverse { multiple, .. } => {
                *multiple = true
            }
        }
        self
    }

    /// Hold (or resolve to) a single target
    pub fn single(mut self) -> Self {
        match &mut self.kind {
            LinkKind::Reference { multiple } | LinkKind::Inverse { multiple, .. } => {
                *multiple = false
            }
        }
        self
    }

    pub fn embeddable(mut self) -> Self {
        self.embeddable = true;
        self
    }

    /// Embed unless the caller asks otherwise; implies embeddable
    pub fn embed_by_default(mut self) -> Self {
        self.embeddable = true;
        self.embed_by_default = true;
        self
    }

    pub fn embedded_fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.embedded_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Cleanup policy for inverse links, ignored on references
    pub fn on_delete(mut self, policy: OnDelete) -> Self {
        if let LinkKind::Inverse { on_delete, .. } = &mut self.kind {
            *on_delete = Some(policy);
        }
        self
    }

    pub fn is_multiple(&self) -> bool {
        match &self.kind {
            LinkKind::Reference { multiple } | LinkKind::Inverse { multiple, .. } => *multiple,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self.kind, LinkKind::Reference { .. })
    }
}

/// Declaration of an entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    /// Parent entity name for polymorphic hierarchies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub links: Vec<LinkDef>,
    /// Extra hidden names on top of fields/links flagged `hidden`
    #[serde(default)]
    pub hidden_fields: Vec<String>,
    /// Fields whose value must be unique across the family
    #[serde(default)]
    pub unique: Vec<String>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn link(mut self, link: LinkDef) -> Self {
        self.links.push(link);
        self
    }

    pub fn unique(mut self, field: impl Into<String>) -> Self {
        self.unique.push(field.into());
        self
    }
}

/// A frozen entity: own declarations merged with its ancestors'
#[derive(Debug, Clone)]
pub struct Entity {
    pub(crate) name: String,
    pub(crate) type_tag: String,
    pub(crate) root: String,
    pub(crate) ancestors: Vec<String>,
    pub(crate) descendants: Vec<String>,
    pub(crate) fields: IndexMap<String, FieldDef>,
    pub(crate) links: IndexMap<String, LinkDef>,
    pub(crate) hidden_fields: HashSet<String>,
    pub(crate) embeddable: HashSet<String>,
    pub(crate) embed_by_default: HashSet<String>,
    pub(crate) unique: Vec<String>,
}

impl Entity {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dotted tag from the hierarchy root, e.g. `Animal.Dog`
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    /// Name of the hierarchy root, which owns the storage collection
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Ancestor names, root first, excluding self
    pub fn ancestors(&self) -> &[String] {
        &self.ancestors
    }

    /// Every entity below this one in the hierarchy
    pub fn descendants(&self) -> &[String] {
        &self.descendants
    }

    pub fn fields(&self) -> &IndexMap<String, FieldDef> {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    pub fn links(&self) -> &IndexMap<String, LinkDef> {
        &self.links
    }

    pub fn link(&self, name: &str) -> Option<&LinkDef> {
        self.links.get(name)
    }

    pub fn hidden_fields(&self) -> &HashSet<String> {
        &self.hidden_fields
    }

    pub fn embeddable(&self) -> &HashSet<String> {
        &self.embeddable
    }

    pub fn embed_by_default(&self) -> &HashSet<String> {
        &self.embed_by_default
    }

    pub fn unique_fields(&self) -> &[String] {
        &self.unique
    }

    /// Whether a stored `_type` tag belongs to this entity or a descendant
    pub fn matches_type(&self, tag: &str) -> bool {
        tag == self.type_tag
            || tag
                .strip_prefix(self.type_tag.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    }

    /// Every name that is storable on an item: fields and reference links
    pub fn is_stored_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
            || self.links.get(name).is_some_and(LinkDef::is_reference)
    }
}
