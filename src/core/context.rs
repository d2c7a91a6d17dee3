//! Per-request evaluation context
//!
//! A [`Context`] is the mapping authorization expressions are evaluated
//! against. It holds the authenticated principal under `identity` (absent for
//! anonymous requests) and, during item-rule checks only, the entity being
//! checked under `item`. Values are arbitrary JSON so rules can navigate
//! nested structures (`identity.role`, `item.owner.id`).
//!
//! A context is owned by exactly one request: it is mutated in place while
//! item rules run over a list, so it must never be shared between concurrent
//! evaluations.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Context key of the authenticated principal
pub const IDENTITY: &str = "identity";

/// Context key of the item under check
pub const ITEM: &str = "item";

/// Result of navigating a path through the context
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    /// The path resolved to a value (possibly JSON `null`)
    Found(&'a Value),
    /// Some segment of the path does not exist
    Missing,
}

impl<'a> Lookup<'a> {
    pub fn is_missing(&self) -> bool {
        matches!(self, Lookup::Missing)
    }

    pub fn value(&self) -> Option<&'a Value> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::Missing => None,
        }
    }
}

/// Request-scoped mapping consulted by rule evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    values: Map<String, Value>,
}

impl Context {
    /// Create an empty (anonymous) context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context for an authenticated principal
    pub fn with_identity(identity: Value) -> Self {
        let mut context = Self::new();
        context.insert(IDENTITY, identity);
        context
    }

    pub fn from_map(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn identity(&self) -> Option<&Value> {
        self.get(IDENTITY)
    }

    pub fn is_authenticated(&self) -> bool {
        self.contains(IDENTITY)
    }

    /// Bind the `item` slot, returning whatever was bound before
    pub fn set_item(&mut self, item: Value) -> Option<Value> {
        self.insert(ITEM, item)
    }

    /// Restore the `item` slot to a previous binding (or clear it)
    pub fn restore_item(&mut self, previous: Option<Value>) {
        match previous {
            Some(value) => {
                self.insert(ITEM, value);
            }
            None => {
                self.remove(ITEM);
            }
        }
    }

    /// Navigate `root.path[0].path[1]...`
    ///
    /// Objects are traversed by key and arrays by numeric index. Traversing
    /// into a scalar or `null`, or through an absent key, yields
    /// [`Lookup::Missing`] rather than an error.
    pub fn lookup<S: AsRef<str>>(&self, root: &str, path: &[S]) -> Lookup<'_> {
        let Some(mut current) = self.values.get(root) else {
            return Lookup::Missing;
        };

        for segment in path {
            let segment = segment.as_ref();
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Lookup::Missing,
            }
        }

        Lookup::Found(current)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

impl From<Map<String, Value>> for Context {
    fn from(values: Map<String, Value>) -> Self {
        Self::from_map(values)
    }
}
