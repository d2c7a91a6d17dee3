//! Per-interface authorization rules
//!
//! A [`RuleSet`] is declared once per interface from a mapping of methods to
//! optional expressions. A method absent from the mapping is disabled; a
//! method mapped to `None` is enabled without conditions. Expressions are
//! split once, at declaration time, into:
//!
//! - **non-item rules**, evaluable before storage is touched (role checks)
//! - **item rules**, whose tree uses `item` and which run against every
//!   fetched, created or updated item
//!
//! Several rules for the same method must all pass.

use crate::core::context::{Context, IDENTITY, ITEM};
use crate::core::entity::Item;
use crate::core::error::{CellarError, Result};
use crate::core::expression::Expr;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Verbs an interface can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    List,
    Get,
    Create,
    /// Partial update
    Update,
    /// Full replacement
    Replace,
    Delete,
    /// Traverse a link from an item
    Link,
}

impl Method {
    pub const ALL: [Method; 7] = [
        Method::List,
        Method::Get,
        Method::Create,
        Method::Update,
        Method::Replace,
        Method::Delete,
        Method::Link,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::List => "list",
            Method::Get => "get",
            Method::Create => "create",
            Method::Update => "update",
            Method::Replace => "replace",
            Method::Delete => "delete",
            Method::Link => "link",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = CellarError;

    fn from_str(s: &str) -> Result<Self> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| CellarError::config(format!("unknown method '{}'", s)))
    }
}

/// One or several methods sharing a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Methods(pub Vec<Method>);

impl From<Method> for Methods {
    fn from(method: Method) -> Self {
        Methods(vec![method])
    }
}

impl From<Vec<Method>> for Methods {
    fn from(methods: Vec<Method>) -> Self {
        Methods(methods)
    }
}

impl From<&[Method]> for Methods {
    fn from(methods: &[Method]) -> Self {
        Methods(methods.to_vec())
    }
}

impl<const N: usize> From<[Method; N]> for Methods {
    fn from(methods: [Method; N]) -> Self {
        Methods(methods.to_vec())
    }
}

/// Authorization rules of one interface
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    enabled: HashSet<Method>,
    item_rules: HashMap<Method, Vec<Expr>>,
    non_item_rules: HashMap<Method, Vec<Expr>>,
}

impl RuleSet {
    /// Build from `(methods, rule)` pairs
    ///
    /// ```rust,ignore
    /// let rules = RuleSet::new([
    ///     (Methods::from([Method::List, Method::Get, Method::Create]), None),
    ///     (Methods::from([Method::Update, Method::Delete]), Some(identity().field("role").equals("admin"))),
    /// ]);
    /// ```
    pub fn new<M: Into<Methods>>(rules: impl IntoIterator<Item = (M, Option<Expr>)>) -> Self {
        let mut set = Self::default();
        for (methods, rule) in rules {
            for method in methods.into().0 {
                set.add(method, rule.clone());
            }
        }
        set
    }

    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder::default()
    }

    fn add(&mut self, method: Method, rule: Option<Expr>) {
        self.enabled.insert(method);
        let Some(rule) = rule else {
            return;
        };

        if rule.uses(ITEM) {
            debug!(%method, %rule, "item rule");
            self.item_rules.entry(method).or_default().push(rule);
        } else {
            debug!(%method, %rule, "non-item rule");
            self.non_item_rules.entry(method).or_default().push(rule);
        }
    }

    pub fn is_enabled(&self, method: Method) -> bool {
        self.enabled.contains(&method)
    }

    /// Fail with a disabled-method error unless `method` was declared
    pub fn ensure_enabled(&self, interface: &str, method: Method) -> Result<()> {
        if self.is_enabled(method) {
            Ok(())
        } else {
            warn!(interface, %method, "disabled method called");
            Err(CellarError::DisabledMethod {
                interface: interface.to_string(),
                method,
            })
        }
    }

    pub fn item_rules(&self, method: Method) -> &[Expr] {
        self.item_rules.get(&method).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn non_item_rules(&self, method: Method) -> &[Expr] {
        self.non_item_rules
            .get(&method)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Run the rules that need no item
    pub fn enforce_non_item_rules(&self, method: Method, context: &Context) -> Result<()> {
        self.non_item_rules(method)
            .iter()
            .try_for_each(|rule| check_rule(method, rule, context))
    }

    /// Run the item rules against a single item
    pub fn enforce_item_rule(&self, method: Method, item: &Item, context: &mut Context) -> Result<()> {
        self.enforce_item_rules(method, std::slice::from_ref(item), context)
    }

    /// Run the item rules against every item, aborting on the first failure
    ///
    /// The context's `item` slot is rebound to each item in turn, then
    /// restored to its prior binding.
    pub fn enforce_item_rules(
        &self,
        method: Method,
        items: &[Item],
        context: &mut Context,
    ) -> Result<()> {
        let rules = self.item_rules(method);
        if rules.is_empty() {
            return Ok(());
        }

        let previous = context.remove(ITEM);
        let outcome = items.iter().try_for_each(|item| {
            context.set_item(Value::Object(item.clone()));
            rules
                .iter()
                .try_for_each(|rule| check_rule(method, rule, context))
        });
        context.restore_item(previous);
        outcome
    }
}

fn check_rule(method: Method, rule: &Expr, context: &Context) -> Result<()> {
    if rule.uses(IDENTITY) && !context.is_authenticated() {
        warn!(%method, %rule, "rule requires an identity");
        return Err(CellarError::NotAuthenticated);
    }
    if !rule.evaluate(context) {
        warn!(%method, %rule, "rule denied");
        return Err(CellarError::NotAuthorized { method });
    }
    Ok(())
}

/// Fluent construction of a [`RuleSet`]
#[derive(Debug, Default)]
pub struct RuleSetBuilder {
    rules: Vec<(Methods, Option<Expr>)>,
}

impl RuleSetBuilder {
    /// Enable methods without conditions
    pub fn allow(mut self, methods: impl Into<Methods>) -> Self {
        self.rules.push((methods.into(), None));
        self
    }

    /// Enable methods guarded by `rule`
    pub fn require(mut self, methods: impl Into<Methods>, rule: Expr) -> Self {
        self.rules.push((methods.into(), Some(rule)));
        self
    }

    pub fn build(self) -> RuleSet {
        RuleSet::new(self.rules)
    }
}
