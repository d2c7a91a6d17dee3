//! Authorization expression trees
//!
//! Rules are declared once, as plain boolean expressions over the request
//! [`Context`], and re-evaluated for every request (and for every item of a
//! list response). Every node is immutable: combinators and comparisons
//! always build a new tree.
//!
//! ```rust,ignore
//! use cellar::prelude::*;
//!
//! let admin = identity().field("role").equals("admin");
//! let owner = item().field("owner").equals(identity().field("id"));
//! let rule = admin | owner;
//!
//! assert!(rule.uses("item"));
//! assert!(rule.uses("identity"));
//! ```
//!
//! Navigating a path that does not exist yields a missing value, and every
//! comparison involving a missing value is false. Nothing in this module
//! raises on absent keys; the authentication check lives in
//! [`RuleSet`](crate::core::rules::RuleSet).

use crate::core::context::{Context, IDENTITY, ITEM, Lookup};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

// =============================================================================
// Accessors
// =============================================================================

/// A path into the context, `root.segment.segment`
///
/// Serialized as its dotted form (`"identity.role"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Accessor {
    root: String,
    path: Vec<String>,
}

/// Accessor bound to the authenticated principal
pub fn identity() -> Accessor {
    Accessor::new(IDENTITY)
}

/// Accessor bound to the item under check
pub fn item() -> Accessor {
    Accessor::new(ITEM)
}

impl Accessor {
    /// Create an accessor on a root context key
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            path: Vec::new(),
        }
    }

    /// Parse a dotted path such as `identity.team.id`
    pub fn parse(dotted: &str) -> Option<Self> {
        let mut segments = dotted.split('.');
        let root = segments.next().filter(|s| !s.is_empty())?;
        let path: Vec<String> = segments.map(str::to_string).collect();
        if path.iter().any(String::is_empty) {
            return None;
        }
        Some(Self {
            root: root.to_string(),
            path,
        })
    }

    /// Chain one more segment, returning a new accessor
    pub fn field(&self, name: impl Into<String>) -> Accessor {
        let mut path = self.path.clone();
        path.push(name.into());
        Accessor {
            root: self.root.clone(),
            path,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn segments(&self) -> &[String] {
        &self.path
    }

    pub fn resolve<'c>(&self, context: &'c Context) -> Lookup<'c> {
        context.lookup(&self.root, &self.path)
    }

    // === Node builders ===

    pub fn equals(&self, other: impl Into<Operand>) -> Expr {
        self.compare(CompareOp::Eq, other)
    }

    pub fn not_equals(&self, other: impl Into<Operand>) -> Expr {
        self.compare(CompareOp::Ne, other)
    }

    pub fn lt(&self, other: impl Into<Operand>) -> Expr {
        self.compare(CompareOp::Lt, other)
    }

    pub fn lte(&self, other: impl Into<Operand>) -> Expr {
        self.compare(CompareOp::Lte, other)
    }

    pub fn gt(&self, other: impl Into<Operand>) -> Expr {
        self.compare(CompareOp::Gt, other)
    }

    pub fn gte(&self, other: impl Into<Operand>) -> Expr {
        self.compare(CompareOp::Gte, other)
    }

    /// The value at this path (array, string or object) contains `needle`
    pub fn contains(&self, needle: impl Into<Operand>) -> Expr {
        Expr::Contains {
            haystack: Operand::Path(self.clone()),
            needle: needle.into(),
        }
    }

    /// The value at this path is a member of `haystack`
    pub fn is_in(&self, haystack: impl Into<Operand>) -> Expr {
        Expr::Contains {
            haystack: haystack.into(),
            needle: Operand::Path(self.clone()),
        }
    }

    /// The path resolves to a non-null value
    pub fn exists(&self) -> Expr {
        Expr::Exists(self.clone())
    }

    fn compare(&self, op: CompareOp, other: impl Into<Operand>) -> Expr {
        Expr::Compare {
            op,
            left: Operand::Path(self.clone()),
            right: other.into(),
        }
    }
}

impl fmt::Display for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for segment in &self.path {
            write!(f, ".{}", segment)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for Accessor {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Accessor::parse(&value).ok_or_else(|| format!("invalid accessor path '{}'", value))
    }
}

impl From<Accessor> for String {
    fn from(accessor: Accessor) -> Self {
        accessor.to_string()
    }
}

// =============================================================================
// Operands
// =============================================================================

/// One side of a comparison: a context path or a literal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Path(Accessor),
    Value(Value),
}

impl Operand {
    pub fn resolve<'a>(&'a self, context: &'a Context) -> Lookup<'a> {
        match self {
            Operand::Path(accessor) => accessor.resolve(context),
            Operand::Value(value) => Lookup::Found(value),
        }
    }

    pub fn uses(&self, key: &str) -> bool {
        match self {
            Operand::Path(accessor) => accessor.root() == key,
            Operand::Value(_) => false,
        }
    }
}

impl From<Accessor> for Operand {
    fn from(accessor: Accessor) -> Self {
        Operand::Path(accessor)
    }
}

impl From<&Accessor> for Operand {
    fn from(accessor: &Accessor) -> Self {
        Operand::Path(accessor.clone())
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

impl From<&str> for Operand {
    fn from(value: &str) -> Self {
        Operand::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Operand {
    fn from(value: String) -> Self {
        Operand::Value(Value::String(value))
    }
}

impl From<i64> for Operand {
    fn from(value: i64) -> Self {
        Operand::Value(Value::from(value))
    }
}

impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Operand::Value(Value::from(value))
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Value(Value::from(value))
    }
}

impl From<bool> for Operand {
    fn from(value: bool) -> Self {
        Operand::Value(Value::Bool(value))
    }
}

impl<T: Into<Value>> From<Vec<T>> for Operand {
    fn from(values: Vec<T>) -> Self {
        Operand::Value(Value::Array(values.into_iter().map(Into::into).collect()))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Path(accessor) => write!(f, "{}", accessor),
            Operand::Value(value) => write!(f, "{}", value),
        }
    }
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

/// A boolean-valued node evaluated against a [`Context`]
///
/// Two trees are equal when they are structurally identical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    /// Constant leaf
    Const(bool),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// The path resolves to a non-null value
    Exists(Accessor),
    Compare {
        op: CompareOp,
        left: Operand,
        right: Operand,
    },
    Contains {
        haystack: Operand,
        needle: Operand,
    },
}

impl Expr {
    pub fn always() -> Self {
        Expr::Const(true)
    }

    pub fn never() -> Self {
        Expr::Const(false)
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::Or(Box::new(self), Box::new(other))
    }

    /// AND of every expression, `None` when the iterator is empty
    pub fn all(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(Expr::and)
    }

    /// OR of every expression, `None` when the iterator is empty
    pub fn any(exprs: impl IntoIterator<Item = Expr>) -> Option<Self> {
        exprs.into_iter().reduce(Expr::or)
    }

    pub fn evaluate(&self, context: &Context) -> bool {
        match self {
            Expr::Const(value) => *value,
            Expr::And(left, right) => left.evaluate(context) && right.evaluate(context),
            Expr::Or(left, right) => left.evaluate(context) || right.evaluate(context),
            Expr::Not(inner) => !inner.evaluate(context),
            Expr::Exists(accessor) => {
                matches!(accessor.resolve(context), Lookup::Found(value) if !value.is_null())
            }
            Expr::Compare { op, left, right } => {
                match (left.resolve(context), right.resolve(context)) {
                    (Lookup::Found(l), Lookup::Found(r)) => compare(*op, l, r),
                    _ => false,
                }
            }
            Expr::Contains { haystack, needle } => {
                match (haystack.resolve(context), needle.resolve(context)) {
                    (Lookup::Found(h), Lookup::Found(n)) => contains(h, n),
                    _ => false,
                }
            }
        }
    }

    /// Whether evaluating this tree reads `context[key]`
    ///
    /// Pure static analysis, no context involved.
    pub fn uses(&self, key: &str) -> bool {
        match self {
            Expr::Const(_) => false,
            Expr::And(left, right) | Expr::Or(left, right) => left.uses(key) || right.uses(key),
            Expr::Not(inner) => inner.uses(key),
            Expr::Exists(accessor) => accessor.root() == key,
            Expr::Compare { left, right, .. } => left.uses(key) || right.uses(key),
            Expr::Contains { haystack, needle } => haystack.uses(key) || needle.uses(key),
        }
    }
}

impl std::ops::BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        self.and(rhs)
    }
}

impl std::ops::BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Expr {
        self.or(rhs)
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::Const(value)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(value) => write!(f, "{}", value),
            Expr::And(left, right) => write!(f, "({} & {})", left, right),
            Expr::Or(left, right) => write!(f, "({} | {})", left, right),
            Expr::Not(inner) => write!(f, "~{}", inner),
            Expr::Exists(accessor) => write!(f, "exists({})", accessor),
            Expr::Compare { op, left, right } => {
                write!(f, "{} {} {}", left, op.symbol(), right)
            }
            Expr::Contains { haystack, needle } => write!(f, "{} in {}", needle, haystack),
        }
    }
}

// =============================================================================
// Value semantics
// =============================================================================

/// Equality with numbers compared by value (`1 == 1.0`)
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_f64(), r.as_f64()) {
            (Some(l), Some(r)) => l == r,
            _ => l == r,
        },
        _ => left == right,
    }
}

/// Ordering defined for number/number and string/string only
pub(crate) fn values_cmp(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::Lt => values_cmp(left, right) == Some(Ordering::Less),
        CompareOp::Lte => matches!(
            values_cmp(left, right),
            Some(Ordering::Less | Ordering::Equal)
        ),
        CompareOp::Gt => values_cmp(left, right) == Some(Ordering::Greater),
        CompareOp::Gte => matches!(
            values_cmp(left, right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Array(items), _) => items.iter().any(|v| values_equal(v, needle)),
        (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
        (Value::Object(map), Value::String(key)) => map.contains_key(key),
        _ => false,
    }
}
