//! Filter and sort primitives shared by options and storage backends
//!
//! # Filter format
//!
//! A filter is a JSON object whose keys are field names:
//!
//! - Exact match: `{"status": "active"}` (on an array field: the array contains the value)
//! - Operators: `{"age": {"$gte": 18, "$lt": 65}}`, `$ne`, `$gt`, `$lte`, `$in`, `$nin`, `$exists`
//! - Combinators: `{"$or": [{"status": "active"}, {"owner": "$identity.id"}]}`, `$and`
//!
//! String values of the form `$identity` or `$identity.<path>` are replaced by
//! the matching value of the request context when the filter is checked.
//!
//! # Sort format
//!
//! A sort key is a field name with an optional sign: `+name` / `name`
//! (ascending) or `-name` (descending).

use crate::core::context::{Context, IDENTITY};
use crate::core::entity::Item;
use crate::core::error::{CellarError, Result};
use crate::core::expression::{values_cmp, values_equal};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

const IDENTITY_TOKEN: &str = "$identity";

const OPERATORS: &[&str] = &["$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists"];

// =============================================================================
// Filter
// =============================================================================

/// A storage filter over item fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(pub Map<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match `field` against `value` exactly
    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = Map::new();
        map.insert(field.into(), value.into());
        Filter(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Both filters must match; an empty side is dropped
    pub fn and(self, other: Filter) -> Self {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => other,
            (_, true) => self,
            _ => {
                let mut map = Map::new();
                map.insert(
                    "$and".to_string(),
                    Value::Array(vec![Value::Object(self.0), Value::Object(other.0)]),
                );
                Filter(map)
            }
        }
    }

    /// Every field name referenced, including inside `$and`/`$or`
    pub fn fields(&self) -> Result<Vec<String>> {
        let mut fields = Vec::new();
        collect_fields(&self.0, &mut fields)?;
        Ok(fields)
    }

    /// Evaluate the filter against a stored item
    pub fn matches(&self, item: &Item) -> bool {
        matches_map(&self.0, item)
    }
}

impl From<Map<String, Value>> for Filter {
    fn from(map: Map<String, Value>) -> Self {
        Filter(map)
    }
}

fn collect_fields(map: &Map<String, Value>, out: &mut Vec<String>) -> Result<()> {
    for (key, value) in map {
        match key.as_str() {
            "$and" | "$or" => {
                let Value::Array(clauses) = value else {
                    return Err(CellarError::bad_request(format!("{} expects a list", key)));
                };
                for clause in clauses {
                    let Value::Object(clause) = clause else {
                        return Err(CellarError::bad_request(format!(
                            "{} expects a list of objects",
                            key
                        )));
                    };
                    collect_fields(clause, out)?;
                }
            }
            k if k.starts_with('$') => {
                return Err(CellarError::bad_request(format!("unknown filter operator '{}'", k)));
            }
            field => {
                if let Value::Object(ops) = value
                    && ops.keys().any(|k| k.starts_with('$'))
                    && let Some(op) = ops.keys().find(|op| !OPERATORS.contains(&op.as_str()))
                {
                    return Err(CellarError::bad_request(format!(
                        "unknown filter operator '{}' on '{}'",
                        op, field
                    )));
                }
                let root = field.split('.').next().unwrap_or(field);
                out.push(root.to_string());
            }
        }
    }
    Ok(())
}

/// Validate filter fields against an allow-list and substitute identity tokens
///
/// Raises a disabled-field error naming the first field outside `allowed`.
/// With `allowed` set to `None` every field is accepted (trusted calls).
pub fn check_filter(
    filter: &Filter,
    allowed: Option<&HashSet<String>>,
    context: &Context,
) -> Result<Filter> {
    let fields = filter.fields()?;
    if let Some(allowed) = allowed
        && let Some(field) = fields.iter().find(|f| !allowed.contains(f.as_str()))
    {
        return Err(CellarError::disabled_field(field.as_str()));
    }

    let mut resolved = Map::new();
    for (key, value) in &filter.0 {
        resolved.insert(key.clone(), substitute(value, context)?);
    }
    Ok(Filter(resolved))
}

fn substitute(value: &Value, context: &Context) -> Result<Value> {
    match value {
        Value::String(s) if s == IDENTITY_TOKEN || s.starts_with("$identity.") => {
            if !context.is_authenticated() {
                return Err(CellarError::NotAuthenticated);
            }
            let path: Vec<&str> = s[IDENTITY_TOKEN.len()..]
                .split('.')
                .filter(|p| !p.is_empty())
                .collect();
            Ok(context
                .lookup(IDENTITY, &path)
                .value()
                .cloned()
                .unwrap_or(Value::Null))
        }
        Value::Array(items) => items
            .iter()
            .map(|v| substitute(v, context))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), substitute(v, context)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn field_value<'a>(item: &'a Item, field: &str) -> Option<&'a Value> {
    let mut segments = field.split('.');
    let mut current = item.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn matches_map(map: &Map<String, Value>, item: &Item) -> bool {
    map.iter().all(|(key, condition)| match key.as_str() {
        "$and" => clauses(condition).all(|c| matches_map(c, item)),
        "$or" => clauses(condition).any(|c| matches_map(c, item)),
        field => matches_condition(field_value(item, field), condition),
    })
}

fn clauses(value: &Value) -> impl Iterator<Item = &Map<String, Value>> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn is_operator_object(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|m| !m.is_empty() && m.keys().all(|k| k.starts_with('$')))
}

fn equals_or_contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) if !expected.is_array() => items.iter().any(|v| values_equal(v, expected)),
        _ => values_equal(actual, expected),
    }
}

fn matches_condition(actual: Option<&Value>, condition: &Value) -> bool {
    if !is_operator_object(condition) {
        return match actual {
            Some(actual) => equals_or_contains(actual, condition),
            None => condition.is_null(),
        };
    }

    let Some(ops) = condition.as_object() else {
        return false;
    };
    ops.iter().all(|(op, operand)| match (op.as_str(), actual) {
        ("$exists", _) => operand.as_bool().unwrap_or(true) == actual.is_some_and(|v| !v.is_null()),
        ("$ne", None) => !operand.is_null(),
        ("$ne", Some(actual)) => !equals_or_contains(actual, operand),
        ("$nin", None) => true,
        ("$nin", Some(actual)) => !operand
            .as_array()
            .is_some_and(|values| values.iter().any(|v| equals_or_contains(actual, v))),
        ("$in", Some(actual)) => operand
            .as_array()
            .is_some_and(|values| values.iter().any(|v| equals_or_contains(actual, v))),
        ("$gt", Some(actual)) => values_cmp(actual, operand) == Some(Ordering::Greater),
        ("$gte", Some(actual)) => matches!(
            values_cmp(actual, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        ("$lt", Some(actual)) => values_cmp(actual, operand) == Some(Ordering::Less),
        ("$lte", Some(actual)) => matches!(
            values_cmp(actual, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        _ => false,
    })
}

// =============================================================================
// Sort
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// A signed sort key, `+field` or `-field`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }
}

impl FromStr for SortKey {
    type Err = CellarError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (direction, field) = match s.chars().next() {
            Some('-') => (SortDirection::Descending, &s[1..]),
            Some('+') => (SortDirection::Ascending, &s[1..]),
            _ => (SortDirection::Ascending, s),
        };
        if field.is_empty() {
            return Err(CellarError::bad_request(format!("invalid sort key '{}'", s)));
        }
        Ok(Self {
            field: field.to_string(),
            direction,
        })
    }
}

impl TryFrom<String> for SortKey {
    type Error = CellarError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SortKey> for String {
    fn from(key: SortKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = match self.direction {
            SortDirection::Ascending => '+',
            SortDirection::Descending => '-',
        };
        write!(f, "{}{}", sign, self.field)
    }
}

/// Order two items by successive sort keys; missing values sort first
pub fn compare_items(a: &Item, b: &Item, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let ordering = match (field_value(a, &key.field), field_value(b, &key.field)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => values_cmp(x, y).unwrap_or(Ordering::Equal),
        };
        let ordering = match key.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
