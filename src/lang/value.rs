//! The dynamic value model shared by configuration, state, and providers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A dynamically-typed value.
///
/// `Unknown` is distinct from `Null`: an unknown value is one that will
/// exist but cannot be computed until apply time (for example a
/// provider-assigned identifier seen during planning), while a null value
/// is affirmatively absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// A value that will be known only after apply.
    Unknown,
    /// An affirmatively absent value.
    Null,
    /// A boolean.
    Bool(bool),
    /// A number. Integral values are formatted without a fraction.
    Number(f64),
    /// A string.
    String(String),
    /// An ordered list.
    List(Vec<Value>),
    /// A string-keyed map with deterministic iteration order.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns true for `Unknown`.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// Returns true for `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns true if this value or any nested value is unknown.
    #[must_use]
    pub fn contains_unknown(&self) -> bool {
        match self {
            Self::Unknown => true,
            Self::List(items) => items.iter().any(Value::contains_unknown),
            Self::Map(entries) => entries.values().any(Value::contains_unknown),
            _ => false,
        }
    }

    /// Returns the string content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean content, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value as a non-negative integer, if it is a whole
    /// number in range.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) if n.fract() == 0.0 && *n >= 0.0 => Some(*n as u64),
            _ => None,
        }
    }

    /// Returns the map content, if this is a map.
    #[must_use]
    pub const fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// A short name for the value's type, for diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Traverses an attribute path into this value. List elements are
    /// addressed by decimal index segments. Returns `None` if any segment
    /// is missing; traversing into an unknown value yields `Unknown`.
    #[must_use]
    pub fn traverse(&self, path: &[String]) -> Option<Value> {
        let mut current = self;
        for segment in path {
            match current {
                Self::Unknown => return Some(Self::Unknown),
                Self::Map(entries) => current = entries.get(segment)?,
                Self::List(items) => {
                    let index: usize = segment.parse().ok()?;
                    current = items.get(index)?;
                }
                _ => return None,
            }
        }
        Some(current.clone())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Self::Map(entries)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "(known after apply)"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => {
                if n.fract() == 0.0 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Self::String(s) => write!(f, "{s}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k} = {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_unknown_recurses() {
        let mut entries = BTreeMap::new();
        entries.insert(
            String::from("inner"),
            Value::List(vec![Value::from("a"), Value::Unknown]),
        );
        let value = Value::Map(entries);
        assert!(value.contains_unknown());
        assert!(!Value::from("a").contains_unknown());
    }

    #[test]
    fn test_traverse_map_and_list() {
        let mut entries = BTreeMap::new();
        entries.insert(
            String::from("items"),
            Value::List(vec![Value::from("x"), Value::from("y")]),
        );
        let value = Value::Map(entries);
        let path = vec![String::from("items"), String::from("1")];
        assert_eq!(value.traverse(&path), Some(Value::from("y")));
        let missing = vec![String::from("absent")];
        assert_eq!(value.traverse(&missing), None);
    }

    #[test]
    fn test_traverse_unknown_stays_unknown() {
        let path = vec![String::from("anything")];
        assert_eq!(Value::Unknown.traverse(&path), Some(Value::Unknown));
    }

    #[test]
    fn test_number_display_drops_integer_fraction() {
        assert_eq!(Value::from(3_i64).to_string(), "3");
        assert_eq!(Value::from(2.5_f64).to_string(), "2.5");
    }
}
