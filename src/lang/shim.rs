//! Legacy flat attribute-map adapter.
//!
//! Instance state and the older provider protocol both represent values as
//! a flat map of string attributes, with `#` and `%` entries recording
//! list and map lengths. This module is the single place that converts
//! between that representation and the typed [`Value`] model. It will go
//! away when the schema-guided codec replaces the flat representation.

use std::collections::BTreeMap;

use super::value::Value;

/// The flat-map stand-in for a value that is not known until apply.
pub const UNKNOWN_FLAT_VALUE: &str = "<computed>";

/// Flattens a typed value into the legacy flat attribute map.
///
/// Null attributes are omitted entirely. Unknown attributes are written as
/// [`UNKNOWN_FLAT_VALUE`].
#[must_use]
pub fn flatten_value(value: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    match value {
        Value::Map(entries) => {
            for (name, inner) in entries {
                flatten_into(name, inner, &mut out);
            }
        }
        other => flatten_into("value", other, &mut out),
    }
    out
}

fn flatten_into(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Null => {}
        Value::Unknown => {
            out.insert(prefix.to_string(), String::from(UNKNOWN_FLAT_VALUE));
        }
        Value::Bool(_) | Value::Number(_) | Value::String(_) => {
            out.insert(prefix.to_string(), value.to_string());
        }
        Value::List(items) => {
            out.insert(format!("{prefix}.#"), items.len().to_string());
            for (i, item) in items.iter().enumerate() {
                flatten_into(&format!("{prefix}.{i}"), item, out);
            }
        }
        Value::Map(entries) => {
            out.insert(format!("{prefix}.%"), entries.len().to_string());
            for (name, inner) in entries {
                flatten_into(&format!("{prefix}.{name}"), inner, out);
            }
        }
    }
}

/// Rebuilds a typed object value from a legacy flat attribute map.
///
/// Scalar values come back as strings (the flat form does not preserve
/// their original types); unknown markers come back as `Unknown`.
#[must_use]
pub fn unflatten_attrs(attrs: &BTreeMap<String, String>) -> Value {
    let mut root = Node::default();
    for (key, value) in attrs {
        let segments: Vec<&str> = key.split('.').collect();
        root.insert(&segments, value);
    }
    root.into_value()
}

/// Intermediate tree used while reassembling the nested structure.
#[derive(Default)]
struct Node {
    leaf: Option<String>,
    children: BTreeMap<String, Node>,
    is_list: bool,
}

impl Node {
    fn insert(&mut self, segments: &[&str], value: &str) {
        match segments {
            [] => self.leaf = Some(value.to_string()),
            ["#"] => self.is_list = true,
            // Map length markers carry no structure of their own; plain
            // and `%`-marked maps reassemble the same way.
            ["%"] => {}
            [head, rest @ ..] => {
                self.children.entry((*head).to_string()).or_default().insert(rest, value);
            }
        }
    }

    fn into_value(self) -> Value {
        if let Some(leaf) = self.leaf {
            if leaf == UNKNOWN_FLAT_VALUE {
                return Value::Unknown;
            }
            return Value::String(leaf);
        }
        if self.is_list {
            let mut indexed: Vec<(usize, Node)> = self
                .children
                .into_iter()
                .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v)))
                .collect();
            indexed.sort_by_key(|(i, _)| *i);
            return Value::List(indexed.into_iter().map(|(_, n)| n.into_value()).collect());
        }
        Value::Map(
            self.children
                .into_iter()
                .map(|(k, v)| (k, v.into_value()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        Value::Map(BTreeMap::from([
            (String::from("name"), Value::from("web")),
            (String::from("count"), Value::from(2_i64)),
            (
                String::from("ports"),
                Value::List(vec![Value::from("80"), Value::from("443")]),
            ),
            (
                String::from("tags"),
                Value::Map(BTreeMap::from([(String::from("env"), Value::from("prod"))])),
            ),
            (String::from("id"), Value::Unknown),
            (String::from("absent"), Value::Null),
        ]))
    }

    #[test]
    fn test_flatten_shapes() {
        let flat = flatten_value(&sample());
        assert_eq!(flat.get("name").map(String::as_str), Some("web"));
        assert_eq!(flat.get("count").map(String::as_str), Some("2"));
        assert_eq!(flat.get("ports.#").map(String::as_str), Some("2"));
        assert_eq!(flat.get("ports.1").map(String::as_str), Some("443"));
        assert_eq!(flat.get("tags.%").map(String::as_str), Some("1"));
        assert_eq!(flat.get("tags.env").map(String::as_str), Some("prod"));
        assert_eq!(flat.get("id").map(String::as_str), Some(UNKNOWN_FLAT_VALUE));
        assert!(!flat.contains_key("absent"));
    }

    #[test]
    fn test_unflatten_rebuilds_structure() {
        let flat = flatten_value(&sample());
        let rebuilt = unflatten_attrs(&flat);
        let map = rebuilt.as_map().expect("map");
        assert_eq!(map.get("name"), Some(&Value::from("web")));
        assert_eq!(map.get("id"), Some(&Value::Unknown));
        match map.get("ports") {
            Some(Value::List(items)) => assert_eq!(items.len(), 2),
            other => panic!("ports did not rebuild as a list: {other:?}"),
        }
        match map.get("tags") {
            Some(Value::Map(tags)) => {
                assert_eq!(tags.get("env"), Some(&Value::from("prod")));
            }
            other => panic!("tags did not rebuild as a map: {other:?}"),
        }
    }

    #[test]
    fn test_flatten_is_stable_for_equal_values() {
        assert_eq!(flatten_value(&sample()), flatten_value(&sample()));
    }
}
