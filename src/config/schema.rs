//! Attribute and block schemas used to evaluate configuration bodies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::diag::{Diagnostic, Diagnostics};
use crate::lang::Value;

/// The expected type of a single attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttrType {
    /// A string.
    String,
    /// A number.
    Number,
    /// A boolean.
    Bool,
    /// A list of any element type.
    List,
    /// A string-keyed map.
    Map,
    /// Any type; no checking performed.
    Any,
}

impl AttrType {
    /// Returns true if the given value conforms to this type. Unknown and
    /// null values conform to every type.
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        if value.is_unknown() || value.is_null() {
            return true;
        }
        match self {
            Self::String => matches!(value, Value::String(_)),
            Self::Number => matches!(value, Value::Number(_)),
            Self::Bool => matches!(value, Value::Bool(_)),
            Self::List => matches!(value, Value::List(_)),
            Self::Map => matches!(value, Value::Map(_)),
            Self::Any => true,
        }
    }
}

/// Schema for a single attribute within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrSchema {
    /// Expected type.
    pub attr_type: AttrType,
    /// Must be set in configuration.
    pub required: bool,
    /// May be set in configuration.
    pub optional: bool,
    /// Assigned by the provider; unknown during planning unless already
    /// recorded in state.
    pub computed: bool,
    /// A change to this attribute requires replacing the instance.
    pub force_new: bool,
}

impl AttrSchema {
    /// A required configuration attribute.
    #[must_use]
    pub const fn required(attr_type: AttrType) -> Self {
        Self {
            attr_type,
            required: true,
            optional: false,
            computed: false,
            force_new: false,
        }
    }

    /// An optional configuration attribute.
    #[must_use]
    pub const fn optional(attr_type: AttrType) -> Self {
        Self {
            attr_type,
            required: false,
            optional: true,
            computed: false,
            force_new: false,
        }
    }

    /// A provider-computed attribute.
    #[must_use]
    pub const fn computed(attr_type: AttrType) -> Self {
        Self {
            attr_type,
            required: false,
            optional: false,
            computed: true,
            force_new: false,
        }
    }

    /// Marks changes to this attribute as requiring replacement.
    #[must_use]
    pub const fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }
}

/// Schema for a configuration block: the set of attributes it accepts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockSchema {
    /// Attribute name → schema.
    pub attributes: BTreeMap<String, AttrSchema>,
}

impl BlockSchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute to the schema.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, schema: AttrSchema) -> Self {
        self.attributes.insert(name.into(), schema);
        self
    }

    /// Shapes a set of evaluated attribute values into an object value
    /// conforming to this schema.
    ///
    /// Missing required attributes and type mismatches are reported as
    /// error diagnostics; attributes not named by the schema are reported
    /// as errors too. Missing computed attributes become `Unknown`,
    /// missing optional attributes become `Null`.
    #[must_use]
    pub fn conform(&self, mut given: BTreeMap<String, Value>) -> (Value, Diagnostics) {
        let mut diags = Diagnostics::new();
        let mut out = BTreeMap::new();

        for (name, attr) in &self.attributes {
            match given.remove(name) {
                Some(value) => {
                    if !attr.attr_type.accepts(&value) {
                        diags.push(Diagnostic::error(format!(
                            "attribute {name:?} has the wrong type: got {}",
                            value.type_name()
                        )));
                    }
                    if attr.computed && !attr.optional && !attr.required {
                        diags.push(Diagnostic::error(format!(
                            "attribute {name:?} is read-only and cannot be set"
                        )));
                    }
                    out.insert(name.clone(), value);
                }
                None if attr.required => {
                    diags.push(Diagnostic::error(format!(
                        "required attribute {name:?} is not set"
                    )));
                    out.insert(name.clone(), Value::Null);
                }
                None if attr.computed => {
                    out.insert(name.clone(), Value::Unknown);
                }
                None => {
                    out.insert(name.clone(), Value::Null);
                }
            }
        }

        for name in given.keys() {
            diags.push(Diagnostic::error(format!(
                "unsupported attribute {name:?}"
            )));
        }

        (Value::Map(out), diags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> BlockSchema {
        BlockSchema::new()
            .with_attr("name", AttrSchema::required(AttrType::String))
            .with_attr("size", AttrSchema::optional(AttrType::Number).force_new())
            .with_attr("id", AttrSchema::computed(AttrType::String))
    }

    #[test]
    fn test_conform_fills_gaps() {
        let given = BTreeMap::from([(String::from("name"), Value::from("web"))]);
        let (value, diags) = schema().conform(given);
        assert!(!diags.has_errors(), "{diags}");
        let map = value.as_map().expect("map");
        assert_eq!(map.get("size"), Some(&Value::Null));
        assert_eq!(map.get("id"), Some(&Value::Unknown));
    }

    #[test]
    fn test_conform_reports_missing_required() {
        let (_, diags) = schema().conform(BTreeMap::new());
        assert!(diags.has_errors());
        assert!(diags.to_string().contains("name"));
    }

    #[test]
    fn test_conform_rejects_unsupported_and_mistyped() {
        let given = BTreeMap::from([
            (String::from("name"), Value::from(true)),
            (String::from("bogus"), Value::from("x")),
        ]);
        let (_, diags) = schema().conform(given);
        let rendered = diags.to_string();
        assert!(rendered.contains("wrong type"));
        assert!(rendered.contains("bogus"));
    }

    #[test]
    fn test_conform_rejects_setting_read_only() {
        let given = BTreeMap::from([
            (String::from("name"), Value::from("web")),
            (String::from("id"), Value::from("i-123")),
        ]);
        let (_, diags) = schema().conform(given);
        assert!(diags.to_string().contains("read-only"));
    }
}
