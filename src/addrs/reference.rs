//! References between configuration objects.
//!
//! A reference names another object in the same module scope plus an
//! optional attribute path into its value. The module-relative key form
//! (without instance key or attribute path) is what the reference
//! transformer uses to connect graph edges.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkeinError};

use super::module::InstanceKey;
use super::resource::{Resource, ResourceMode};

/// An object that can be the subject of a reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Referenceable {
    /// An input variable of the current module: `var.name`.
    InputVariable {
        /// Variable name.
        name: String,
    },
    /// A local value of the current module: `local.name`.
    LocalValue {
        /// Local value name.
        name: String,
    },
    /// A resource in the current module, optionally instance-keyed.
    Resource {
        /// Module-relative resource address.
        resource: Resource,
        /// Instance key, when a specific instance is referenced.
        key: Option<InstanceKey>,
    },
    /// An output of a child module call: `module.call.name`.
    ModuleCallOutput {
        /// Child module call name.
        call: String,
        /// Output name within the child module.
        name: String,
    },
    /// Filesystem path information: `path.module`, `path.root`.
    PathAttr {
        /// Attribute name under `path.`.
        name: String,
    },
    /// Engine metadata: `skein.workspace`.
    EngineMeta {
        /// Attribute name under `skein.`.
        name: String,
    },
    /// The count iterator: `count.index`.
    CountAttr {
        /// Attribute name under `count.`.
        name: String,
    },
    /// The keyed iterator: `each.key`, `each.value`.
    EachAttr {
        /// Attribute name under `each.`.
        name: String,
    },
}

impl Referenceable {
    /// The key the reference transformer uses to connect edges: the
    /// canonical form with any instance key stripped, since a single graph
    /// vertex stands for every instance of a resource.
    #[must_use]
    pub fn map_key(&self) -> String {
        match self {
            Self::Resource { resource, .. } => resource.to_string(),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for Referenceable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InputVariable { name } => write!(f, "var.{name}"),
            Self::LocalValue { name } => write!(f, "local.{name}"),
            Self::Resource { resource, key } => {
                write!(f, "{resource}")?;
                if let Some(key) = key {
                    write!(f, "{key}")?;
                }
                Ok(())
            }
            Self::ModuleCallOutput { call, name } => write!(f, "module.{call}.{name}"),
            Self::PathAttr { name } => write!(f, "path.{name}"),
            Self::EngineMeta { name } => write!(f, "skein.{name}"),
            Self::CountAttr { name } => write!(f, "count.{name}"),
            Self::EachAttr { name } => write!(f, "each.{name}"),
        }
    }
}

/// A reference to another object plus an attribute path into its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// The referenced object.
    pub subject: Referenceable,
    /// Remaining attribute path into the subject's value.
    pub attr_path: Vec<String>,
}

impl Reference {
    /// Creates a reference with no attribute path.
    #[must_use]
    pub const fn new(subject: Referenceable) -> Self {
        Self {
            subject,
            attr_path: Vec::new(),
        }
    }

    /// Parses a dotted reference string. Examples:
    ///
    /// * `var.region`
    /// * `local.tags`
    /// * `p_thing.a.id`
    /// * `p_thing.a[0].id`
    /// * `data.p_info.x.value`
    /// * `module.m.endpoint`
    /// * `count.index`, `each.key`, `path.module`, `skein.workspace`
    pub fn parse(s: &str) -> Result<Self> {
        let tokens: Vec<&str> = s.split('.').collect();
        if tokens.len() < 2 {
            return Err(SkeinError::config(format!(
                "invalid reference {s:?}: expected at least two components"
            )));
        }
        let attr_path = |from: usize| tokens[from..].iter().map(|t| (*t).to_string()).collect();
        let reference = match tokens[0] {
            "var" => Self {
                subject: Referenceable::InputVariable {
                    name: tokens[1].to_string(),
                },
                attr_path: attr_path(2),
            },
            "local" => Self {
                subject: Referenceable::LocalValue {
                    name: tokens[1].to_string(),
                },
                attr_path: attr_path(2),
            },
            "path" => Self {
                subject: Referenceable::PathAttr {
                    name: tokens[1].to_string(),
                },
                attr_path: attr_path(2),
            },
            "skein" => Self {
                subject: Referenceable::EngineMeta {
                    name: tokens[1].to_string(),
                },
                attr_path: attr_path(2),
            },
            "count" => Self {
                subject: Referenceable::CountAttr {
                    name: tokens[1].to_string(),
                },
                attr_path: attr_path(2),
            },
            "each" => Self {
                subject: Referenceable::EachAttr {
                    name: tokens[1].to_string(),
                },
                attr_path: attr_path(2),
            },
            "module" => {
                if tokens.len() < 3 {
                    return Err(SkeinError::config(format!(
                        "invalid reference {s:?}: module output references need a call and an output name"
                    )));
                }
                Self {
                    subject: Referenceable::ModuleCallOutput {
                        call: tokens[1].to_string(),
                        name: tokens[2].to_string(),
                    },
                    attr_path: attr_path(3),
                }
            }
            "data" => {
                if tokens.len() < 3 {
                    return Err(SkeinError::config(format!(
                        "invalid reference {s:?}: data references need a type and a name"
                    )));
                }
                let (name, key) = split_key(tokens[2]);
                Self {
                    subject: Referenceable::Resource {
                        resource: Resource {
                            mode: ResourceMode::Data,
                            type_name: tokens[1].to_string(),
                            name,
                        },
                        key,
                    },
                    attr_path: attr_path(3),
                }
            }
            type_name => {
                let (name, key) = split_key(tokens[1]);
                Self {
                    subject: Referenceable::Resource {
                        resource: Resource {
                            mode: ResourceMode::Managed,
                            type_name: type_name.to_string(),
                            name,
                        },
                        key,
                    },
                    attr_path: attr_path(2),
                }
            }
        };
        Ok(reference)
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.subject)?;
        for attr in &self.attr_path {
            write!(f, ".{attr}")?;
        }
        Ok(())
    }
}

/// Splits a trailing `[n]` index off a name token, ignoring malformed keys
/// (they parse as part of the name and fail resolution later).
fn split_key(token: &str) -> (String, Option<InstanceKey>) {
    let Some(open) = token.find('[') else {
        return (token.to_string(), None);
    };
    let raw = token[open + 1..].trim_end_matches(']');
    if let Ok(index) = raw.parse::<u64>() {
        return (token[..open].to_string(), Some(InstanceKey::Index(index)));
    }
    if let Some(quoted) = raw.strip_prefix('"') {
        return (
            token[..open].to_string(),
            Some(InstanceKey::Key(quoted.trim_end_matches('"').to_string())),
        );
    }
    (token.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_variable_and_local() {
        let r = Reference::parse("var.region").expect("parse");
        assert_eq!(r.subject.map_key(), "var.region");
        assert!(r.attr_path.is_empty());

        let r = Reference::parse("local.tags.env").expect("parse");
        assert_eq!(r.subject.map_key(), "local.tags");
        assert_eq!(r.attr_path, vec!["env"]);
    }

    #[test]
    fn test_parse_resource_strips_key_for_map() {
        let r = Reference::parse("p_thing.a[0].id").expect("parse");
        assert_eq!(r.subject.map_key(), "p_thing.a");
        assert_eq!(r.attr_path, vec!["id"]);
        match &r.subject {
            Referenceable::Resource { key, .. } => {
                assert_eq!(*key, Some(InstanceKey::Index(0)));
            }
            other => panic!("unexpected subject: {other:?}"),
        }
    }

    #[test]
    fn test_parse_data_and_module_output() {
        let r = Reference::parse("data.p_info.x.value").expect("parse");
        assert_eq!(r.subject.map_key(), "data.p_info.x");

        let r = Reference::parse("module.m.endpoint").expect("parse");
        assert_eq!(r.subject.map_key(), "module.m.endpoint");
    }

    #[test]
    fn test_display_round_trip() {
        for s in [
            "var.region",
            "local.tags.env",
            "p_thing.a.id",
            "data.p_info.x.value",
            "module.m.endpoint",
            "count.index",
            "skein.workspace",
        ] {
            let parsed = Reference::parse(s).expect("parse");
            assert_eq!(parsed.to_string(), s);
        }
    }
}
