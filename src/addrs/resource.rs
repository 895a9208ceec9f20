//! Resource addressing.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkeinError};

use super::module::{InstanceKey, ModulePath};

/// Whether a resource is managed (created and destroyed by the engine) or a
/// read-only data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceMode {
    /// A resource whose lifecycle the engine owns.
    Managed,
    /// A read-only data source.
    Data,
}

/// A resource address relative to its containing module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    /// Managed or data.
    pub mode: ResourceMode,
    /// Resource type name, e.g. `p_thing`.
    pub type_name: String,
    /// Configuration-local name.
    pub name: String,
}

impl Resource {
    /// Creates a managed resource address.
    #[must_use]
    pub fn managed(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: ResourceMode::Managed,
            type_name: type_name.into(),
            name: name.into(),
        }
    }

    /// Creates a data source address.
    #[must_use]
    pub fn data(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: ResourceMode::Data,
            type_name: type_name.into(),
            name: name.into(),
        }
    }

    /// Returns the absolute address of this resource in the given module.
    #[must_use]
    pub fn absolute(&self, module: ModulePath) -> AbsResource {
        AbsResource {
            module,
            resource: self.clone(),
            key: None,
        }
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mode {
            ResourceMode::Managed => write!(f, "{}.{}", self.type_name, self.name),
            ResourceMode::Data => write!(f, "data.{}.{}", self.type_name, self.name),
        }
    }
}

/// The absolute address of a resource: a module instance plus a resource,
/// with an optional instance key for multi-instance resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbsResource {
    /// Containing module instance.
    pub module: ModulePath,
    /// Module-relative resource address.
    pub resource: Resource,
    /// Instance key, for `count` expansions.
    pub key: Option<InstanceKey>,
}

impl AbsResource {
    /// Returns a copy of this address with the given instance key.
    #[must_use]
    pub fn with_key(&self, key: InstanceKey) -> Self {
        Self {
            module: self.module.clone(),
            resource: self.resource.clone(),
            key: Some(key),
        }
    }

    /// Returns a copy of this address without any instance key.
    #[must_use]
    pub fn base(&self) -> Self {
        Self {
            module: self.module.clone(),
            resource: self.resource.clone(),
            key: None,
        }
    }

    /// The module-relative portion of the canonical form, e.g.
    /// `p_thing.a[0]` or `data.p_info.x`. Used as the resource key within a
    /// module state.
    #[must_use]
    pub fn local_string(&self) -> String {
        match &self.key {
            Some(key) => format!("{}{key}", self.resource),
            None => self.resource.to_string(),
        }
    }

    /// Parses a canonical absolute resource address such as
    /// `module.m.p_thing.a[0]` or `data.p_info.x`.
    pub fn parse(s: &str) -> Result<Self> {
        let (module, rest) = split_module_prefix(s)?;
        let mut tokens: Vec<&str> = rest.split('.').collect();
        let mode = if tokens.first() == Some(&"data") {
            tokens.remove(0);
            ResourceMode::Data
        } else {
            ResourceMode::Managed
        };
        if tokens.len() != 2 {
            return Err(SkeinError::config(format!(
                "invalid resource address {s:?}: expected type and name"
            )));
        }
        let type_name = tokens[0].to_string();
        let (name, key) = split_instance_key(tokens[1], s)?;
        Ok(Self {
            module,
            resource: Resource {
                mode,
                type_name,
                name,
            },
            key,
        })
    }
}

impl std::fmt::Display for AbsResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.module.is_root() {
            write!(f, "{}.", self.module)?;
        }
        write!(f, "{}", self.resource)?;
        if let Some(key) = &self.key {
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

/// A user-supplied targeting address: either a whole module instance or a
/// single resource (optionally instance-keyed).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAddr {
    /// Module instance the target lives in (or names, for module targets).
    pub module: ModulePath,
    /// Resource within the module; `None` targets the whole module.
    pub resource: Option<Resource>,
    /// Instance key, when a single instance is targeted.
    pub key: Option<InstanceKey>,
}

impl TargetAddr {
    /// Parses a target address: `module.m`, `p_thing.a`,
    /// `module.m.p_thing.a[0]`, `data.p_info.x`, …
    pub fn parse(s: &str) -> Result<Self> {
        let (module, rest) = split_module_prefix(s)?;
        if rest.is_empty() {
            return Ok(Self {
                module,
                resource: None,
                key: None,
            });
        }
        let abs = AbsResource::parse(s)?;
        Ok(Self {
            module: abs.module,
            resource: Some(abs.resource),
            key: abs.key,
        })
    }

    /// Returns true if the given resource address falls under this target.
    #[must_use]
    pub fn matches(&self, addr: &AbsResource) -> bool {
        // A module target covers the module itself and everything below it.
        let target_steps = self.module.steps();
        let addr_steps = addr.module.steps();
        if self.resource.is_none() {
            return addr_steps.len() >= target_steps.len()
                && addr_steps[..target_steps.len()] == *target_steps;
        }
        if self.module != addr.module {
            return false;
        }
        let Some(resource) = &self.resource else {
            return false;
        };
        if *resource != addr.resource {
            return false;
        }
        match &self.key {
            None => true,
            Some(key) => addr.key.as_ref() == Some(key),
        }
    }
}

impl std::fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.resource {
            None => write!(f, "{}", self.module),
            Some(resource) => {
                if !self.module.is_root() {
                    write!(f, "{}.", self.module)?;
                }
                write!(f, "{resource}")?;
                if let Some(key) = &self.key {
                    write!(f, "{key}")?;
                }
                Ok(())
            }
        }
    }
}

/// Splits a leading `module.x.module.y` prefix off a dotted address,
/// returning the module path and the remainder.
fn split_module_prefix(s: &str) -> Result<(ModulePath, &str)> {
    let mut rest = s;
    let mut module = ModulePath::root();
    while let Some(after) = rest.strip_prefix("module.") {
        let step_end = after.find('.').unwrap_or(after.len());
        let step = &after[..step_end];
        let mut path_str = String::from("module.");
        path_str.push_str(step);
        let parsed = ModulePath::parse(&path_str)?;
        let step = parsed.steps()[0].clone();
        module = module.child(step.name, step.key);
        rest = if step_end == after.len() {
            ""
        } else {
            &after[step_end + 1..]
        };
    }
    Ok((module, rest))
}

/// Splits a trailing `[key]` off a name token.
fn split_instance_key(token: &str, whole: &str) -> Result<(String, Option<InstanceKey>)> {
    let Some(open) = token.find('[') else {
        return Ok((token.to_string(), None));
    };
    let name = token[..open].to_string();
    let raw = token[open + 1..].trim_end_matches(']');
    if let Some(quoted) = raw.strip_prefix('"') {
        return Ok((
            name,
            Some(InstanceKey::Key(quoted.trim_end_matches('"').to_string())),
        ));
    }
    let index = raw.parse::<u64>().map_err(|_| {
        SkeinError::config(format!(
            "invalid resource address {whole:?}: bad instance key {raw:?}"
        ))
    })?;
    Ok((name, Some(InstanceKey::Index(index))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_forms() {
        let root = Resource::managed("p_thing", "a").absolute(ModulePath::root());
        assert_eq!(root.to_string(), "p_thing.a");

        let nested = Resource::data("p_info", "x")
            .absolute(ModulePath::root().child("m", None))
            .with_key(InstanceKey::Index(1));
        assert_eq!(nested.to_string(), "module.m.data.p_info.x[1]");
        assert_eq!(nested.local_string(), "data.p_info.x[1]");
    }

    #[test]
    fn test_parse_round_trip() {
        for s in [
            "p_thing.a",
            "p_thing.a[0]",
            "data.p_info.x",
            "module.m.p_thing.a",
            "module.m.module.n.data.p_info.x[2]",
        ] {
            let parsed = AbsResource::parse(s).expect("parse");
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn test_target_matches_module_subtree() {
        let target = TargetAddr::parse("module.m").expect("parse");
        let inside = AbsResource::parse("module.m.p_thing.a").expect("parse");
        let deeper = AbsResource::parse("module.m.module.n.p_thing.b").expect("parse");
        let outside = AbsResource::parse("p_thing.a").expect("parse");
        assert!(target.matches(&inside));
        assert!(target.matches(&deeper));
        assert!(!target.matches(&outside));
    }

    #[test]
    fn test_target_matches_resource_and_instance() {
        let base = TargetAddr::parse("p_thing.a").expect("parse");
        let keyed = TargetAddr::parse("p_thing.a[1]").expect("parse");
        let instance0 = AbsResource::parse("p_thing.a[0]").expect("parse");
        let instance1 = AbsResource::parse("p_thing.a[1]").expect("parse");
        assert!(base.matches(&instance0));
        assert!(base.matches(&instance1));
        assert!(!keyed.matches(&instance0));
        assert!(keyed.matches(&instance1));
    }
}
