//! Module instance addressing.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkeinError};

/// Key distinguishing one instance of a multi-instance object from another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InstanceKey {
    /// Instance produced by a `count` expansion.
    Index(u64),
    /// Instance produced by a keyed expansion.
    Key(String),
}

impl std::fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(i) => write!(f, "[{i}]"),
            Self::Key(k) => write!(f, "[\"{k}\"]"),
        }
    }
}

/// One step in a module instance path: the call name plus an optional
/// instance key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleStep {
    /// Name of the module call.
    pub name: String,
    /// Instance key, for multi-instance module calls.
    pub key: Option<InstanceKey>,
}

impl ModuleStep {
    /// Creates an unkeyed step.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
        }
    }
}

impl std::fmt::Display for ModuleStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "module.{}", self.name)?;
        if let Some(key) = &self.key {
            write!(f, "{key}")?;
        }
        Ok(())
    }
}

/// The address of a module instance: an ordered sequence of steps from the
/// root. The root module is the empty sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModulePath(Vec<ModuleStep>);

impl ModulePath {
    /// The root module address.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Returns true if this is the root module.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of steps below the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// The steps making up this path.
    #[must_use]
    pub fn steps(&self) -> &[ModuleStep] {
        &self.0
    }

    /// Returns the address of a direct child module instance.
    #[must_use]
    pub fn child(&self, name: impl Into<String>, key: Option<InstanceKey>) -> Self {
        let mut steps = self.0.clone();
        steps.push(ModuleStep {
            name: name.into(),
            key,
        });
        Self(steps)
    }

    /// Returns the parent module address, or `None` at the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// The final step of the path, or `None` at the root.
    #[must_use]
    pub fn last_step(&self) -> Option<&ModuleStep> {
        self.0.last()
    }

    /// Parses a canonical module path such as `module.m.module.n[0]`.
    /// The empty string parses as the root module.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        let mut steps = Vec::new();
        let mut tokens = s.split('.').peekable();
        while let Some(token) = tokens.next() {
            if token != "module" {
                return Err(SkeinError::config(format!(
                    "invalid module path {s:?}: expected \"module\", found {token:?}"
                )));
            }
            let step = tokens.next().ok_or_else(|| {
                SkeinError::config(format!("invalid module path {s:?}: missing module name"))
            })?;
            steps.push(parse_step(step, s)?);
        }
        Ok(Self(steps))
    }
}

/// Parses a single `name` or `name[key]` token into a step.
fn parse_step(token: &str, whole: &str) -> Result<ModuleStep> {
    let Some(open) = token.find('[') else {
        return Ok(ModuleStep::new(token));
    };
    let name = &token[..open];
    let rest = &token[open + 1..];
    let Some(close) = rest.find(']') else {
        return Err(SkeinError::config(format!(
            "invalid module path {whole:?}: unterminated instance key"
        )));
    };
    let raw_key = &rest[..close];
    let key = if let Some(quoted) = raw_key.strip_prefix('"') {
        InstanceKey::Key(quoted.trim_end_matches('"').to_string())
    } else {
        let index = raw_key.parse::<u64>().map_err(|_| {
            SkeinError::config(format!(
                "invalid module path {whole:?}: instance key {raw_key:?} is not an index"
            ))
        })?;
        InstanceKey::Index(index)
    };
    Ok(ModuleStep {
        name: name.to_string(),
        key: Some(key),
    })
}

impl std::fmt::Display for ModulePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{step}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_display_is_empty() {
        assert_eq!(ModulePath::root().to_string(), "");
        assert!(ModulePath::root().is_root());
    }

    #[test]
    fn test_child_and_parent() {
        let m = ModulePath::root().child("m", None);
        let n = m.child("n", Some(InstanceKey::Index(2)));
        assert_eq!(n.to_string(), "module.m.module.n[2]");
        assert_eq!(n.parent(), Some(m.clone()));
        assert_eq!(m.parent(), Some(ModulePath::root()));
        assert_eq!(ModulePath::root().parent(), None);
    }

    #[test]
    fn test_parse_round_trip() {
        for s in ["", "module.m", "module.m.module.n", "module.m[3].module.n"] {
            let parsed = ModulePath::parse(s).expect("parse");
            assert_eq!(parsed.to_string(), s);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ModulePath::parse("m").is_err());
        assert!(ModulePath::parse("module").is_err());
        assert!(ModulePath::parse("module.m[x]").is_err());
    }
}
