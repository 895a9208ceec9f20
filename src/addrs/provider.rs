//! Provider configuration addressing.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SkeinError};

use super::module::ModulePath;

/// The address of a provider configuration relative to its module: a type
/// name plus an optional alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider type name, e.g. `p`.
    pub type_name: String,
    /// If set, identifies a non-default (aliased) configuration.
    pub alias: Option<String>,
}

impl ProviderConfig {
    /// The default (un-aliased) configuration address for a provider type.
    #[must_use]
    pub fn default_for(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            alias: None,
        }
    }

    /// An aliased configuration address.
    #[must_use]
    pub fn aliased(type_name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            alias: Some(alias.into()),
        }
    }

    /// Returns the absolute address of this configuration in a module.
    #[must_use]
    pub fn absolute(&self, module: ModulePath) -> AbsProviderConfig {
        AbsProviderConfig {
            module,
            config: self.clone(),
        }
    }

    /// Parses a module-local provider reference: `p` or `p.west`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.split('.');
        let type_name = parts
            .next()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SkeinError::config(format!("invalid provider reference {s:?}")))?;
        let alias = parts.next().map(str::to_string);
        if parts.next().is_some() {
            return Err(SkeinError::config(format!(
                "invalid provider reference {s:?}: too many components"
            )));
        }
        Ok(Self {
            type_name: type_name.to_string(),
            alias,
        })
    }
}

impl std::fmt::Display for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "provider.{}.{alias}", self.type_name),
            None => write!(f, "provider.{}", self.type_name),
        }
    }
}

/// The absolute address of a provider configuration within a particular
/// module instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbsProviderConfig {
    /// Module instance the configuration lives in.
    pub module: ModulePath,
    /// Module-relative configuration address.
    pub config: ProviderConfig,
}

impl AbsProviderConfig {
    /// Returns the address this configuration might inherit from in the
    /// parent module, or `None` if inheritance is impossible.
    ///
    /// Inheritance is possible only for default (un-aliased) providers in
    /// modules other than the root module.
    #[must_use]
    pub fn inherited(&self) -> Option<Self> {
        if self.config.alias.is_some() {
            return None;
        }
        let parent = self.module.parent()?;
        Some(Self {
            module: parent,
            config: self.config.clone(),
        })
    }

    /// Parses a canonical absolute provider configuration address, e.g.
    /// `provider.p`, `provider.p.west`, `module.m.provider.p.west`.
    pub fn parse(s: &str) -> Result<Self> {
        let (module_str, provider_str) = match s.find("provider.") {
            Some(0) => ("", s),
            Some(idx) => (&s[..idx - 1], &s[idx..]),
            None => {
                return Err(SkeinError::config(format!(
                    "invalid provider configuration address {s:?}: missing \"provider.\" segment"
                )));
            }
        };
        let module = ModulePath::parse(module_str)?;
        let rest = provider_str
            .strip_prefix("provider.")
            .unwrap_or(provider_str);
        let config = ProviderConfig::parse(rest)?;
        Ok(Self { module, config })
    }
}

impl std::fmt::Display for AbsProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.module.is_root() {
            write!(f, "{}", self.config)
        } else {
            write!(f, "{}.{}", self.module, self.config)
        }
    }
}
