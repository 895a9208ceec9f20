//! The computed plan: per-instance change intent and attribute changes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::addrs::ModulePath;
use crate::config::BlockSchema;
use crate::lang::UNKNOWN_FLAT_VALUE;

use super::tree::InstanceState;

/// The kind of change planned for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// No change required.
    None,
    /// Create a new instance.
    Create,
    /// Update the existing instance in place.
    Update,
    /// Destroy the existing instance and create a new one.
    Replace,
    /// Destroy the existing instance.
    Destroy,
    /// Read a data source.
    Read,
}

/// A planned change to one attribute, in the flat representation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrDiff {
    /// Previously recorded value, empty if the attribute is new.
    pub old: String,
    /// Planned value, empty when not yet computable.
    pub new: String,
    /// The new value will be known only after apply.
    pub new_computed: bool,
    /// This change can only be achieved by replacing the instance.
    pub requires_new: bool,
}

/// The planned change for one resource instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceDiff {
    /// Change intent.
    pub change: ChangeKind,
    /// Per-attribute change records, keyed by flat attribute name.
    pub attributes: BTreeMap<String, AttrDiff>,
    /// When destroying a deposed instance rather than the primary, the
    /// deposed key to destroy.
    pub destroy_deposed: Option<String>,
    /// The replacement creates the new instance before destroying the
    /// old one.
    pub create_before_destroy: bool,
}

impl InstanceDiff {
    /// A diff that destroys the primary instance.
    #[must_use]
    pub const fn destroy() -> Self {
        Self {
            change: ChangeKind::Destroy,
            attributes: BTreeMap::new(),
            destroy_deposed: None,
            create_before_destroy: false,
        }
    }

    /// Returns true if the diff carries no work.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self.change, ChangeKind::None)
    }

    /// Returns true if this diff destroys an instance (alone or as part
    /// of a replacement).
    #[must_use]
    pub const fn is_destroy(&self) -> bool {
        matches!(self.change, ChangeKind::Destroy | ChangeKind::Replace)
    }
}

/// All planned changes within one module instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDiff {
    /// Module instance address.
    pub path: ModulePath,
    /// Instance diffs keyed by module-local resource address (including
    /// any instance key).
    pub resources: BTreeMap<String, InstanceDiff>,
}

impl ModuleDiff {
    /// Creates an empty module diff.
    #[must_use]
    pub fn new(path: ModulePath) -> Self {
        Self {
            path,
            resources: BTreeMap::new(),
        }
    }
}

/// The complete plan across all modules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diff {
    /// Module diffs, ordered root-first by path.
    pub modules: Vec<ModuleDiff>,
}

impl Diff {
    /// Creates an empty diff.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no module plans any actionable change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules
            .iter()
            .all(|m| m.resources.values().all(InstanceDiff::is_empty))
    }

    /// Looks up the diff for a module instance.
    #[must_use]
    pub fn module(&self, path: &ModulePath) -> Option<&ModuleDiff> {
        let key = path.to_string();
        self.modules.iter().find(|m| m.path.to_string() == key)
    }

    /// Returns the diff for a module instance, creating it if absent.
    pub fn module_mut(&mut self, path: &ModulePath) -> &mut ModuleDiff {
        let key = path.to_string();
        if let Some(idx) = self
            .modules
            .iter()
            .position(|m| m.path.to_string() == key)
        {
            return &mut self.modules[idx];
        }
        self.modules.push(ModuleDiff::new(path.clone()));
        self.modules
            .sort_by_key(|m| (m.path.depth(), m.path.to_string()));
        let idx = self
            .modules
            .iter()
            .position(|m| m.path.to_string() == key)
            .unwrap_or(0);
        &mut self.modules[idx]
    }

    /// Total number of actionable instance changes.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.modules
            .iter()
            .map(|m| m.resources.values().filter(|d| !d.is_empty()).count())
            .sum()
    }
}

/// Computes the instance diff between a prior instance and the planned
/// flat attributes, consulting the schema for replacement-forcing
/// attributes.
///
/// Attributes whose planned value is the unknown marker are recorded as
/// computed. A tainted prior instance always plans as a replacement.
#[must_use]
pub fn compute_instance_diff(
    prior: Option<&InstanceState>,
    planned: &BTreeMap<String, String>,
    schema: &BlockSchema,
    create_before_destroy: bool,
) -> InstanceDiff {
    let empty = BTreeMap::new();
    let old_attrs = prior.map_or(&empty, |p| &p.attributes);

    let mut attributes = BTreeMap::new();
    let mut requires_new = false;

    for (name, new_value) in planned {
        let old_value = old_attrs.get(name).cloned().unwrap_or_default();
        let new_computed = new_value == UNKNOWN_FLAT_VALUE;
        // A computed attribute is only a change when nothing was recorded;
        // a known prior value satisfies it.
        if new_computed && !old_value.is_empty() {
            continue;
        }
        if !new_computed && old_value == *new_value {
            continue;
        }
        let force = prior.is_some() && attr_forces_new(schema, name);
        requires_new = requires_new || force;
        attributes.insert(
            name.clone(),
            AttrDiff {
                old: old_value,
                new: if new_computed {
                    String::new()
                } else {
                    new_value.clone()
                },
                new_computed,
                requires_new: force,
            },
        );
    }

    // Attributes that disappear from the configuration are changes too.
    for (name, old_value) in old_attrs {
        if name == "id" || planned.contains_key(name) {
            continue;
        }
        let force = attr_forces_new(schema, name);
        requires_new = requires_new || force;
        attributes.insert(
            name.clone(),
            AttrDiff {
                old: old_value.clone(),
                new: String::new(),
                new_computed: false,
                requires_new: force,
            },
        );
    }

    let tainted = prior.is_some_and(|p| p.tainted);
    let change = match prior {
        None => ChangeKind::Create,
        Some(_) if tainted => ChangeKind::Replace,
        Some(_) if attributes.is_empty() => ChangeKind::None,
        Some(_) if requires_new => ChangeKind::Replace,
        Some(_) => ChangeKind::Update,
    };

    InstanceDiff {
        change,
        attributes,
        destroy_deposed: None,
        create_before_destroy,
    }
}

/// Whether a flat attribute name falls under a schema attribute marked as
/// replacement-forcing. Flat keys address into collections with dotted
/// suffixes, so only the root segment is consulted.
fn attr_forces_new(schema: &BlockSchema, flat_name: &str) -> bool {
    let root = flat_name.split('.').next().unwrap_or(flat_name);
    schema
        .attributes
        .get(root)
        .is_some_and(|attr| attr.force_new)
}
