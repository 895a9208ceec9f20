//! The persistent record of observed resource instances.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::addrs::ModulePath;
use crate::lang::Value;

/// The complete engine state: an ordered collection of module states plus
/// versioning metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// Monotonic revision counter, bumped on every meaningful change.
    pub serial: u64,
    /// Stable identity of this state's history, assigned at creation.
    pub lineage: String,
    /// Module states, ordered root-first by path.
    pub modules: Vec<ModuleState>,
    /// When the state was last modified, if ever.
    pub updated_at: Option<DateTime<Utc>>,
}

impl State {
    /// Creates an empty state with a fresh lineage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            serial: 0,
            lineage: Uuid::new_v4().to_string(),
            modules: Vec::new(),
            updated_at: None,
        }
    }

    /// Returns true if no module holds any resource or output.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules
            .iter()
            .all(|m| m.resources.is_empty() && m.outputs.is_empty())
    }

    /// Looks up the state for a module instance.
    #[must_use]
    pub fn module(&self, path: &ModulePath) -> Option<&ModuleState> {
        let key = path.to_string();
        self.modules.iter().find(|m| m.path.to_string() == key)
    }

    /// Returns the state for a module instance, creating it if absent.
    /// Modules are kept ordered by depth then path for determinism.
    pub fn module_mut(&mut self, path: &ModulePath) -> &mut ModuleState {
        let key = path.to_string();
        if let Some(idx) = self
            .modules
            .iter()
            .position(|m| m.path.to_string() == key)
        {
            return &mut self.modules[idx];
        }
        self.modules.push(ModuleState::new(path.clone()));
        self.modules
            .sort_by_key(|m| (m.path.depth(), m.path.to_string()));
        let idx = self
            .modules
            .iter()
            .position(|m| m.path.to_string() == key)
            .unwrap_or(0);
        &mut self.modules[idx]
    }

    /// Removes module states that hold nothing, keeping the root.
    pub fn prune(&mut self) {
        self.modules.retain(|m| {
            m.path.is_root() || !m.resources.is_empty() || !m.outputs.is_empty()
        });
    }

    /// Records a modification: bumps the serial and stamps the time.
    pub fn touch(&mut self) {
        self.serial += 1;
        self.updated_at = Some(Utc::now());
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

/// The recorded state of a single module instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleState {
    /// Module instance address.
    pub path: ModulePath,
    /// Resource states, keyed by module-local resource address (including
    /// any instance key, e.g. `p_thing.a[0]`).
    pub resources: BTreeMap<String, ResourceState>,
    /// Output values last recorded for this module.
    pub outputs: BTreeMap<String, Value>,
}

impl ModuleState {
    /// Creates an empty module state.
    #[must_use]
    pub fn new(path: ModulePath) -> Self {
        Self {
            path,
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    /// Aligns the state key for a resource with whether it currently uses
    /// `count`. A resource that gained `count` moves from `r` to `r[0]`;
    /// one that lost it moves from `r[0]` back to `r`.
    pub fn normalize_count_key(&mut self, base: &str, has_count: bool) {
        let keyed = format!("{base}[0]");
        if has_count {
            if !self.resources.contains_key(&keyed)
                && let Some(existing) = self.resources.remove(base)
            {
                self.resources.insert(keyed, existing);
            }
        } else if !self.resources.contains_key(base)
            && let Some(existing) = self.resources.remove(&keyed)
        {
            self.resources.insert(base.to_string(), existing);
        }
    }
}

/// The recorded state of a single resource within a module.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceState {
    /// Canonical absolute address of the provider configuration that most
    /// recently managed this resource.
    pub provider: Option<String>,
    /// Canonical addresses of the objects this resource depended on when
    /// last applied; used for destroy ordering when configuration is gone.
    pub dependencies: Vec<String>,
    /// The current instance, if one exists.
    pub primary: Option<InstanceState>,
    /// Instances that were displaced by create-before-destroy replacement
    /// and still await destruction, keyed by an opaque generated key.
    pub deposed: BTreeMap<String, InstanceState>,
}

impl ResourceState {
    /// Moves the primary instance into the deposed set and returns its
    /// generated key, or `None` if there was no primary.
    pub fn depose_primary(&mut self) -> Option<String> {
        let instance = self.primary.take()?;
        let key = Uuid::new_v4().to_string();
        self.deposed.insert(key.clone(), instance);
        Some(key)
    }

    /// Returns true if the resource holds no instance at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.deposed.is_empty()
    }
}

/// One observed instance of a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceState {
    /// Opaque identity assigned by the provider.
    pub id: String,
    /// Flat attribute map, in the legacy representation.
    pub attributes: BTreeMap<String, String>,
    /// A tainted instance exists but failed partway through provisioning
    /// and must be replaced on the next apply.
    pub tainted: bool,
}

impl InstanceState {
    /// Creates an instance with the given id and attributes.
    #[must_use]
    pub fn new(id: impl Into<String>, attributes: BTreeMap<String, String>) -> Self {
        Self {
            id: id.into(),
            attributes,
            tainted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_mut_orders_by_depth_then_path() {
        let mut state = State::new();
        let deep = ModulePath::root().child("z", None).child("a", None);
        let shallow = ModulePath::root().child("a", None);
        state.module_mut(&deep);
        state.module_mut(&shallow);
        state.module_mut(&ModulePath::root());
        let order: Vec<String> = state.modules.iter().map(|m| m.path.to_string()).collect();
        assert_eq!(order, vec!["", "module.a", "module.z.module.a"]);
    }

    #[test]
    fn test_prune_keeps_root_and_nonempty() {
        let mut state = State::new();
        state.module_mut(&ModulePath::root());
        let m = ModulePath::root().child("m", None);
        state.module_mut(&m);
        let n = ModulePath::root().child("n", None);
        state
            .module_mut(&n)
            .resources
            .insert(String::from("p_thing.a"), ResourceState::default());
        state.prune();
        let order: Vec<String> = state.modules.iter().map(|m| m.path.to_string()).collect();
        assert_eq!(order, vec!["", "module.n"]);
    }

    #[test]
    fn test_normalize_count_key_both_directions() {
        let mut module = ModuleState::new(ModulePath::root());
        module
            .resources
            .insert(String::from("p_thing.a"), ResourceState::default());
        module.normalize_count_key("p_thing.a", true);
        assert!(module.resources.contains_key("p_thing.a[0]"));

        module.normalize_count_key("p_thing.a", false);
        assert!(module.resources.contains_key("p_thing.a"));
        assert!(!module.resources.contains_key("p_thing.a[0]"));
    }

    #[test]
    fn test_depose_primary_moves_instance() {
        let mut resource = ResourceState {
            primary: Some(InstanceState::new("i-1", BTreeMap::new())),
            ..ResourceState::default()
        };
        let key = resource.depose_primary().expect("deposed");
        assert!(resource.primary.is_none());
        assert_eq!(resource.deposed[&key].id, "i-1");
        assert!(resource.depose_primary().is_none());
    }

    #[test]
    fn test_touch_bumps_serial() {
        let mut state = State::new();
        assert_eq!(state.serial, 0);
        state.touch();
        state.touch();
        assert_eq!(state.serial, 2);
        assert!(state.updated_at.is_some());
    }
}
