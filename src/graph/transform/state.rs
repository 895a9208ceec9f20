//! Seeds resource vertices from prior state.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::addrs::AbsResource;
use crate::config::ConfigTree;
use crate::error::Result;
use crate::graph::EngineGraph;
use crate::graph::node::{GraphNode, ResourceForm};
use crate::state::State;

use super::GraphTransformer;

/// Strips instance-key and deposed suffixes off a module-local state key,
/// leaving the base resource address string.
fn base_of(local_key: &str) -> &str {
    let end = local_key
        .find('[')
        .or_else(|| local_key.find("(deposed "))
        .unwrap_or(local_key.len());
    &local_key[..end]
}

/// Adds one vertex per distinct resource recorded in state, in the
/// concrete form the builder chose.
pub struct StateTransformer {
    /// Prior state to seed from.
    pub state: Arc<State>,
    /// Concrete form for the created vertices.
    pub form: ResourceForm,
}

impl GraphTransformer for StateTransformer {
    fn name(&self) -> &'static str {
        "StateTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        for module in &self.state.modules {
            let mut seen: BTreeSet<String> = BTreeSet::new();
            for local_key in module.resources.keys() {
                let base = base_of(local_key);
                if !seen.insert(base.to_string()) {
                    continue;
                }
                let Ok(addr) = parse_in_module(base, &module.path) else {
                    debug!(key = %local_key, "skipping unparseable state key");
                    continue;
                };
                trace!(resource = %addr, "adding resource vertex from state");
                graph.add_vertex(GraphNode::Resource {
                    addr,
                    form: self.form,
                    config: None,
                    state: Vec::new(),
                    resolved_provider: None,
                });
            }
        }
        Ok(())
    }
}

/// Adds plan-destroy vertices for resources recorded in state whose
/// configuration no longer exists (removed resources or whole removed
/// modules).
pub struct OrphanResourceTransformer {
    /// Prior state.
    pub state: Arc<State>,
    /// Current configuration tree.
    pub config: Arc<ConfigTree>,
    /// Concrete form for the created vertices.
    pub form: ResourceForm,
}

impl GraphTransformer for OrphanResourceTransformer {
    fn name(&self) -> &'static str {
        "OrphanResourceTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        for module in &self.state.modules {
            let module_config = self.config.descendant(&module.path);
            let mut seen: BTreeSet<String> = BTreeSet::new();
            for local_key in module.resources.keys() {
                let base = base_of(local_key);
                if !seen.insert(base.to_string()) {
                    continue;
                }
                let declared = module_config.is_some_and(|tree| {
                    tree.module.managed.contains_key(base) || tree.module.data.contains_key(base)
                });
                if declared {
                    continue;
                }
                let Ok(addr) = parse_in_module(base, &module.path) else {
                    continue;
                };
                debug!(resource = %addr, "adding orphan destroy vertex");
                graph.add_vertex(GraphNode::Resource {
                    addr,
                    form: self.form,
                    config: None,
                    state: Vec::new(),
                    resolved_provider: None,
                });
            }
        }
        Ok(())
    }
}

fn parse_in_module(base: &str, module: &crate::addrs::ModulePath) -> Result<AbsResource> {
    let mut abs = AbsResource::parse(base)?;
    abs.module = module.clone();
    Ok(abs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::ModulePath;
    use crate::config::{Module, ResourceConfig};
    use crate::state::ResourceState;

    fn state_with_keys(keys: &[&str]) -> State {
        let mut state = State::new();
        let module = state.module_mut(&ModulePath::root());
        for key in keys {
            module
                .resources
                .insert((*key).to_string(), ResourceState::default());
        }
        state
    }

    #[test]
    fn test_state_seeding_dedupes_instances() {
        let state = state_with_keys(&["p_thing.a[0]", "p_thing.a[1]", "p_thing.b"]);
        let mut graph = EngineGraph::new();
        StateTransformer {
            state: Arc::new(state),
            form: ResourceForm::Refresh,
        }
        .transform(&mut graph)
        .expect("transform");
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_orphans_only_for_undeclared() {
        let state = state_with_keys(&["p_thing.a", "p_thing.gone"]);
        let config = ConfigTree::new(
            Module::new().with_resource(ResourceConfig::managed("p_thing", "a")),
        );
        let mut graph = EngineGraph::new();
        OrphanResourceTransformer {
            state: Arc::new(state),
            config: Arc::new(config),
            form: ResourceForm::PlanDestroy,
        }
        .transform(&mut graph)
        .expect("transform");
        assert_eq!(graph.len(), 1);
        let (_, vertex) = graph.vertices().next().expect("vertex");
        assert_eq!(
            vertex.resource_addr().expect("resource").to_string(),
            "p_thing.gone"
        );
    }
}
