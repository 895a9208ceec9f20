//! Attaches configuration and state objects to resource vertices.

use std::sync::Arc;

use tracing::trace;

use crate::config::ConfigTree;
use crate::error::Result;
use crate::graph::EngineGraph;
use crate::graph::node::GraphNode;
use crate::state::State;

use super::GraphTransformer;

/// Attaches the matching resource configuration to every resource vertex.
/// A vertex with no matching configuration is left alone; that is normal
/// for orphans and destroy nodes.
pub struct AttachResourceConfigTransformer {
    /// The configuration tree to search.
    pub config: Arc<ConfigTree>,
}

impl GraphTransformer for AttachResourceConfigTransformer {
    fn name(&self) -> &'static str {
        "AttachResourceConfigTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        for id in graph.vertex_ids() {
            let Some(addr) = graph.vertex(id).and_then(GraphNode::resource_addr).cloned() else {
                continue;
            };
            let found = self.config.descendant(&addr.module).and_then(|tree| {
                let key = addr.resource.to_string();
                tree.module
                    .managed
                    .get(&key)
                    .or_else(|| tree.module.data.get(&key))
                    .cloned()
            });
            if let Some(resource_config) = found {
                trace!(resource = %addr, "attaching resource config");
                if let Some(vertex) = graph.vertex_mut(id) {
                    vertex.attach_resource_config(resource_config);
                }
            }
        }
        Ok(())
    }
}

/// Attaches prior state entries to every resource vertex whose address
/// has any. Missing state is not an error.
pub struct AttachStateTransformer {
    /// Prior state to search.
    pub state: Arc<State>,
}

impl GraphTransformer for AttachStateTransformer {
    fn name(&self) -> &'static str {
        "AttachStateTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        for id in graph.vertex_ids() {
            let Some(addr) = graph.vertex(id).and_then(GraphNode::resource_addr).cloned() else {
                continue;
            };
            let base = addr.resource.to_string();
            let entries: Vec<(String, crate::state::ResourceState)> = self
                .state
                .module(&addr.module)
                .map(|module| {
                    module
                        .resources
                        .iter()
                        .filter(|(key, _)| {
                            key.as_str() == base
                                || key
                                    .strip_prefix(base.as_str())
                                    .is_some_and(|rest| rest.starts_with('['))
                        })
                        .map(|(key, rs)| (key.clone(), rs.clone()))
                        .collect()
                })
                .unwrap_or_default();
            if entries.is_empty() {
                continue;
            }
            trace!(resource = %addr, count = entries.len(), "attaching state");
            if let Some(vertex) = graph.vertex_mut(id) {
                vertex.attach_resource_state(entries);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ModulePath, Resource};
    use crate::config::{Module, ResourceConfig};
    use crate::graph::node::ResourceForm;
    use crate::state::ResourceState;

    fn resource_vertex() -> GraphNode {
        GraphNode::Resource {
            addr: Resource::managed("p_thing", "a").absolute(ModulePath::root()),
            form: ResourceForm::Plan,
            config: None,
            state: Vec::new(),
            resolved_provider: None,
        }
    }

    #[test]
    fn test_attach_config_by_address() {
        let tree = ConfigTree::new(Module::new().with_resource(
            ResourceConfig::managed("p_thing", "a").with_attr("name", crate::lang::Expr::lit("x")),
        ));
        let mut graph = EngineGraph::new();
        let id = graph.add_vertex(resource_vertex());
        AttachResourceConfigTransformer {
            config: Arc::new(tree),
        }
        .transform(&mut graph)
        .expect("transform");

        match graph.vertex(id) {
            Some(GraphNode::Resource { config, .. }) => {
                assert!(config.is_some());
            }
            other => panic!("unexpected vertex: {other:?}"),
        }
    }

    #[test]
    fn test_attach_state_collects_instances() {
        let mut state = State::new();
        let module = state.module_mut(&ModulePath::root());
        module
            .resources
            .insert(String::from("p_thing.a[0]"), ResourceState::default());
        module
            .resources
            .insert(String::from("p_thing.a[1]"), ResourceState::default());
        module
            .resources
            .insert(String::from("p_thing.ab"), ResourceState::default());

        let mut graph = EngineGraph::new();
        let id = graph.add_vertex(resource_vertex());
        AttachStateTransformer {
            state: Arc::new(state),
        }
        .transform(&mut graph)
        .expect("transform");

        match graph.vertex(id) {
            Some(GraphNode::Resource { state, .. }) => {
                assert_eq!(state.len(), 2);
            }
            other => panic!("unexpected vertex: {other:?}"),
        }
    }
}
