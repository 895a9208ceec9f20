//! Value vertices (variables, locals, outputs) and module lifecycle
//! transformers.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::ConfigTree;
use crate::dag::Edge;
use crate::error::Result;
use crate::graph::EngineGraph;
use crate::graph::node::GraphNode;
use crate::state::State;

use super::GraphTransformer;

/// Adds a referenceable vertex for every root-module input variable.
/// Values are seeded by the caller before the walk; the vertices anchor
/// `var.*` references.
pub struct RootVariableTransformer {
    /// The configuration tree.
    pub config: Arc<ConfigTree>,
}

impl GraphTransformer for RootVariableTransformer {
    fn name(&self) -> &'static str {
        "RootVariableTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        for name in self.config.module.variables.keys() {
            trace!(variable = %name, "adding root variable vertex");
            graph.add_vertex(GraphNode::RootVariable { name: name.clone() });
        }
        Ok(())
    }
}

/// Adds one vertex per input variable of every child module, wired to the
/// argument expression at its call site.
pub struct ModuleVariableTransformer {
    /// The configuration tree.
    pub config: Arc<ConfigTree>,
}

impl GraphTransformer for ModuleVariableTransformer {
    fn name(&self) -> &'static str {
        "ModuleVariableTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        self.config.visit(&mut |path, tree| {
            let Some(parent_path) = path.parent() else {
                return;
            };
            let Some(step) = path.last_step() else {
                return;
            };
            let call = self
                .config
                .descendant(&parent_path)
                .and_then(|parent| parent.module.module_calls.get(&step.name));

            for (name, variable) in &tree.module.variables {
                let expr = call.and_then(|c| c.arguments.get(name).cloned());
                trace!(module = %path, variable = %name, "adding module variable vertex");
                graph.add_vertex(GraphNode::ModuleVariable {
                    module: path.clone(),
                    name: name.clone(),
                    expr,
                    default: variable.default.clone(),
                });
            }
        });
        Ok(())
    }
}

/// Adds a vertex per local value in every module.
pub struct LocalTransformer {
    /// The configuration tree.
    pub config: Arc<ConfigTree>,
}

impl GraphTransformer for LocalTransformer {
    fn name(&self) -> &'static str {
        "LocalTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        self.config.visit(&mut |path, tree| {
            for (name, expr) in &tree.module.locals {
                graph.add_vertex(GraphNode::Local {
                    module: path.clone(),
                    name: name.clone(),
                    expr: expr.clone(),
                });
            }
        });
        Ok(())
    }
}

/// Adds a vertex per output value in every module. In remove mode (used
/// by destroy applies) the vertices delete recorded values instead of
/// evaluating them.
pub struct OutputTransformer {
    /// The configuration tree.
    pub config: Arc<ConfigTree>,
    /// Remove recorded values instead of evaluating.
    pub remove: bool,
}

impl GraphTransformer for OutputTransformer {
    fn name(&self) -> &'static str {
        "OutputTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        self.config.visit(&mut |path, tree| {
            for (name, output) in &tree.module.outputs {
                graph.add_vertex(GraphNode::Output {
                    module: path.clone(),
                    name: name.clone(),
                    config: (!self.remove).then(|| output.clone()),
                    remove: self.remove,
                });
            }
        });
        Ok(())
    }
}

/// Adds removal vertices for outputs recorded in state whose
/// configuration is gone.
pub struct OrphanOutputTransformer {
    /// The configuration tree.
    pub config: Arc<ConfigTree>,
    /// Prior state.
    pub state: Arc<State>,
}

impl GraphTransformer for OrphanOutputTransformer {
    fn name(&self) -> &'static str {
        "OrphanOutputTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        for module in &self.state.modules {
            let module_config = self.config.descendant(&module.path);
            for name in module.outputs.keys() {
                let declared = module_config
                    .is_some_and(|tree| tree.module.outputs.contains_key(name));
                if declared {
                    continue;
                }
                debug!(module = %module.path, output = %name, "adding orphan output removal");
                graph.add_vertex(GraphNode::Output {
                    module: module.path.clone(),
                    name: name.clone(),
                    config: None,
                    remove: true,
                });
            }
        }
        Ok(())
    }
}

/// Adds cleanup vertices for module states whose module no longer exists
/// in configuration.
pub struct RemovedModuleTransformer {
    /// The configuration tree.
    pub config: Arc<ConfigTree>,
    /// Prior state.
    pub state: Arc<State>,
}

impl GraphTransformer for RemovedModuleTransformer {
    fn name(&self) -> &'static str {
        "RemovedModuleTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        for module in &self.state.modules {
            if module.path.is_root() {
                continue;
            }
            if self.config.descendant(&module.path).is_some() {
                continue;
            }
            debug!(module = %module.path, "adding removed-module cleanup vertex");
            graph.add_vertex(GraphNode::ModuleRemoved {
                module: module.path.clone(),
            });
        }
        Ok(())
    }
}

/// Adds the count-boundary vertex, which runs after everything else and
/// normalizes state keys for resources that gained or lost `count`.
pub struct CountBoundaryTransformer {
    /// The configuration tree.
    pub config: Arc<ConfigTree>,
}

impl GraphTransformer for CountBoundaryTransformer {
    fn name(&self) -> &'static str {
        "CountBoundaryTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        let mut fixups = Vec::new();
        self.config.visit(&mut |path, tree| {
            for resource in tree.module.managed.values() {
                fixups.push((
                    path.clone(),
                    resource.addr().to_string(),
                    resource.count.is_some(),
                ));
            }
        });

        let sinks: Vec<usize> = graph
            .vertex_ids()
            .into_iter()
            .filter(|id| graph.up_edges(*id).is_empty())
            .collect();
        let boundary = graph.add_vertex(GraphNode::CountBoundary { fixups });
        for sink in sinks {
            graph.connect(Edge::new(boundary, sink));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::ModulePath;
    use crate::config::{Module, ModuleCall};
    use crate::dag::Vertex;
    use crate::lang::{Expr, Value};

    #[test]
    fn test_module_variables_pick_up_call_arguments() {
        let tree = ConfigTree::new(Module::new().with_module_call(
            ModuleCall::new("m").with_argument("region", Expr::lit("west")),
        ))
        .with_child(
            "m",
            ConfigTree::new(
                Module::new()
                    .with_variable("region", None)
                    .with_variable("zone", Some(Value::from("a"))),
            ),
        );

        let mut graph = EngineGraph::new();
        ModuleVariableTransformer {
            config: Arc::new(tree),
        }
        .transform(&mut graph)
        .expect("transform");

        let mut names: Vec<String> = graph.vertices().map(|(_, v)| v.name()).collect();
        names.sort();
        assert_eq!(names, vec!["module.m.var.region", "module.m.var.zone"]);

        let with_expr = graph
            .vertices()
            .filter(|(_, v)| matches!(v, GraphNode::ModuleVariable { expr: Some(_), .. }))
            .count();
        assert_eq!(with_expr, 1);
    }

    #[test]
    fn test_removed_module_detection() {
        let mut state = State::new();
        state
            .module_mut(&ModulePath::root().child("gone", None))
            .resources
            .clear();
        let tree = ConfigTree::new(Module::new());

        let mut graph = EngineGraph::new();
        RemovedModuleTransformer {
            config: Arc::new(tree),
            state: Arc::new(state),
        }
        .transform(&mut graph)
        .expect("transform");
        assert_eq!(graph.len(), 1);
        let (_, vertex) = graph.vertices().next().expect("vertex");
        assert_eq!(vertex.name(), "module.gone (removed)");
    }

    #[test]
    fn test_orphan_outputs_marked_for_removal() {
        let mut state = State::new();
        state
            .module_mut(&ModulePath::root())
            .outputs
            .insert(String::from("old"), Value::from("x"));
        let tree = ConfigTree::new(Module::new().with_output("new", Expr::lit("y")));

        let mut graph = EngineGraph::new();
        OrphanOutputTransformer {
            config: Arc::new(tree),
            state: Arc::new(state),
        }
        .transform(&mut graph)
        .expect("transform");
        assert_eq!(graph.len(), 1);
        match graph.vertices().next() {
            Some((_, GraphNode::Output { name, remove, .. })) => {
                assert_eq!(name, "old");
                assert!(remove);
            }
            other => panic!("unexpected vertex: {other:?}"),
        }
    }
}
