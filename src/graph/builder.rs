//! Graph builders: one transformer sequence per operation.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::addrs::TargetAddr;
use crate::config::ConfigTree;
use crate::error::Result;
use crate::state::{Diff, State};

use super::EngineGraph;
use super::node::{ProviderForm, ResourceForm};
use super::transform::{
    AttachResourceConfigTransformer, AttachStateTransformer, CBDEdgeTransformer,
    ConditionalTransformer, ConfigTransformer, CountBoundaryTransformer, DestroyEdgeTransformer,
    DiffTransformer, GraphTransformer, LocalTransformer, ModuleVariableTransformer,
    OrphanOutputTransformer, OrphanResourceTransformer, OutputTransformer,
    ReferenceTransformer, RemovedModuleTransformer, RootTransformer, RootVariableTransformer,
    StateTransformer, TargetsTransformer, TransitiveReductionTransformer, close_providers,
    transform_providers,
};

/// Something that can produce a graph by naming its transformer steps.
pub trait GraphBuilder {
    /// A name for trace logging.
    fn builder_name(&self) -> &'static str;

    /// The ordered transformer sequence.
    fn steps(&self) -> Vec<Box<dyn GraphTransformer>>;

    /// Whether to structurally validate the finished graph.
    fn validate(&self) -> bool {
        true
    }

    /// Runs the steps and returns the finished graph.
    fn build(&self) -> Result<EngineGraph> {
        BasicGraphBuilder {
            name: self.builder_name(),
            steps: self.steps(),
            validate: self.validate(),
        }
        .build()
    }
}

/// Applies an ordered list of transformers, failing fast on the first
/// error, then optionally validates the result.
pub struct BasicGraphBuilder {
    /// Builder name for logs.
    pub name: &'static str,
    /// The transformer sequence.
    pub steps: Vec<Box<dyn GraphTransformer>>,
    /// Validate acyclicity and the single root at the end.
    pub validate: bool,
}

impl BasicGraphBuilder {
    /// Runs the pipeline.
    pub fn build(&self) -> Result<EngineGraph> {
        let mut graph = EngineGraph::new();
        for step in &self.steps {
            trace!(builder = self.name, transformer = step.name(), "running transformer");
            step.transform(&mut graph)?;
            trace!(
                builder = self.name,
                transformer = step.name(),
                vertices = graph.len(),
                edges = graph.edge_count(),
                "transformer complete"
            );
        }
        if self.validate {
            graph.validate()?;
        }
        debug!(
            builder = self.name,
            vertices = graph.len(),
            edges = graph.edge_count(),
            "graph complete"
        );
        Ok(graph)
    }
}

/// Builds the graph for plan walks: configured resources plus destroy
/// planning for orphans.
pub struct PlanGraphBuilder {
    /// Configuration tree.
    pub config: Arc<ConfigTree>,
    /// Prior state.
    pub state: Arc<State>,
    /// Targets; empty for a full plan.
    pub targets: Vec<TargetAddr>,
}

impl GraphBuilder for PlanGraphBuilder {
    fn builder_name(&self) -> &'static str {
        "PlanGraphBuilder"
    }

    fn steps(&self) -> Vec<Box<dyn GraphTransformer>> {
        vec![
            Box::new(ConfigTransformer {
                config: Arc::clone(&self.config),
                form: ResourceForm::Plan,
                data_only: false,
            }),
            Box::new(OrphanResourceTransformer {
                state: Arc::clone(&self.state),
                config: Arc::clone(&self.config),
                form: ResourceForm::PlanDestroy,
            }),
            Box::new(AttachResourceConfigTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(AttachStateTransformer {
                state: Arc::clone(&self.state),
            }),
            Box::new(transform_providers(
                Arc::clone(&self.config),
                ProviderForm::Plan,
            )),
            Box::new(RootVariableTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(LocalTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(OutputTransformer {
                config: Arc::clone(&self.config),
                remove: false,
            }),
            Box::new(ModuleVariableTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(ReferenceTransformer {
                fatal_unresolved: false,
            }),
            Box::new(DestroyEdgeTransformer),
            Box::new(TargetsTransformer {
                targets: self.targets.clone(),
            }),
            Box::new(RootTransformer),
            Box::new(TransitiveReductionTransformer),
        ]
    }
}

/// Builds the graph for pure-destroy planning: the state is simply
/// reversed, so most configuration ordering is ignored.
pub struct PlanDestroyGraphBuilder {
    /// Configuration tree (used only to attach config to vertices).
    pub config: Arc<ConfigTree>,
    /// Prior state.
    pub state: Arc<State>,
    /// Targets; empty destroys everything.
    pub targets: Vec<TargetAddr>,
}

impl GraphBuilder for PlanDestroyGraphBuilder {
    fn builder_name(&self) -> &'static str {
        "PlanDestroyGraphBuilder"
    }

    fn steps(&self) -> Vec<Box<dyn GraphTransformer>> {
        vec![
            Box::new(StateTransformer {
                state: Arc::clone(&self.state),
                form: ResourceForm::PlanDestroy,
            }),
            Box::new(AttachResourceConfigTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(AttachStateTransformer {
                state: Arc::clone(&self.state),
            }),
            Box::new(DestroyEdgeTransformer),
            Box::new(TargetsTransformer {
                targets: self.targets.clone(),
            }),
            Box::new(RootTransformer),
        ]
    }
}

/// Builds the graph for refresh walks: recorded resources from state plus
/// data sources from configuration.
pub struct RefreshGraphBuilder {
    /// Configuration tree.
    pub config: Arc<ConfigTree>,
    /// Prior state.
    pub state: Arc<State>,
    /// Targets; empty refreshes everything.
    pub targets: Vec<TargetAddr>,
}

impl GraphBuilder for RefreshGraphBuilder {
    fn builder_name(&self) -> &'static str {
        "RefreshGraphBuilder"
    }

    fn steps(&self) -> Vec<Box<dyn GraphTransformer>> {
        vec![
            Box::new(StateTransformer {
                state: Arc::clone(&self.state),
                form: ResourceForm::Refresh,
            }),
            Box::new(ConfigTransformer {
                config: Arc::clone(&self.config),
                form: ResourceForm::Refresh,
                data_only: true,
            }),
            Box::new(AttachResourceConfigTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(AttachStateTransformer {
                state: Arc::clone(&self.state),
            }),
            Box::new(transform_providers(
                Arc::clone(&self.config),
                ProviderForm::Plan,
            )),
            Box::new(RootVariableTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(LocalTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(ModuleVariableTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(ReferenceTransformer {
                fatal_unresolved: false,
            }),
            Box::new(TargetsTransformer {
                targets: self.targets.clone(),
            }),
            Box::new(RootTransformer),
            Box::new(TransitiveReductionTransformer),
        ]
    }
}

/// Builds the graph for validate walks: every configured object, with
/// unresolved references fatal.
pub struct ValidateGraphBuilder {
    /// Configuration tree.
    pub config: Arc<ConfigTree>,
}

impl GraphBuilder for ValidateGraphBuilder {
    fn builder_name(&self) -> &'static str {
        "ValidateGraphBuilder"
    }

    fn steps(&self) -> Vec<Box<dyn GraphTransformer>> {
        vec![
            Box::new(ConfigTransformer {
                config: Arc::clone(&self.config),
                form: ResourceForm::Validate,
                data_only: false,
            }),
            Box::new(AttachResourceConfigTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(transform_providers(
                Arc::clone(&self.config),
                ProviderForm::Plan,
            )),
            Box::new(RootVariableTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(LocalTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(OutputTransformer {
                config: Arc::clone(&self.config),
                remove: false,
            }),
            Box::new(ModuleVariableTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(ReferenceTransformer {
                fatal_unresolved: true,
            }),
            Box::new(RootTransformer),
        ]
    }
}

/// Builds the graph for apply walks from a computed diff.
pub struct ApplyGraphBuilder {
    /// Configuration tree the diff was built from.
    pub config: Arc<ConfigTree>,
    /// The diff to apply.
    pub diff: Arc<Diff>,
    /// Current state.
    pub state: Arc<State>,
    /// Targets; empty applies the whole diff.
    pub targets: Vec<TargetAddr>,
    /// True for a pure-destroy apply.
    pub destroy: bool,
}

impl GraphBuilder for ApplyGraphBuilder {
    fn builder_name(&self) -> &'static str {
        "ApplyGraphBuilder"
    }

    fn steps(&self) -> Vec<Box<dyn GraphTransformer>> {
        vec![
            Box::new(DiffTransformer {
                diff: Arc::clone(&self.diff),
            }),
            Box::new(OrphanOutputTransformer {
                config: Arc::clone(&self.config),
                state: Arc::clone(&self.state),
            }),
            Box::new(AttachResourceConfigTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(AttachStateTransformer {
                state: Arc::clone(&self.state),
            }),
            Box::new(transform_providers(
                Arc::clone(&self.config),
                ProviderForm::Apply,
            )),
            Box::new(DestroyEdgeTransformer),
            Box::new(ConditionalTransformer {
                enabled: !self.destroy,
                inner: Box::new(CBDEdgeTransformer),
            }),
            Box::new(RootVariableTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(LocalTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(OutputTransformer {
                config: Arc::clone(&self.config),
                remove: self.destroy,
            }),
            Box::new(ModuleVariableTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(RemovedModuleTransformer {
                config: Arc::clone(&self.config),
                state: Arc::clone(&self.state),
            }),
            Box::new(ReferenceTransformer {
                fatal_unresolved: false,
            }),
            // The count boundary is added before targeting so that a
            // targeted apply prunes it along with everything else outside
            // the targets' dependency closure.
            Box::new(CountBoundaryTransformer {
                config: Arc::clone(&self.config),
            }),
            Box::new(TargetsTransformer {
                targets: self.targets.clone(),
            }),
            Box::new(close_providers()),
            Box::new(RootTransformer),
            Box::new(TransitiveReductionTransformer),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Module, ProviderConfigBlock, ResourceConfig};
    use crate::dag::Vertex;
    use crate::graph::node::GraphNode;
    use crate::lang::Expr;
    use crate::state::{ChangeKind, InstanceDiff};
    use std::collections::BTreeMap;

    fn simple_config() -> Arc<ConfigTree> {
        Arc::new(ConfigTree::new(
            Module::new()
                .with_provider(ProviderConfigBlock::new("p"))
                .with_resource(
                    ResourceConfig::managed("p_thing", "a").with_attr("name", Expr::lit("x")),
                ),
        ))
    }

    #[test]
    fn test_plan_graph_shape() {
        let builder = PlanGraphBuilder {
            config: simple_config(),
            state: Arc::new(State::new()),
            targets: vec![],
        };
        let graph = builder.build().expect("build");
        graph.validate().expect("valid");

        let names: Vec<String> = graph.vertices().map(|(_, v)| v.name()).collect();
        assert!(names.contains(&String::from("provider.p")));
        assert!(names.contains(&String::from("p_thing.a")));
        assert!(names.contains(&String::from("root")));
    }

    #[test]
    fn test_apply_graph_has_close_provider() {
        let mut diff = Diff::new();
        diff.module_mut(&crate::addrs::ModulePath::root())
            .resources
            .insert(
                String::from("p_thing.a"),
                InstanceDiff {
                    change: ChangeKind::Create,
                    attributes: BTreeMap::new(),
                    destroy_deposed: None,
                    create_before_destroy: false,
                },
            );
        let builder = ApplyGraphBuilder {
            config: simple_config(),
            diff: Arc::new(diff),
            state: Arc::new(State::new()),
            targets: vec![],
            destroy: false,
        };
        let graph = builder.build().expect("build");

        let names: Vec<String> = graph.vertices().map(|(_, v)| v.name()).collect();
        assert!(names.contains(&String::from("provider.p (close)")));
        assert!(names.contains(&String::from("p_thing.a")));

        // The close vertex depends on the provider's consumer.
        let closer = graph
            .vertices()
            .find(|(_, v)| matches!(v, GraphNode::CloseProvider { .. }))
            .map(|(id, _)| id)
            .expect("close vertex");
        let consumer = graph
            .vertices()
            .find(|(_, v)| v.name() == "p_thing.a")
            .map(|(id, _)| id)
            .expect("consumer");
        assert!(graph.descendants(closer).contains(&consumer));
    }

    #[test]
    fn test_targeted_apply_prunes_count_boundary_and_siblings() {
        // Two resources, one counted; only the other is targeted.
        let config = Arc::new(ConfigTree::new(
            Module::new()
                .with_provider(ProviderConfigBlock::new("p"))
                .with_resource(
                    ResourceConfig::managed("p_thing", "a").with_attr("name", Expr::lit("a")),
                )
                .with_resource(
                    ResourceConfig::managed("p_thing", "b")
                        .with_attr("name", Expr::lit("b"))
                        .with_count(Expr::lit(2_i64)),
                ),
        ));
        let mut diff = Diff::new();
        let module = diff.module_mut(&crate::addrs::ModulePath::root());
        for key in ["p_thing.a", "p_thing.b[0]", "p_thing.b[1]"] {
            module.resources.insert(
                key.to_string(),
                InstanceDiff {
                    change: ChangeKind::Create,
                    attributes: BTreeMap::new(),
                    destroy_deposed: None,
                    create_before_destroy: false,
                },
            );
        }
        let diff = Arc::new(diff);

        let build = |targets: Vec<crate::addrs::TargetAddr>| {
            ApplyGraphBuilder {
                config: Arc::clone(&config),
                diff: Arc::clone(&diff),
                state: Arc::new(State::new()),
                targets,
                destroy: false,
            }
            .build()
            .expect("build")
        };

        // Untargeted: the boundary survives and covers both resources.
        let full = build(vec![]);
        assert!(
            full.vertices()
                .any(|(_, v)| matches!(v, GraphNode::CountBoundary { .. }))
        );

        // Targeted: every surviving non-root vertex is the target or one
        // of its dependencies; the boundary and the sibling are pruned.
        let targeted = build(vec![
            crate::addrs::TargetAddr::parse("p_thing.a").expect("target"),
        ]);
        targeted.validate().expect("valid");
        let names: Vec<String> = targeted.vertices().map(|(_, v)| v.name()).collect();
        assert!(names.contains(&String::from("p_thing.a")));
        assert!(!names.iter().any(|n| n.starts_with("p_thing.b")));
        assert!(
            !targeted
                .vertices()
                .any(|(_, v)| matches!(v, GraphNode::CountBoundary { .. }))
        );
    }

    #[test]
    fn test_determinism_same_inputs_same_graph() {
        let build = || {
            let builder = PlanGraphBuilder {
                config: simple_config(),
                state: Arc::new(State::new()),
                targets: vec![],
            };
            let graph = builder.build().expect("build");
            let mut names: Vec<String> = graph.vertices().map(|(_, v)| v.name()).collect();
            names.sort();
            let mut edges: Vec<(String, String)> = graph
                .vertex_ids()
                .into_iter()
                .flat_map(|id| {
                    graph
                        .down_edges(id)
                        .into_iter()
                        .map(move |dep| (id, dep))
                        .collect::<Vec<_>>()
                })
                .map(|(a, b)| (graph.vertex_name(a), graph.vertex_name(b)))
                .collect();
            edges.sort();
            (names, edges)
        };
        assert_eq!(build(), build());
    }

    #[test]
    fn test_validate_graph_rejects_undeclared_reference() {
        let config = Arc::new(ConfigTree::new(
            Module::new()
                .with_provider(ProviderConfigBlock::new("p"))
                .with_resource(
                    ResourceConfig::managed("p_thing", "a")
                        .with_attr("name", Expr::parse_ref("var.missing").expect("ref")),
                ),
        ));
        let err = ValidateGraphBuilder { config }
            .build()
            .expect_err("undeclared variable");
        assert!(err.to_string().contains("var.missing"));
    }

    #[test]
    fn test_plan_destroy_graph_needs_no_providers() {
        let mut state = State::new();
        state
            .module_mut(&crate::addrs::ModulePath::root())
            .resources
            .insert(
                String::from("p_thing.a"),
                crate::state::ResourceState::default(),
            );
        let builder = PlanDestroyGraphBuilder {
            config: simple_config(),
            state: Arc::new(state),
            targets: vec![],
        };
        let graph = builder.build().expect("build");
        assert!(
            graph
                .vertices()
                .all(|(_, v)| v.provider_addr().is_none())
        );
    }
}
