//! Per-vertex eval tree construction.

use crate::graph::{GraphNode, ResourceForm};

use super::node::{EvalLeaf, EvalNode, WalkOperation};
use super::provider::{
    BuildProviderConfig, CloseProviderLeaf, ConfigureProvider, InitProvider, InputProvider,
    ValidateProvider,
};
use super::resource::{
    ApplyResource, DataReadMode, DestroyResource, PlanDestroyResource, PlanResource,
    ReadDataSource, RefreshResource, ValidateResource,
};
use super::values::{
    CountBoundaryFixup, EvalLocal, EvalModuleVariable, EvalOutput, ModuleRemovedCleanup,
};

const CONFIGURE_OPS: &[WalkOperation] = &[
    WalkOperation::Refresh,
    WalkOperation::Plan,
    WalkOperation::PlanDestroy,
    WalkOperation::Apply,
];

const VALUE_OPS: &[WalkOperation] = &[
    WalkOperation::Refresh,
    WalkOperation::Plan,
    WalkOperation::PlanDestroy,
    WalkOperation::Apply,
];

/// Builds the full eval tree for a vertex. The walker filters it to the
/// current operation before executing.
#[must_use]
pub fn build_eval_tree(node: &GraphNode) -> EvalNode {
    match node {
        GraphNode::Provider { addr, config, .. } => {
            let key = addr.to_string();
            let body = config.as_ref().map(|c| c.body.clone()).unwrap_or_default();
            let build = EvalNode::leaf(EvalLeaf::BuildProviderConfig(BuildProviderConfig {
                addr: addr.clone(),
                body,
            }));
            EvalNode::sequence(vec![
                EvalNode::leaf(EvalLeaf::InitProvider(InitProvider {
                    type_name: addr.config.type_name.clone(),
                    key: key.clone(),
                })),
                EvalNode::op_filter(
                    &[WalkOperation::Validate],
                    EvalNode::sequence(vec![
                        build.clone(),
                        EvalNode::leaf(EvalLeaf::ValidateProvider(ValidateProvider {
                            key: key.clone(),
                        })),
                    ]),
                ),
                EvalNode::op_filter(
                    &[WalkOperation::Input],
                    EvalNode::sequence(vec![
                        build.clone(),
                        EvalNode::leaf(EvalLeaf::InputProvider(InputProvider {
                            addr: addr.clone(),
                        })),
                    ]),
                ),
                EvalNode::op_filter(
                    CONFIGURE_OPS,
                    EvalNode::sequence(vec![
                        build,
                        EvalNode::leaf(EvalLeaf::ConfigureProvider(ConfigureProvider { key })),
                    ]),
                ),
            ])
        }

        // Proxies never survive into a walk; an empty tree keeps a stray
        // one harmless.
        GraphNode::ProxyProvider { .. } => EvalNode::Noop,

        GraphNode::CloseProvider { addr } => {
            EvalNode::leaf(EvalLeaf::CloseProvider(CloseProviderLeaf {
                key: addr.to_string(),
            }))
        }

        GraphNode::Resource {
            addr,
            form,
            config,
            resolved_provider,
            ..
        } => {
            let provider_key = resolved_provider.as_ref().map(ToString::to_string);
            let data = node.is_data_resource();
            match form {
                ResourceForm::Abstract => EvalNode::Noop,

                ResourceForm::Validate => config.as_ref().map_or(EvalNode::Noop, |config| {
                    EvalNode::op_filter(
                        &[WalkOperation::Validate],
                        EvalNode::leaf(EvalLeaf::ValidateResource(ValidateResource {
                            addr: addr.clone(),
                            config: config.clone(),
                            provider_key,
                        })),
                    )
                }),

                ResourceForm::Refresh => {
                    if data {
                        config.as_ref().map_or(EvalNode::Noop, |config| {
                            EvalNode::op_filter(
                                &[WalkOperation::Refresh],
                                EvalNode::leaf(EvalLeaf::ReadDataSource(ReadDataSource {
                                    addr: addr.clone(),
                                    config: config.clone(),
                                    provider_key,
                                    mode: DataReadMode::Refresh,
                                })),
                            )
                        })
                    } else {
                        EvalNode::op_filter(
                            &[WalkOperation::Refresh],
                            EvalNode::leaf(EvalLeaf::RefreshResource(RefreshResource {
                                addr: addr.clone(),
                                provider_key,
                            })),
                        )
                    }
                }

                ResourceForm::Plan => config.as_ref().map_or(EvalNode::Noop, |config| {
                    if data {
                        EvalNode::op_filter(
                            &[WalkOperation::Plan],
                            EvalNode::leaf(EvalLeaf::ReadDataSource(ReadDataSource {
                                addr: addr.clone(),
                                config: config.clone(),
                                provider_key,
                                mode: DataReadMode::Plan,
                            })),
                        )
                    } else {
                        EvalNode::op_filter(
                            &[WalkOperation::Plan],
                            EvalNode::leaf(EvalLeaf::PlanResource(PlanResource {
                                addr: addr.clone(),
                                config: config.clone(),
                                provider_key,
                            })),
                        )
                    }
                }),

                // Orphans plan their destruction inside ordinary plan
                // walks; pure-destroy graphs walk with PlanDestroy.
                ResourceForm::PlanDestroy => EvalNode::op_filter(
                    &[WalkOperation::Plan, WalkOperation::PlanDestroy],
                    EvalNode::leaf(EvalLeaf::PlanDestroyResource(PlanDestroyResource {
                        addr: addr.clone(),
                    })),
                ),

                ResourceForm::Apply => {
                    if data {
                        config.as_ref().map_or(EvalNode::Noop, |config| {
                            EvalNode::op_filter(
                                &[WalkOperation::Apply],
                                EvalNode::leaf(EvalLeaf::ReadDataSource(ReadDataSource {
                                    addr: addr.clone(),
                                    config: config.clone(),
                                    provider_key,
                                    mode: DataReadMode::Apply,
                                })),
                            )
                        })
                    } else {
                        config.as_ref().map_or(EvalNode::Noop, |config| {
                            EvalNode::op_filter(
                                &[WalkOperation::Apply],
                                EvalNode::leaf(EvalLeaf::ApplyResource(ApplyResource {
                                    addr: addr.clone(),
                                    config: config.clone(),
                                    provider_key,
                                })),
                            )
                        })
                    }
                }

                ResourceForm::Destroy => EvalNode::op_filter(
                    &[WalkOperation::Apply],
                    EvalNode::leaf(EvalLeaf::DestroyResource(DestroyResource {
                        addr: addr.clone(),
                        provider_key,
                    })),
                ),
            }
        }

        GraphNode::Output {
            module,
            name,
            config,
            remove,
        } => EvalNode::op_filter(
            VALUE_OPS,
            EvalNode::leaf(EvalLeaf::EvalOutput(EvalOutput {
                module: module.clone(),
                name: name.clone(),
                config: config.clone(),
                remove: *remove,
            })),
        ),

        GraphNode::Local { module, name, expr } => {
            EvalNode::leaf(EvalLeaf::EvalLocal(EvalLocal {
                module: module.clone(),
                name: name.clone(),
                expr: expr.clone(),
            }))
        }

        // Root variable values are seeded by the engine before the walk;
        // the vertex exists to anchor references.
        GraphNode::RootVariable { .. } => EvalNode::Noop,

        GraphNode::ModuleVariable {
            module,
            name,
            expr,
            default,
        } => EvalNode::leaf(EvalLeaf::EvalModuleVariable(EvalModuleVariable {
            module: module.clone(),
            name: name.clone(),
            expr: expr.clone(),
            default: default.clone(),
        })),

        GraphNode::ModuleRemoved { module } => EvalNode::op_filter(
            &[WalkOperation::Apply],
            EvalNode::leaf(EvalLeaf::ModuleRemovedCleanup(ModuleRemovedCleanup {
                module: module.clone(),
            })),
        ),

        GraphNode::CountBoundary { fixups } => EvalNode::op_filter(
            &[WalkOperation::Apply],
            EvalNode::leaf(EvalLeaf::CountBoundaryFixup(CountBoundaryFixup {
                fixups: fixups.clone(),
            })),
        ),

        GraphNode::Root => EvalNode::Noop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ModulePath, ProviderConfig, Resource};
    use crate::config::ResourceConfig;

    fn count_leaves(node: &EvalNode) -> usize {
        match node {
            EvalNode::Leaf(_) => 1,
            EvalNode::Noop => 0,
            EvalNode::Sequence(children) => children.iter().map(count_leaves).sum(),
            EvalNode::OpFilter { node, .. } => count_leaves(node),
        }
    }

    #[test]
    fn test_provider_tree_filters_per_operation() {
        let vertex = GraphNode::Provider {
            addr: ProviderConfig::default_for("p").absolute(ModulePath::root()),
            form: crate::graph::ProviderForm::Apply,
            config: None,
        };
        let tree = build_eval_tree(&vertex);

        // Validate: init, build, validate.
        assert_eq!(
            count_leaves(&tree.clone().filter(WalkOperation::Validate)),
            3
        );
        // Apply: init, build, configure.
        assert_eq!(count_leaves(&tree.clone().filter(WalkOperation::Apply)), 3);
        // Input: init, build, input.
        assert_eq!(count_leaves(&tree.filter(WalkOperation::Input)), 3);
    }

    #[test]
    fn test_destroy_resource_participates_in_apply() {
        let vertex = GraphNode::Resource {
            addr: Resource::managed("p_thing", "a").absolute(ModulePath::root()),
            form: ResourceForm::Destroy,
            config: None,
            state: Vec::new(),
            resolved_provider: Some(ProviderConfig::default_for("p").absolute(ModulePath::root())),
        };
        let tree = build_eval_tree(&vertex);
        assert_eq!(count_leaves(&tree.clone().filter(WalkOperation::Apply)), 1);
        assert_eq!(count_leaves(&tree.filter(WalkOperation::Plan)), 0);
    }

    #[test]
    fn test_plan_resource_without_config_is_noop() {
        let vertex = GraphNode::Resource {
            addr: Resource::managed("p_thing", "a").absolute(ModulePath::root()),
            form: ResourceForm::Plan,
            config: None,
            state: Vec::new(),
            resolved_provider: None,
        };
        assert!(matches!(build_eval_tree(&vertex), EvalNode::Noop));
        let with_config = GraphNode::Resource {
            addr: Resource::managed("p_thing", "a").absolute(ModulePath::root()),
            form: ResourceForm::Plan,
            config: Some(ResourceConfig::managed("p_thing", "a")),
            state: Vec::new(),
            resolved_provider: None,
        };
        assert_eq!(
            count_leaves(&build_eval_tree(&with_config).filter(WalkOperation::Plan)),
            1
        );
    }
}
