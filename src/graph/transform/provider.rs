//! The provider resolution sub-pipeline.
//!
//! Providers are resolved in a fixed sequence of passes: seed concrete
//! vertices from configuration and insert proxies for pass-through
//! (`ProviderConfigTransformer`), synthesize implicit root providers
//! (`MissingProviderTransformer`), connect consumers to the provider they
//! will use (`ProviderTransformer`), connect nested providers to their
//! parents (`ParentProviderTransformer`), and prune proxies and unused
//! providers (`PruneProviderTransformer`). Every intermediate shape is a
//! valid graph, so a failing pass localizes the problem.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::addrs::ProviderConfig;
use crate::config::ConfigTree;
use crate::dag::{Edge, VertexId};
use crate::error::{Result, SkeinError};
use crate::graph::EngineGraph;
use crate::graph::node::{GraphNode, ProviderForm};

use super::{GraphTransformer, MultiTransformer};

/// The full provider sub-pipeline in its contractual order.
#[must_use]
pub fn transform_providers(config: Arc<ConfigTree>, form: ProviderForm) -> MultiTransformer {
    MultiTransformer(vec![
        Box::new(ProviderConfigTransformer { config, form }),
        Box::new(MissingProviderTransformer { form }),
        Box::new(ProviderTransformer),
        Box::new(ParentProviderTransformer),
        Box::new(PruneProviderTransformer),
    ])
}

/// Map from canonical provider address to vertex id, proxies included.
fn provider_vertex_map(graph: &EngineGraph) -> HashMap<String, VertexId> {
    let mut map = HashMap::new();
    for (id, vertex) in graph.vertices() {
        if let Some(addr) = vertex.provider_addr() {
            map.insert(addr.to_string(), id);
        }
    }
    map
}

/// Follows a proxy chain to its concrete target. Chains are finite
/// because every hop strictly decreases module depth.
fn resolve_proxy(graph: &EngineGraph, mut id: VertexId) -> Result<VertexId> {
    let mut hops = 0;
    while let Some(GraphNode::ProxyProvider { target, .. }) = graph.vertex(id) {
        id = *target;
        hops += 1;
        if hops > 128 {
            return Err(SkeinError::internal("provider proxy chain does not terminate"));
        }
    }
    if graph.vertex(id).is_none() {
        return Err(SkeinError::internal(
            "provider proxy chain leads to a removed vertex",
        ));
    }
    Ok(id)
}

/// Adds one concrete provider vertex per `provider` block in the module
/// tree, then inserts proxy vertices for provider configurations passed
/// from parent to child module calls.
///
/// A block with an entirely empty body is *proxyable*: it stands in for a
/// configuration the parent must pass down, and an incoming pass-through
/// replaces it in place. A configured block always wins over a
/// pass-through.
pub struct ProviderConfigTransformer {
    /// The configuration tree.
    pub config: Arc<ConfigTree>,
    /// Concrete form for the created vertices.
    pub form: ProviderForm,
}

impl GraphTransformer for ProviderConfigTransformer {
    fn name(&self) -> &'static str {
        "ProviderConfigTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        let mut providers: HashMap<String, VertexId> = HashMap::new();
        let mut proxiable: HashMap<String, bool> = HashMap::new();
        let mut failure: Option<SkeinError> = None;

        // The visit is parents-first, so a module's pass-through targets
        // are always registered before the module itself is processed.
        self.config.visit(&mut |path, tree| {
            if failure.is_some() {
                return;
            }

            for block in tree.module.provider_configs.values() {
                let addr = block.addr().absolute(path.clone());
                let key = addr.to_string();
                trace!(provider = %key, proxyable = block.is_proxyable(), "adding provider vertex");
                let id = graph.add_vertex(GraphNode::Provider {
                    addr,
                    form: self.form,
                    config: Some(block.clone()),
                });
                proxiable.insert(key.clone(), block.is_proxyable());
                providers.insert(key, id);
            }

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
            let Some(call) = call else {
                return;
            };

            for (child_name, parent_name) in &call.providers {
                let parsed = ProviderConfig::parse(child_name)
                    .and_then(|child| ProviderConfig::parse(parent_name).map(|p| (child, p)));
                let (child_config, parent_config) = match parsed {
                    Ok(pair) => pair,
                    Err(err) => {
                        failure = Some(err);
                        return;
                    }
                };
                let full_child = child_config.absolute(path.clone());
                let full_parent = parent_config.absolute(parent_path.clone());

                let Some(parent_id) = providers.get(&full_parent.to_string()).copied() else {
                    failure = Some(SkeinError::Config {
                        message: format!(
                            "module {path:?} is passed provider {full_parent} which is not configured"
                        ),
                        address: Some(full_parent.to_string()),
                    });
                    return;
                };

                let child_key = full_child.to_string();
                let proxy = GraphNode::ProxyProvider {
                    addr: full_child,
                    target: parent_id,
                };
                match providers.get(&child_key).copied() {
                    Some(existing) if proxiable.get(&child_key).copied().unwrap_or(false) => {
                        // The child's empty block is replaced by the
                        // pass-through, keeping every edge.
                        debug!(provider = %child_key, "replacing proxyable block with proxy");
                        let new_id = graph.replace(existing, proxy);
                        providers.insert(child_key, new_id);
                    }
                    Some(_) => {
                        // Locally configured; the pass-through is ignored.
                        debug!(provider = %child_key, "keeping locally configured provider");
                    }
                    None if child_name.contains('.') => {
                        // Aliased configurations are only ever mapped onto
                        // an explicit (empty) block in the child.
                        debug!(provider = %child_key, "not implicitly adding aliased proxy");
                    }
                    None => {
                        let id = graph.add_vertex(proxy);
                        providers.insert(child_key, id);
                    }
                }
            }
        });

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Synthesizes an abstract provider vertex for root-module consumers
/// whose provider has no configuration block. Nested modules rely on
/// inheritance instead, and aliased providers must always be configured
/// explicitly.
pub struct MissingProviderTransformer {
    /// Concrete form for the created vertices.
    pub form: ProviderForm,
}

impl GraphTransformer for MissingProviderTransformer {
    fn name(&self) -> &'static str {
        "MissingProviderTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        let mut map = provider_vertex_map(graph);
        for id in graph.vertex_ids() {
            let Some((addr, _)) = graph.vertex(id).and_then(GraphNode::provided_by) else {
                continue;
            };
            if !addr.module.is_root() {
                continue;
            }
            if addr.config.alias.is_some() {
                debug!(provider = %addr, "not adding implicit aliased configuration");
                continue;
            }
            let key = addr.to_string();
            if map.contains_key(&key) {
                continue;
            }
            debug!(provider = %key, "adding implicit configuration");
            let new_id = graph.add_vertex(GraphNode::Provider {
                addr,
                form: self.form,
                config: None,
            });
            map.insert(key, new_id);
        }
        Ok(())
    }
}

/// Connects every consumer to the provider it will use, resolving
/// inheritance upward through the module tree and following proxy chains
/// to their concrete targets. Records the resolved address on the
/// consumer.
///
/// Every unresolved consumer is collected; the pass reports them all in
/// one resolution error rather than stopping at the first.
pub struct ProviderTransformer;

impl GraphTransformer for ProviderTransformer {
    fn name(&self) -> &'static str {
        "ProviderTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        let map = provider_vertex_map(graph);
        let mut failures: Vec<String> = Vec::new();

        for id in graph.vertex_ids() {
            let Some((addr, exact)) = graph.vertex(id).and_then(GraphNode::provided_by) else {
                continue;
            };
            let consumer_name = graph.vertex_name(id);

            let mut target = map.get(&addr.to_string()).copied();
            if target.is_none() && !exact {
                let mut current = addr.inherited();
                while let Some(candidate) = current {
                    if let Some(found) = map.get(&candidate.to_string()) {
                        target = Some(*found);
                        break;
                    }
                    current = candidate.inherited();
                }
            }

            let Some(target_id) = target else {
                failures.push(format!(
                    "{consumer_name}: configuration for {addr} is not present; a provider configuration block is required for all operations"
                ));
                continue;
            };

            let concrete_id = resolve_proxy(graph, target_id)?;
            let Some(resolved) = graph
                .vertex(concrete_id)
                .and_then(GraphNode::provider_addr)
                .cloned()
            else {
                return Err(SkeinError::internal(format!(
                    "provider target for {consumer_name} is not a provider vertex"
                )));
            };

            debug!(resource = %consumer_name, provider = %resolved, "resolved provider");
            if let Some(vertex) = graph.vertex_mut(id) {
                vertex.set_provider(resolved);
            }
            graph.connect(Edge::new(id, concrete_id));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(SkeinError::Resolution {
                message: failures.join("\n"),
                consumer: None,
            })
        }
    }
}

/// Connects each concrete provider vertex in a nested module to the
/// provider for the same configuration in the parent module, preserving
/// configure order across nesting. Pass-through proxies are resolved to
/// their concrete targets.
pub struct ParentProviderTransformer;

impl GraphTransformer for ParentProviderTransformer {
    fn name(&self) -> &'static str {
        "ParentProviderTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        let map = provider_vertex_map(graph);
        for id in graph.vertex_ids() {
            let Some(vertex) = graph.vertex(id) else {
                continue;
            };
            if vertex.is_proxy() {
                continue;
            }
            let Some(addr) = vertex.provider_addr() else {
                continue;
            };
            let Some(parent_addr) = addr.inherited() else {
                continue;
            };
            if let Some(parent_id) = map.get(&parent_addr.to_string()).copied() {
                let concrete = resolve_proxy(graph, parent_id)?;
                if concrete != id {
                    graph.connect(Edge::new(id, concrete));
                }
            }
        }
        Ok(())
    }
}

/// Removes proxy vertices (their structural role ends once consumers are
/// connected), then removes providers nothing consumes. The two concerns
/// run as separate passes over stable snapshots so neither observes the
/// other's mutations mid-iteration.
pub struct PruneProviderTransformer;

impl GraphTransformer for PruneProviderTransformer {
    fn name(&self) -> &'static str {
        "PruneProviderTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        for id in graph.vertex_ids() {
            if graph.vertex(id).is_some_and(GraphNode::is_proxy) {
                debug!(proxy = %graph.vertex_name(id), "pruning proxy provider");
                graph.remove_vertex(id);
            }
        }

        for id in graph.vertex_ids() {
            let is_provider = graph
                .vertex(id)
                .is_some_and(|v| v.provider_addr().is_some());
            if is_provider && graph.up_edges(id).is_empty() {
                debug!(provider = %graph.vertex_name(id), "pruning unused provider");
                graph.remove_vertex(id);
            }
        }
        Ok(())
    }
}

/// Adds one close vertex per provider, depending on the provider and on
/// every one of its consumers, so plugin shutdown runs strictly last.
pub struct CloseProviderTransformer;

impl GraphTransformer for CloseProviderTransformer {
    fn name(&self) -> &'static str {
        "CloseProviderTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        let mut closers: HashMap<String, VertexId> = HashMap::new();
        for id in graph.vertex_ids() {
            let Some(vertex) = graph.vertex(id) else {
                continue;
            };
            if vertex.is_proxy() {
                continue;
            }
            let Some(addr) = vertex.provider_addr().cloned() else {
                continue;
            };
            let key = addr.to_string();
            let closer = match closers.get(&key) {
                Some(existing) => *existing,
                None => {
                    let created = graph.add_vertex(GraphNode::CloseProvider { addr });
                    closers.insert(key, created);
                    created
                }
            };
            graph.connect(Edge::new(closer, id));
            for consumer in graph.up_edges(id) {
                if consumer == closer {
                    continue;
                }
                if graph
                    .vertex(consumer)
                    .and_then(GraphNode::provided_by)
                    .is_some()
                {
                    graph.connect(Edge::new(closer, consumer));
                }
            }
        }
        Ok(())
    }
}

/// Convenience constructor for the close pass, used by the apply builder.
#[must_use]
pub fn close_providers() -> CloseProviderTransformer {
    CloseProviderTransformer
}
