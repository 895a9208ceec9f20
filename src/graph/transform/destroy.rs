//! Destroy ordering: reversed edges and create-before-destroy fixups.

use std::collections::HashMap;

use tracing::trace;

use crate::addrs::Referenceable;
use crate::dag::{Edge, VertexId};
use crate::error::Result;
use crate::graph::EngineGraph;
use crate::graph::node::{GraphNode, ResourceForm};

use super::GraphTransformer;

/// Orders destroy vertices opposite to creation order: when resource `b`
/// references resource `a`, `b` is destroyed before `a`, so `a`'s destroy
/// vertex depends on `b`'s.
pub struct DestroyEdgeTransformer;

impl GraphTransformer for DestroyEdgeTransformer {
    fn name(&self) -> &'static str {
        "DestroyEdgeTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        let mut destroyers: HashMap<(String, String), Vec<VertexId>> = HashMap::new();
        for (id, vertex) in graph.vertices() {
            if let GraphNode::Resource { addr, form, .. } = vertex
                && matches!(form, ResourceForm::Destroy | ResourceForm::PlanDestroy)
            {
                destroyers
                    .entry((addr.module.to_string(), addr.resource.to_string()))
                    .or_default()
                    .push(id);
            }
        }
        if destroyers.is_empty() {
            return Ok(());
        }

        let destroyer_ids: Vec<VertexId> = destroyers.values().flatten().copied().collect();
        for id in destroyer_ids {
            let Some(vertex) = graph.vertex(id) else {
                continue;
            };
            let references = vertex.references();
            for (module, reference) in references {
                let Referenceable::Resource { resource, .. } = &reference.subject else {
                    continue;
                };
                let key = (module.to_string(), resource.to_string());
                let Some(targets) = destroyers.get(&key) else {
                    continue;
                };
                for target in targets {
                    if *target == id {
                        continue;
                    }
                    trace!(
                        first = %graph.vertex_name(id),
                        then = %graph.vertex_name(*target),
                        "adding reversed destroy edge"
                    );
                    graph.connect(Edge::new(*target, id));
                }
            }
        }
        Ok(())
    }
}

/// Flips the destroy-then-create ordering for resources that asked to be
/// replaced create-before-destroy.
pub struct CBDEdgeTransformer;

impl GraphTransformer for CBDEdgeTransformer {
    fn name(&self) -> &'static str {
        "CBDEdgeTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        // Pair apply and destroy vertices by address.
        let mut applies: HashMap<String, VertexId> = HashMap::new();
        let mut destroys: HashMap<String, VertexId> = HashMap::new();
        let mut cbd: HashMap<String, bool> = HashMap::new();
        for (id, vertex) in graph.vertices() {
            let GraphNode::Resource {
                addr, form, config, ..
            } = vertex
            else {
                continue;
            };
            let key = addr.to_string();
            match form {
                ResourceForm::Apply => {
                    applies.insert(key.clone(), id);
                    cbd.insert(
                        key,
                        config.as_ref().is_some_and(|c| c.create_before_destroy),
                    );
                }
                ResourceForm::Destroy => {
                    destroys.insert(key, id);
                }
                _ => {}
            }
        }

        for (key, apply_id) in &applies {
            if !cbd.get(key).copied().unwrap_or(false) {
                continue;
            }
            let Some(destroy_id) = destroys.get(key) else {
                continue;
            };
            trace!(resource = %key, "reordering replacement create-before-destroy");
            graph.disconnect(Edge::new(*apply_id, *destroy_id));
            graph.connect(Edge::new(*destroy_id, *apply_id));
        }
        Ok(())
    }
}
