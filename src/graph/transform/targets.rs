//! Prunes the graph down to targeted resources and their dependencies.

use std::collections::BTreeSet;

use tracing::debug;

use crate::addrs::TargetAddr;
use crate::error::Result;
use crate::graph::EngineGraph;

use super::GraphTransformer;

/// With targets supplied, keeps only the targeted resource vertices and
/// everything they transitively depend on; every other vertex is removed.
/// Destroy-ordering helpers survive because they are expressed as edges
/// between surviving vertices.
pub struct TargetsTransformer {
    /// The user-supplied targets; empty means no filtering.
    pub targets: Vec<TargetAddr>,
}

impl GraphTransformer for TargetsTransformer {
    fn name(&self) -> &'static str {
        "TargetsTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        if self.targets.is_empty() {
            return Ok(());
        }

        let mut keep: BTreeSet<usize> = BTreeSet::new();
        for (id, vertex) in graph.vertices() {
            let Some(addr) = vertex.resource_addr() else {
                continue;
            };
            if self.targets.iter().any(|t| t.matches(addr)) {
                keep.insert(id);
            }
        }

        let targeted: Vec<usize> = keep.iter().copied().collect();
        for id in targeted {
            keep.extend(graph.descendants(id));
        }

        for id in graph.vertex_ids() {
            if !keep.contains(&id) {
                debug!(vertex = %graph.vertex_name(id), "pruning untargeted vertex");
                graph.remove_vertex(id);
            }
        }
        Ok(())
    }
}
