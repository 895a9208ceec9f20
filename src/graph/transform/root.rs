//! Final structural transformers: the synthetic root and transitive
//! reduction.

use crate::dag::Edge;
use crate::error::Result;
use crate::graph::EngineGraph;
use crate::graph::node::GraphNode;

use super::GraphTransformer;

/// Adds the single synthetic root vertex, depending on every vertex that
/// currently has no consumer, so the finished graph has exactly one
/// vertex with no incoming edges.
pub struct RootTransformer;

impl GraphTransformer for RootTransformer {
    fn name(&self) -> &'static str {
        "RootTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        let sinks: Vec<usize> = graph
            .vertex_ids()
            .into_iter()
            .filter(|id| graph.up_edges(*id).is_empty())
            .collect();
        let root = graph.add_vertex(GraphNode::Root);
        for sink in sinks {
            graph.connect(Edge::new(root, sink));
        }
        Ok(())
    }
}

/// Drops edges already implied by longer paths. Purely an optimization;
/// reachability is unchanged.
pub struct TransitiveReductionTransformer;

impl GraphTransformer for TransitiveReductionTransformer {
    fn name(&self) -> &'static str {
        "TransitiveReductionTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        graph.transitive_reduction();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ModulePath, Resource};
    use crate::graph::node::ResourceForm;

    fn resource(name: &str) -> GraphNode {
        GraphNode::Resource {
            addr: Resource::managed("p_thing", name).absolute(ModulePath::root()),
            form: ResourceForm::Plan,
            config: None,
            state: Vec::new(),
            resolved_provider: None,
        }
    }

    #[test]
    fn test_root_becomes_single_entry() {
        let mut graph = EngineGraph::new();
        let a = graph.add_vertex(resource("a"));
        let b = graph.add_vertex(resource("b"));
        graph.connect(Edge::new(b, a));

        RootTransformer.transform(&mut graph).expect("transform");
        graph.validate().expect("single root, acyclic");

        let roots: Vec<usize> = graph
            .vertex_ids()
            .into_iter()
            .filter(|id| graph.up_edges(*id).is_empty())
            .collect();
        assert_eq!(roots.len(), 1);
        assert!(matches!(graph.vertex(roots[0]), Some(GraphNode::Root)));
    }
}
