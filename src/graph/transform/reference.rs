//! Connects reference edges between vertices.

use std::collections::HashMap;

use tracing::trace;

use crate::dag::{Edge, VertexId};
use crate::error::{Result, SkeinError};
use crate::graph::EngineGraph;
use crate::graph::node::GraphNode;

use super::GraphTransformer;

/// Adds an edge from every referencing vertex to each vertex its
/// references resolve to, so evaluation order follows data flow.
///
/// A reference that resolves to nothing in the graph is normal outside
/// validation (the referent may live only in state, or not participate in
/// this operation). The validate builder sets `fatal_unresolved`, where
/// every configured object is present and a dangling reference means the
/// configuration names something that does not exist.
pub struct ReferenceTransformer {
    /// Treat unresolved references as a fatal resolution error.
    pub fatal_unresolved: bool,
}

impl GraphTransformer for ReferenceTransformer {
    fn name(&self) -> &'static str {
        "ReferenceTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        let mut map: HashMap<(String, String), Vec<VertexId>> = HashMap::new();
        for (id, vertex) in graph.vertices() {
            for (module, key) in vertex.referenceable_addrs() {
                map.entry((module.to_string(), key)).or_default().push(id);
            }
        }

        let mut missing: Vec<String> = Vec::new();
        for id in graph.vertex_ids() {
            let Some(vertex) = graph.vertex(id) else {
                continue;
            };
            let name = graph.vertex_name(id);
            for (module, reference) in vertex.references() {
                if GraphNode::reference_may_be_dynamic(&reference.subject) {
                    continue;
                }
                let key = (module.to_string(), reference.subject.map_key());
                match map.get(&key) {
                    Some(targets) => {
                        for target in targets {
                            if *target == id {
                                continue;
                            }
                            trace!(from = %name, to = %key.1, "adding reference edge");
                            graph.connect(Edge::new(id, *target));
                        }
                    }
                    None if self.fatal_unresolved => {
                        missing.push(format!(
                            "{name}: reference to undeclared object {:?}",
                            reference.to_string()
                        ));
                    }
                    None => {
                        trace!(from = %name, to = %key.1, "reference has no vertex in this graph");
                    }
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(SkeinError::Resolution {
                message: missing.join("\n"),
                consumer: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ModulePath, Resource};
    use crate::config::ResourceConfig;
    use crate::graph::node::ResourceForm;
    use crate::lang::Expr;

    fn vertex_for(config: ResourceConfig) -> GraphNode {
        let addr = config.addr().absolute(ModulePath::root());
        GraphNode::Resource {
            addr,
            form: ResourceForm::Plan,
            config: Some(config),
            state: Vec::new(),
            resolved_provider: None,
        }
    }

    #[test]
    fn test_reference_edges_follow_data_flow() {
        let mut graph = EngineGraph::new();
        let a = graph.add_vertex(vertex_for(ResourceConfig::managed("p_thing", "a")));
        let b = graph.add_vertex(vertex_for(
            ResourceConfig::managed("p_thing", "b")
                .with_attr("peer", Expr::parse_ref("p_thing.a.id").expect("ref")),
        ));
        ReferenceTransformer {
            fatal_unresolved: false,
        }
        .transform(&mut graph)
        .expect("transform");
        assert!(graph.down_edges(b).contains(&a));
        assert!(graph.down_edges(a).is_empty());
    }

    #[test]
    fn test_unresolved_is_fatal_only_when_asked() {
        let mut graph = EngineGraph::new();
        graph.add_vertex(vertex_for(
            ResourceConfig::managed("p_thing", "b")
                .with_attr("peer", Expr::parse_ref("p_thing.ghost.id").expect("ref")),
        ));

        ReferenceTransformer {
            fatal_unresolved: false,
        }
        .transform(&mut graph)
        .expect("lenient mode tolerates it");

        let err = ReferenceTransformer {
            fatal_unresolved: true,
        }
        .transform(&mut graph)
        .expect_err("fatal mode rejects it");
        assert!(err.to_string().contains("p_thing.ghost"));
    }

    #[test]
    fn test_cycle_from_mutual_references_is_reported() {
        let mut graph = EngineGraph::new();
        graph.add_vertex(vertex_for(
            ResourceConfig::managed("p_thing", "a")
                .with_attr("peer", Expr::parse_ref("p_thing.b.id").expect("ref")),
        ));
        graph.add_vertex(vertex_for(
            ResourceConfig::managed("p_thing", "b")
                .with_attr("peer", Expr::parse_ref("p_thing.a.id").expect("ref")),
        ));
        ReferenceTransformer {
            fatal_unresolved: false,
        }
        .transform(&mut graph)
        .expect("edges connect");

        let err = graph.validate().expect_err("cycle");
        let rendered = err.to_string();
        assert!(rendered.contains("p_thing.a"));
        assert!(rendered.contains("p_thing.b"));
    }
}
