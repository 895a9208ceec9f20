//! Seeds the graph with one resource vertex per configured resource.

use std::sync::Arc;

use tracing::trace;

use crate::config::ConfigTree;
use crate::error::Result;
use crate::graph::node::{GraphNode, ResourceForm};
use crate::graph::EngineGraph;

use super::GraphTransformer;

/// Adds an abstract resource vertex for every resource declared anywhere
/// in the configuration tree, in the concrete form the builder chose.
pub struct ConfigTransformer {
    /// The configuration tree to seed from.
    pub config: Arc<ConfigTree>,
    /// Concrete form for the created vertices.
    pub form: ResourceForm,
    /// Seed only data sources. The refresh builder uses this because its
    /// managed resources come from state.
    pub data_only: bool,
}

impl GraphTransformer for ConfigTransformer {
    fn name(&self) -> &'static str {
        "ConfigTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        self.config.visit(&mut |path, tree| {
            for resource in tree.module.resources() {
                if self.data_only && resource.mode == crate::addrs::ResourceMode::Managed {
                    continue;
                }
                let addr = resource.addr().absolute(path.clone());
                trace!(resource = %addr, "adding resource vertex from config");
                graph.add_vertex(GraphNode::Resource {
                    addr,
                    form: self.form,
                    config: None,
                    state: Vec::new(),
                    resolved_provider: None,
                });
            }
        });
        Ok(())
    }
}
