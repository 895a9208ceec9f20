//! Graph transformers: composable rewriting stages.
//!
//! A transformer mutates one graph in place; a builder runs an ordered
//! list of them, failing fast on the first error. Every intermediate
//! shape is a valid graph, so failures stay local to the stage that
//! produced them.

mod attach;
mod config;
mod destroy;
mod diff;
mod module;
mod provider;
mod reference;
mod root;
mod state;
mod targets;

pub use attach::{AttachResourceConfigTransformer, AttachStateTransformer};
pub use config::ConfigTransformer;
pub use destroy::{CBDEdgeTransformer, DestroyEdgeTransformer};
pub use diff::DiffTransformer;
pub use module::{
    CountBoundaryTransformer, LocalTransformer, ModuleVariableTransformer,
    OrphanOutputTransformer, OutputTransformer, RemovedModuleTransformer,
    RootVariableTransformer,
};
pub use provider::{
    CloseProviderTransformer, MissingProviderTransformer, ParentProviderTransformer,
    ProviderConfigTransformer, ProviderTransformer, PruneProviderTransformer, close_providers,
    transform_providers,
};
pub use reference::ReferenceTransformer;
pub use root::{RootTransformer, TransitiveReductionTransformer};
pub use state::{OrphanResourceTransformer, StateTransformer};
pub use targets::TargetsTransformer;

use crate::error::Result;

use super::EngineGraph;

/// One stage of the graph-building pipeline.
pub trait GraphTransformer: Send + Sync {
    /// A stable name for trace logging.
    fn name(&self) -> &'static str;

    /// Rewrites the graph in place.
    fn transform(&self, graph: &mut EngineGraph) -> Result<()>;
}

/// Runs a list of transformers as one stage.
pub struct MultiTransformer(pub Vec<Box<dyn GraphTransformer>>);

impl GraphTransformer for MultiTransformer {
    fn name(&self) -> &'static str {
        "MultiTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        for inner in &self.0 {
            tracing::trace!(transformer = inner.name(), "running nested transformer");
            inner.transform(graph)?;
        }
        Ok(())
    }
}

/// Runs a transformer only when the condition held at build time.
pub struct ConditionalTransformer {
    /// Whether the inner transformer runs.
    pub enabled: bool,
    /// The guarded transformer.
    pub inner: Box<dyn GraphTransformer>,
}

impl GraphTransformer for ConditionalTransformer {
    fn name(&self) -> &'static str {
        "ConditionalTransformer"
    }

    fn transform(&self, graph: &mut EngineGraph) -> Result<()> {
        if self.enabled {
            self.inner.transform(graph)?;
        }
        Ok(())
    }
}
