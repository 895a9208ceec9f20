//! Graph construction: vertex types, transformers, and builders.
//!
//! A build produces a validated dependency graph from configuration,
//! prior state, and/or a computed diff by running an ordered sequence of
//! graph transformers. The vertex type is a tagged union; capability
//! checks the transformers rely on are O(1) accessor methods on it.

pub mod builder;
pub mod node;
pub mod transform;

pub use builder::{
    ApplyGraphBuilder, BasicGraphBuilder, GraphBuilder, PlanDestroyGraphBuilder, PlanGraphBuilder,
    RefreshGraphBuilder, ValidateGraphBuilder,
};
pub use node::{GraphNode, ProviderForm, ResourceForm};

/// The concrete graph type used throughout the engine.
pub type EngineGraph = crate::dag::Graph<GraphNode>;
