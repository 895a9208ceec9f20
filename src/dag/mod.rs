//! Generic directed acyclic graph kernel.
//!
//! The graph stores vertices behind stable ids with edges pointing from
//! dependent to dependency. The walk driver visits dependencies before
//! dependents, runs independent vertices concurrently under a bounded
//! semaphore, and admits ready siblings in name order so runs are
//! deterministic at parallelism 1.

mod graph;
mod walk;

pub use graph::{Edge, Graph, Vertex, VertexId};
pub use walk::{GraphVisitor, VisitOutcome, WalkReport};
