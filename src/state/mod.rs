//! State and diff models.
//!
//! The state is the authoritative in-memory record of what the engine last
//! observed about each resource instance; the diff mirrors it at planning
//! time with per-instance change intent. Both are plain serializable
//! values; callers own persistence. During a walk both are shared behind
//! read-write locks, with writes confined to the plan/apply leaves.

mod diff;
mod tree;

use std::sync::{Arc, RwLock};

pub use diff::{AttrDiff, ChangeKind, Diff, InstanceDiff, ModuleDiff, compute_instance_diff};
pub use tree::{InstanceState, ModuleState, ResourceState, State};

/// State shared across a walk, behind its read-write lock.
pub type SharedState = Arc<RwLock<State>>;

/// Diff shared across a walk, behind its read-write lock.
pub type SharedDiff = Arc<RwLock<Diff>>;

/// Wraps a state value for sharing across a walk.
#[must_use]
pub fn shared_state(state: State) -> SharedState {
    Arc::new(RwLock::new(state))
}

/// Wraps a diff value for sharing across a walk.
#[must_use]
pub fn shared_diff(diff: Diff) -> SharedDiff {
    Arc::new(RwLock::new(diff))
}
