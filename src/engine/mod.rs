//! The runtime: evaluation contexts, the walker, hooks, and the engine
//! facade that ties building and walking together.

mod context;
mod core;
mod hook;
mod stop;
mod walker;

pub use context::{EvalContext, SharedProviderInput, WalkShared};
pub use core::{ApplyReport, Engine, Plan, RefreshReport};
pub use hook::{CountHook, Hook, HookAction};
pub use stop::{StopHandle, StopSignal};
pub use walker::EngineWalker;
