//! The evaluation tree algebra.
//!
//! Visiting a graph vertex means filtering its eval tree to the current
//! operation and executing it against the evaluation context. Trees are a
//! small algebra (`Sequence`, `OpFilter`, `Noop`, domain leaves); leaves
//! do the actual work and share intermediate values through a per-vertex
//! scratchpad.

mod exec;
mod node;
pub mod provider;
pub mod resource;
mod trees;
pub mod values;

pub use exec::{EvalError, EvalResult, EvalScratch, eval};
pub use node::{EvalLeaf, EvalNode, WalkOperation};
pub use trees::build_eval_tree;
