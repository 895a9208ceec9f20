//! Value model, expression representation, and scope resolution.
//!
//! The full configuration language lives outside the engine; what the
//! engine needs is a typed value model, a minimal expression tree that can
//! carry literals and references, and a scope that resolves those
//! references against variables, locals, state, and engine metadata.

mod expr;
mod scope;
mod shim;
mod value;

pub use expr::{Body, Expr, references_in_body, references_in_expr};
pub use scope::{Scope, ScopeData};
pub use shim::{UNKNOWN_FLAT_VALUE, flatten_value, unflatten_attrs};
pub use value::Value;
