//! Typed addresses for modules, resources, providers, and references.
//!
//! Every addressable object has a canonical string form produced by its
//! `Display` implementation. That string is the sole identity used for map
//! keys throughout the engine; structural equality of the address values is
//! never relied upon for lookups.

mod module;
mod provider;
mod reference;
mod resource;

pub use module::{InstanceKey, ModulePath, ModuleStep};
pub use provider::{AbsProviderConfig, ProviderConfig};
pub use reference::{Reference, Referenceable};
pub use resource::{AbsResource, Resource, ResourceMode, TargetAddr};
