//! In-memory configuration model.
//!
//! The engine consumes configuration as an already-loaded tree of module
//! nodes; parsing configuration text is a caller concern. The types here
//! carry exactly what graph construction needs: resources, provider
//! blocks, module calls with provider pass-through, variables, outputs,
//! and locals.

mod schema;
mod tree;

pub use schema::{AttrSchema, AttrType, BlockSchema};
pub use tree::{
    ConfigTree, Module, ModuleCall, OutputConfig, ProviderConfigBlock, ProvisionerConfig,
    ResourceConfig, VariableConfig,
};

pub(crate) use tree::provider_type_for;
