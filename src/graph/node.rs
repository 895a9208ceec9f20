//! The graph vertex type and its capability accessors.

use crate::addrs::{
    AbsProviderConfig, AbsResource, ModulePath, Reference, Referenceable, ResourceMode,
};
use crate::config::{OutputConfig, ProviderConfigBlock, ResourceConfig};
use crate::dag::{Vertex, VertexId};
use crate::lang::Expr;
use crate::state::ResourceState;

/// Which operation family a concrete provider vertex was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderForm {
    /// Placeholder added before a builder chose concrete forms.
    Abstract,
    /// Provider evaluated during planning walks.
    Plan,
    /// Provider evaluated during apply walks.
    Apply,
}

/// Which operation a concrete resource vertex was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceForm {
    /// Placeholder added by the seed transformers.
    Abstract,
    /// Validates configuration only.
    Validate,
    /// Refreshes recorded state from the remote system.
    Refresh,
    /// Plans creation or update.
    Plan,
    /// Plans destruction.
    PlanDestroy,
    /// Applies creation or update changes.
    Apply,
    /// Applies destruction changes.
    Destroy,
}

/// A graph vertex.
#[derive(Debug, Clone)]
pub enum GraphNode {
    /// A provider configuration.
    Provider {
        /// Absolute address of the configuration.
        addr: AbsProviderConfig,
        /// Operation family this vertex was built for.
        form: ProviderForm,
        /// The configuration block, once attached.
        config: Option<ProviderConfigBlock>,
    },
    /// A placeholder standing in for a provider configuration passed down
    /// from a parent module. Never survives into a walk.
    ProxyProvider {
        /// Address the proxy occupies in the child module.
        addr: AbsProviderConfig,
        /// The vertex this proxy forwards to (possibly another proxy).
        target: VertexId,
    },
    /// Shuts a provider plugin down after its last consumer.
    CloseProvider {
        /// Address of the provider being closed.
        addr: AbsProviderConfig,
    },
    /// A resource or data source.
    Resource {
        /// Base absolute address (no instance key).
        addr: AbsResource,
        /// Operation this vertex was built for.
        form: ResourceForm,
        /// Configuration, once attached. Destroy-only vertices may have
        /// none.
        config: Option<ResourceConfig>,
        /// Prior state entries for this resource, keyed by module-local
        /// address (instances of a counted resource appear separately).
        state: Vec<(String, ResourceState)>,
        /// The provider configuration the resolver chose.
        resolved_provider: Option<AbsProviderConfig>,
    },
    /// An output value of a module.
    Output {
        /// Module the output belongs to.
        module: ModulePath,
        /// Output name.
        name: String,
        /// Configuration, absent for orphaned outputs being removed.
        config: Option<OutputConfig>,
        /// Remove the recorded value instead of evaluating it.
        remove: bool,
    },
    /// A local value of a module.
    Local {
        /// Module the local belongs to.
        module: ModulePath,
        /// Local name.
        name: String,
        /// The local's expression.
        expr: Expr,
    },
    /// A root-module input variable; values are seeded by the caller, the
    /// vertex exists to be referenceable.
    RootVariable {
        /// Variable name.
        name: String,
    },
    /// An input variable of a child module, fed by the parent's call.
    ModuleVariable {
        /// The child module instance the variable belongs to.
        module: ModulePath,
        /// Variable name.
        name: String,
        /// Argument expression at the call site, evaluated in the parent
        /// scope.
        expr: Option<Expr>,
        /// Declared default, used when the call passes nothing.
        default: Option<crate::lang::Value>,
    },
    /// Cleans up the state of a module no longer present in config.
    ModuleRemoved {
        /// The module instance to clean up.
        module: ModulePath,
    },
    /// Fixes up state keys when resources gain or lose `count`.
    CountBoundary {
        /// (module, base local address, has count) per managed resource.
        fixups: Vec<(ModulePath, String, bool)>,
    },
    /// The synthetic root; depends on every sink so exactly one vertex
    /// has no consumers.
    Root,
}

impl GraphNode {
    /// The module instance this vertex evaluates within.
    #[must_use]
    pub fn path(&self) -> ModulePath {
        match self {
            Self::Provider { addr, .. } | Self::ProxyProvider { addr, .. } => addr.module.clone(),
            Self::CloseProvider { addr } => addr.module.clone(),
            Self::Resource { addr, .. } => addr.module.clone(),
            Self::Output { module, .. }
            | Self::Local { module, .. }
            | Self::ModuleRemoved { module } => module.clone(),
            // Module variables execute in the parent scope, where their
            // value expressions are written.
            Self::ModuleVariable { module, .. } => module.parent().unwrap_or_default(),
            Self::RootVariable { .. } | Self::CountBoundary { .. } | Self::Root => {
                ModulePath::root()
            }
        }
    }

    /// The provider configuration address, for provider-ish vertices
    /// (including proxies, which occupy an address until pruned).
    #[must_use]
    pub fn provider_addr(&self) -> Option<&AbsProviderConfig> {
        match self {
            Self::Provider { addr, .. } | Self::ProxyProvider { addr, .. } => Some(addr),
            _ => None,
        }
    }

    /// Returns true for proxy provider vertices.
    #[must_use]
    pub const fn is_proxy(&self) -> bool {
        matches!(self, Self::ProxyProvider { .. })
    }

    /// The provider configuration a consumer vertex wants, plus whether
    /// the address must be taken exactly (no inheritance walk).
    ///
    /// Configuration wins over state; an address recorded in state must
    /// match exactly so a resource is destroyed with the configuration
    /// that created it.
    #[must_use]
    pub fn provided_by(&self) -> Option<(AbsProviderConfig, bool)> {
        let Self::Resource {
            addr,
            config,
            state,
            ..
        } = self
        else {
            return None;
        };
        if let Some(config) = config {
            return Some((
                config.provider_config_addr().absolute(addr.module.clone()),
                false,
            ));
        }
        if let Some(recorded) = state
            .iter()
            .find_map(|(_, rs)| rs.provider.clone())
            .and_then(|s| AbsProviderConfig::parse(&s).ok())
        {
            return Some((recorded, true));
        }
        let type_prefix = crate::config::provider_type_for(&addr.resource.type_name);
        Some((
            crate::addrs::ProviderConfig::default_for(type_prefix).absolute(addr.module.clone()),
            false,
        ))
    }

    /// Records the provider configuration the resolver chose.
    pub fn set_provider(&mut self, provider: AbsProviderConfig) {
        if let Self::Resource {
            resolved_provider, ..
        } = self
        {
            *resolved_provider = Some(provider);
        }
    }

    /// The addresses other vertices may refer to this one by, each paired
    /// with the module scope the key is valid in.
    #[must_use]
    pub fn referenceable_addrs(&self) -> Vec<(ModulePath, String)> {
        match self {
            Self::Resource { addr, .. } => {
                vec![(addr.module.clone(), addr.resource.to_string())]
            }
            Self::Output { module, name, .. } => {
                // Outputs are referenced from the parent module as
                // `module.<call>.<name>`; root outputs have no referrers.
                let Some(parent) = module.parent() else {
                    return Vec::new();
                };
                let Some(step) = module.last_step() else {
                    return Vec::new();
                };
                vec![
                    (parent.clone(), format!("module.{}.{name}", step.name)),
                    (parent, format!("module.{}", step.name)),
                ]
            }
            Self::Local { module, name, .. } => vec![(module.clone(), format!("local.{name}"))],
            Self::RootVariable { name } => vec![(ModulePath::root(), format!("var.{name}"))],
            Self::ModuleVariable { module, name, .. } => {
                vec![(module.clone(), format!("var.{name}"))]
            }
            _ => Vec::new(),
        }
    }

    /// The references this vertex makes, each paired with the module
    /// scope it resolves in.
    #[must_use]
    pub fn references(&self) -> Vec<(ModulePath, Reference)> {
        match self {
            Self::Resource {
                addr,
                config,
                state,
                ..
            } => {
                if let Some(config) = config {
                    return config
                        .references()
                        .into_iter()
                        .map(|r| (addr.module.clone(), r))
                        .collect();
                }
                // Without configuration, fall back to the dependencies
                // recorded in state (destroy ordering for orphans).
                state
                    .iter()
                    .flat_map(|(_, rs)| rs.dependencies.iter())
                    .filter_map(|dep| Reference::parse(dep).ok())
                    .map(|r| (addr.module.clone(), r))
                    .collect()
            }
            Self::Output { module, config, .. } => config
                .as_ref()
                .map(|c| {
                    crate::lang::references_in_expr(&c.expr)
                        .into_iter()
                        .map(|r| (module.clone(), r))
                        .collect()
                })
                .unwrap_or_default(),
            Self::Local { module, expr, .. } => crate::lang::references_in_expr(expr)
                .into_iter()
                .map(|r| (module.clone(), r))
                .collect(),
            Self::ModuleVariable { module, expr, .. } => {
                // The argument expression evaluates at the call site.
                let Some(parent) = module.parent() else {
                    return Vec::new();
                };
                expr.as_ref()
                    .map(|e| {
                        crate::lang::references_in_expr(e)
                            .into_iter()
                            .map(|r| (parent.clone(), r))
                            .collect()
                    })
                    .unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }

    /// The resource address, for resource vertices.
    #[must_use]
    pub const fn resource_addr(&self) -> Option<&AbsResource> {
        match self {
            Self::Resource { addr, .. } => Some(addr),
            _ => None,
        }
    }

    /// The resource form, for resource vertices.
    #[must_use]
    pub const fn resource_form(&self) -> Option<ResourceForm> {
        match self {
            Self::Resource { form, .. } => Some(*form),
            _ => None,
        }
    }

    /// Attaches configuration to a resource vertex.
    pub fn attach_resource_config(&mut self, resource_config: ResourceConfig) {
        if let Self::Resource { config, .. } = self {
            *config = Some(resource_config);
        }
    }

    /// Attaches prior state entries to a resource vertex.
    pub fn attach_resource_state(&mut self, entries: Vec<(String, ResourceState)>) {
        if let Self::Resource { state, .. } = self {
            *state = entries;
        }
    }

    /// Attaches the configuration block to a provider vertex.
    pub fn attach_provider_config(&mut self, block: ProviderConfigBlock) {
        if let Self::Provider { config, .. } = self {
            *config = Some(block);
        }
    }

    /// Whether this reference subject could legitimately resolve to
    /// nothing at graph time (resources created in the same run, meta
    /// values bound at evaluation time).
    #[must_use]
    pub const fn reference_may_be_dynamic(subject: &Referenceable) -> bool {
        matches!(
            subject,
            Referenceable::PathAttr { .. }
                | Referenceable::EngineMeta { .. }
                | Referenceable::CountAttr { .. }
                | Referenceable::EachAttr { .. }
        )
    }

    /// Returns true for data source vertices.
    #[must_use]
    pub fn is_data_resource(&self) -> bool {
        matches!(
            self,
            Self::Resource { addr, .. } if addr.resource.mode == ResourceMode::Data
        )
    }
}

impl Vertex for GraphNode {
    fn name(&self) -> String {
        match self {
            Self::Provider { addr, .. } => addr.to_string(),
            Self::ProxyProvider { addr, .. } => format!("{addr} (proxy)"),
            Self::CloseProvider { addr } => format!("{addr} (close)"),
            Self::Resource { addr, form, .. } => match form {
                ResourceForm::Destroy | ResourceForm::PlanDestroy => {
                    format!("{addr} (destroy)")
                }
                _ => addr.to_string(),
            },
            Self::Output { module, name, .. } => {
                if module.is_root() {
                    format!("output.{name}")
                } else {
                    format!("{module}.output.{name}")
                }
            }
            Self::Local { module, name, .. } => {
                if module.is_root() {
                    format!("local.{name}")
                } else {
                    format!("{module}.local.{name}")
                }
            }
            Self::RootVariable { name } => format!("var.{name}"),
            Self::ModuleVariable { module, name, .. } => format!("{module}.var.{name}"),
            Self::ModuleRemoved { module } => format!("{module} (removed)"),
            Self::CountBoundary { .. } => String::from("meta.count-boundary (count fixup)"),
            Self::Root => String::from("root"),
        }
    }
}
