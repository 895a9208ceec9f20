//! The configuration tree: modules, resources, providers, and calls.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::addrs::{ModulePath, ProviderConfig, Reference, Resource, ResourceMode};
use crate::lang::{Body, Expr, Value, references_in_body, references_in_expr};

/// A rooted tree of module configurations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigTree {
    /// The module at this point in the tree.
    pub module: Module,
    /// Child module configurations, keyed by call name.
    pub children: BTreeMap<String, ConfigTree>,
}

impl ConfigTree {
    /// Creates a tree with the given root module and no children.
    #[must_use]
    pub fn new(module: Module) -> Self {
        Self {
            module,
            children: BTreeMap::new(),
        }
    }

    /// Adds a child module configuration under the given call name.
    #[must_use]
    pub fn with_child(mut self, name: impl Into<String>, child: Self) -> Self {
        self.children.insert(name.into(), child);
        self
    }

    /// Looks up the configuration node for a module instance path,
    /// ignoring instance keys (configuration is shared across instances
    /// of a call).
    #[must_use]
    pub fn descendant(&self, path: &ModulePath) -> Option<&Self> {
        let mut current = self;
        for step in path.steps() {
            current = current.children.get(&step.name)?;
        }
        Some(current)
    }

    /// Visits every module in the tree, parents before children, passing
    /// the instance path of each (unkeyed, one instance per call).
    pub fn visit<F: FnMut(&ModulePath, &Self)>(&self, f: &mut F) {
        fn walk<F: FnMut(&ModulePath, &ConfigTree)>(
            tree: &ConfigTree,
            path: &ModulePath,
            f: &mut F,
        ) {
            f(path, tree);
            for (name, child) in &tree.children {
                walk(child, &path.child(name.clone(), None), f);
            }
        }
        walk(self, &ModulePath::root(), f);
    }
}

/// A single module's configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Module {
    /// Input variables, keyed by name.
    pub variables: BTreeMap<String, VariableConfig>,
    /// Local values, keyed by name.
    pub locals: BTreeMap<String, Expr>,
    /// Output values, keyed by name.
    pub outputs: BTreeMap<String, OutputConfig>,
    /// Managed resources, keyed by `type.name`.
    pub managed: BTreeMap<String, ResourceConfig>,
    /// Data sources, keyed by `type.name`.
    pub data: BTreeMap<String, ResourceConfig>,
    /// Provider configuration blocks, keyed by `type` or `type.alias`.
    pub provider_configs: BTreeMap<String, ProviderConfigBlock>,
    /// Child module calls, keyed by call name.
    pub module_calls: BTreeMap<String, ModuleCall>,
}

impl Module {
    /// Creates an empty module.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource (managed or data) to the module.
    #[must_use]
    pub fn with_resource(mut self, resource: ResourceConfig) -> Self {
        let key = resource.addr().to_string();
        match resource.mode {
            ResourceMode::Managed => {
                self.managed.insert(key, resource);
            }
            ResourceMode::Data => {
                self.data.insert(key, resource);
            }
        }
        self
    }

    /// Adds a provider configuration block.
    #[must_use]
    pub fn with_provider(mut self, block: ProviderConfigBlock) -> Self {
        self.provider_configs.insert(block.addr_key(), block);
        self
    }

    /// Declares an input variable.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, default: Option<Value>) -> Self {
        self.variables.insert(name.into(), VariableConfig { default });
        self
    }

    /// Declares a local value.
    #[must_use]
    pub fn with_local(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.locals.insert(name.into(), expr);
        self
    }

    /// Declares an output value.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.outputs.insert(name.into(), OutputConfig { expr });
        self
    }

    /// Adds a child module call.
    #[must_use]
    pub fn with_module_call(mut self, call: ModuleCall) -> Self {
        self.module_calls.insert(call.name.clone(), call);
        self
    }

    /// Iterates over all resources, managed first, in key order.
    pub fn resources(&self) -> impl Iterator<Item = &ResourceConfig> {
        self.managed.values().chain(self.data.values())
    }
}

/// Configuration of one input variable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableConfig {
    /// Default value used when the caller provides none.
    pub default: Option<Value>,
}

/// Configuration of one output value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// The expression whose value the output exposes.
    pub expr: Expr,
}

/// A provisioner usage attached to a managed resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    /// Provisioner type name.
    pub type_name: String,
    /// Configuration body.
    pub body: Body,
}

/// Configuration of a single resource or data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Managed or data.
    pub mode: ResourceMode,
    /// Resource type name.
    pub type_name: String,
    /// Configuration-local name.
    pub name: String,
    /// Attribute expressions.
    pub body: Body,
    /// Explicit provider selection (`provider = p.west`), if any.
    pub provider: Option<ProviderConfig>,
    /// Instance count expression, if any.
    pub count: Option<Expr>,
    /// Explicitly declared dependencies.
    pub depends_on: Vec<Reference>,
    /// Provisioners to run after creation.
    pub provisioners: Vec<ProvisionerConfig>,
    /// Replace by creating the new instance before destroying the old.
    pub create_before_destroy: bool,
}

impl ResourceConfig {
    /// Creates a managed resource with an empty body.
    #[must_use]
    pub fn managed(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceMode::Managed, type_name, name)
    }

    /// Creates a data source with an empty body.
    #[must_use]
    pub fn data(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceMode::Data, type_name, name)
    }

    fn new(mode: ResourceMode, type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode,
            type_name: type_name.into(),
            name: name.into(),
            body: Body::new(),
            provider: None,
            count: None,
            depends_on: Vec::new(),
            provisioners: Vec::new(),
            create_before_destroy: false,
        }
    }

    /// Sets the attribute body.
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Sets a single attribute expression.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.body.insert(name.into(), expr);
        self
    }

    /// Selects an explicit provider configuration.
    #[must_use]
    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sets the instance count expression.
    #[must_use]
    pub fn with_count(mut self, count: Expr) -> Self {
        self.count = Some(count);
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn with_depends_on(mut self, reference: Reference) -> Self {
        self.depends_on.push(reference);
        self
    }

    /// Adds a provisioner usage.
    #[must_use]
    pub fn with_provisioner(mut self, provisioner: ProvisionerConfig) -> Self {
        self.provisioners.push(provisioner);
        self
    }

    /// Enables create-before-destroy replacement.
    #[must_use]
    pub const fn with_create_before_destroy(mut self) -> Self {
        self.create_before_destroy = true;
        self
    }

    /// The module-relative address of this resource.
    #[must_use]
    pub fn addr(&self) -> Resource {
        Resource {
            mode: self.mode,
            type_name: self.type_name.clone(),
            name: self.name.clone(),
        }
    }

    /// The module-relative provider configuration this resource selects:
    /// the explicit `provider` argument if present, otherwise the default
    /// configuration for the type's provider prefix.
    #[must_use]
    pub fn provider_config_addr(&self) -> ProviderConfig {
        match &self.provider {
            Some(provider) => provider.clone(),
            None => ProviderConfig::default_for(provider_type_for(&self.type_name)),
        }
    }

    /// All references this resource makes: explicit `depends_on`, the
    /// count expression, the body, and provisioner bodies.
    #[must_use]
    pub fn references(&self) -> Vec<Reference> {
        let mut refs = self.depends_on.clone();
        if let Some(count) = &self.count {
            refs.extend(references_in_expr(count));
        }
        refs.extend(references_in_body(&self.body));
        for provisioner in &self.provisioners {
            refs.extend(references_in_body(&provisioner.body));
        }
        refs
    }
}

/// Derives a provider type name from a resource type name: the prefix
/// before the first underscore, or the whole name if there is none.
#[must_use]
pub(crate) fn provider_type_for(resource_type: &str) -> &str {
    resource_type
        .split_once('_')
        .map_or(resource_type, |(prefix, _)| prefix)
}

/// A provider configuration block within a module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfigBlock {
    /// Provider type name.
    pub type_name: String,
    /// Alias, for non-default configurations.
    pub alias: Option<String>,
    /// Attribute expressions.
    pub body: Body,
}

impl ProviderConfigBlock {
    /// Creates an empty default configuration block.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            alias: None,
            body: Body::new(),
        }
    }

    /// Sets the alias.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Sets a single attribute expression.
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.body.insert(name.into(), expr);
        self
    }

    /// The module-relative address of this block.
    #[must_use]
    pub fn addr(&self) -> ProviderConfig {
        ProviderConfig {
            type_name: self.type_name.clone(),
            alias: self.alias.clone(),
        }
    }

    /// The key this block is stored under within its module: `type` or
    /// `type.alias`.
    #[must_use]
    pub fn addr_key(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{}.{alias}", self.type_name),
            None => self.type_name.clone(),
        }
    }

    /// A block is proxyable when its body is entirely empty: it stands in
    /// for a configuration passed down from the parent module.
    #[must_use]
    pub fn is_proxyable(&self) -> bool {
        self.body.is_empty()
    }
}

/// A child module call within a parent module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleCall {
    /// Call name (the child's address step).
    pub name: String,
    /// Input argument expressions, evaluated in the parent's scope.
    pub arguments: BTreeMap<String, Expr>,
    /// Provider pass-through: child-local provider name → parent-local
    /// provider name (`p` or `p.west` on either side).
    pub providers: BTreeMap<String, String>,
}

impl ModuleCall {
    /// Creates a call with no arguments or provider pass-through.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: BTreeMap::new(),
            providers: BTreeMap::new(),
        }
    }

    /// Sets one input argument expression.
    #[must_use]
    pub fn with_argument(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.arguments.insert(name.into(), expr);
        self
    }

    /// Passes a parent provider configuration through to the child under
    /// the given child-local name.
    #[must_use]
    pub fn with_provider(
        mut self,
        child_name: impl Into<String>,
        parent_name: impl Into<String>,
    ) -> Self {
        self.providers.insert(child_name.into(), parent_name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_prefix() {
        assert_eq!(provider_type_for("p_thing"), "p");
        assert_eq!(provider_type_for("aws_instance"), "aws");
        assert_eq!(provider_type_for("noprefix"), "noprefix");
    }

    #[test]
    fn test_resource_provider_config_addr() {
        let implicit = ResourceConfig::managed("p_thing", "a");
        assert_eq!(implicit.provider_config_addr().to_string(), "provider.p");

        let explicit = ResourceConfig::managed("p_thing", "a")
            .with_provider(ProviderConfig::aliased("p", "west"));
        assert_eq!(
            explicit.provider_config_addr().to_string(),
            "provider.p.west"
        );
    }

    #[test]
    fn test_proxyable_classification() {
        let empty = ProviderConfigBlock::new("p");
        assert!(empty.is_proxyable());
        let configured = ProviderConfigBlock::new("p").with_attr("region", Expr::lit("x"));
        assert!(!configured.is_proxyable());
    }

    #[test]
    fn test_descendant_lookup() {
        let tree = ConfigTree::new(Module::new())
            .with_child("m", ConfigTree::new(Module::new()).with_child("n", ConfigTree::default()));
        let path = ModulePath::root().child("m", None).child("n", None);
        assert!(tree.descendant(&path).is_some());
        let missing = ModulePath::root().child("x", None);
        assert!(tree.descendant(&missing).is_none());
    }

    #[test]
    fn test_resource_references_collects_all() {
        let resource = ResourceConfig::managed("p_thing", "b")
            .with_attr("peer", Expr::parse_ref("p_thing.a.id").expect("ref"))
            .with_count(Expr::parse_ref("var.n").expect("ref"))
            .with_depends_on(Reference::parse("p_thing.c").expect("ref"));
        let keys: Vec<_> = resource
            .references()
            .iter()
            .map(|r| r.subject.map_key())
            .collect();
        assert_eq!(keys, vec!["p_thing.c", "var.n", "p_thing.a"]);
    }
}
