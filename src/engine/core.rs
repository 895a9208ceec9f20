//! The engine facade: builds a graph per operation and walks it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::addrs::{AbsResource, ModulePath, ProviderConfig, TargetAddr};
use crate::config::ConfigTree;
use crate::dag::WalkReport;
use crate::diag::Diagnostics;
use crate::error::{Result, SkeinError};
use crate::eval::WalkOperation;
use crate::graph::{
    ApplyGraphBuilder, EngineGraph, GraphBuilder, PlanDestroyGraphBuilder, PlanGraphBuilder,
    RefreshGraphBuilder, ValidateGraphBuilder,
};
use crate::lang::{ScopeData, Value, flatten_value};
use crate::provider::{ComponentFactory, UiInput};
use crate::state::{
    Diff, InstanceState, ResourceState, SharedDiff, SharedState, State, shared_diff, shared_state,
};

use super::hook::Hook;
use super::stop::{StopHandle, StopSignal};
use super::walker::EngineWalker;

/// Default bound on concurrent vertex evaluations.
const DEFAULT_PARALLELISM: usize = 8;

/// A computed plan: the diff plus everything needed to judge it.
#[derive(Debug)]
pub struct Plan {
    /// The planned changes.
    pub diff: Diff,
    /// True when this plan destroys everything it covers.
    pub destroy: bool,
    /// Diagnostics surfaced while planning.
    pub diagnostics: Diagnostics,
    /// False when any vertex failed; the diff may be partial.
    pub success: bool,
}

impl Plan {
    /// Returns true if the plan carries no actionable change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.diff.is_empty()
    }
}

/// Result of a refresh walk.
#[derive(Debug)]
pub struct RefreshReport {
    /// Diagnostics surfaced while refreshing.
    pub diagnostics: Diagnostics,
    /// False when any vertex failed.
    pub success: bool,
}

/// Result of an apply walk.
#[derive(Debug)]
pub struct ApplyReport {
    /// Diagnostics surfaced while applying.
    pub diagnostics: Diagnostics,
    /// False when any vertex failed; state reflects what completed.
    pub success: bool,
}

/// Drives the full lifecycle over one configuration and state: validate,
/// refresh, plan, and apply, each as a graph build plus a concurrent
/// walk. The engine owns the state for the duration of its walks.
pub struct Engine {
    config: Arc<ConfigTree>,
    state: State,
    variables: BTreeMap<String, Value>,
    components: Arc<dyn ComponentFactory>,
    hooks: Arc<Vec<Arc<dyn Hook>>>,
    ui_input: Option<Arc<dyn UiInput>>,
    targets: Vec<TargetAddr>,
    parallelism: usize,
    workspace: String,
    provider_input: super::context::SharedProviderInput,
    stop_handle: StopHandle,
    stop: StopSignal,
}

impl Engine {
    /// Creates an engine over a configuration tree and a plugin factory.
    #[must_use]
    pub fn new(config: ConfigTree, components: Arc<dyn ComponentFactory>) -> Self {
        let (stop_handle, stop) = StopHandle::new();
        Self {
            config: Arc::new(config),
            state: State::new(),
            variables: BTreeMap::new(),
            components,
            hooks: Arc::new(Vec::new()),
            ui_input: None,
            targets: Vec::new(),
            parallelism: DEFAULT_PARALLELISM,
            workspace: String::from("default"),
            provider_input: Arc::default(),
            stop_handle,
            stop,
        }
    }

    /// Starts from an existing state.
    #[must_use]
    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    /// Supplies one input variable value.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Restricts work to the given target.
    #[must_use]
    pub fn with_target(mut self, target: TargetAddr) -> Self {
        self.targets.push(target);
        self
    }

    /// Bounds concurrent vertex evaluations.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Registers a lifecycle hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        Arc::make_mut(&mut self.hooks).push(hook);
        self
    }

    /// Supplies a user-input source for the input walk.
    #[must_use]
    pub fn with_ui_input(mut self, input: Arc<dyn UiInput>) -> Self {
        self.ui_input = Some(input);
        self
    }

    /// Names the workspace exposed as `skein.workspace`.
    #[must_use]
    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = workspace.into();
        self
    }

    /// The current state.
    #[must_use]
    pub const fn state(&self) -> &State {
        &self.state
    }

    /// Asks every in-flight walk to wind down at its next suspension
    /// point. Partial results are kept.
    pub fn stop(&self) {
        info!("stop requested; walks will wind down");
        self.stop_handle.stop();
    }

    /// Resolves root variable values from supplied values and declared
    /// defaults. Missing required variables are a configuration error.
    fn resolve_root_variables(&self) -> Result<BTreeMap<String, Value>> {
        let mut resolved = BTreeMap::new();
        let mut missing = Vec::new();
        for (name, variable) in &self.config.module.variables {
            match self
                .variables
                .get(name)
                .cloned()
                .or_else(|| variable.default.clone())
            {
                Some(value) => {
                    resolved.insert(name.clone(), value);
                }
                None => missing.push(name.clone()),
            }
        }
        if missing.is_empty() {
            Ok(resolved)
        } else {
            Err(SkeinError::Config {
                message: format!(
                    "no value supplied for required variables: {}",
                    missing.join(", ")
                ),
                address: None,
            })
        }
    }

    /// Walks a built graph for one operation against the given shared
    /// state and diff, then tears down any plugins still running.
    async fn run_walk(
        &self,
        graph: &EngineGraph,
        operation: WalkOperation,
        state: SharedState,
        diff: SharedDiff,
    ) -> Result<WalkReport> {
        let scope_data = Arc::new(ScopeData::new(state.clone(), self.workspace.clone()));
        scope_data.merge_variables(&ModulePath::root(), self.resolve_root_variables()?);

        let walker = Arc::new(EngineWalker::new(
            operation,
            self.stop.clone(),
            Arc::clone(&self.components),
            Arc::clone(&self.hooks),
            self.ui_input.clone(),
            scope_data,
            state,
            diff,
            Arc::clone(&self.provider_input),
        ));
        info!(%operation, vertices = graph.len(), "starting graph walk");
        let report = graph.walk(Arc::clone(&walker), self.parallelism).await;
        walker.shared().shutdown().await;
        info!(
            %operation,
            visited = report.visited.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "graph walk finished"
        );
        Ok(report)
    }

    /// Validates the configuration without touching state, diff, or any
    /// remote object. All problems are collected into one bundle.
    pub async fn validate(&self) -> Result<Diagnostics> {
        let graph = ValidateGraphBuilder {
            config: Arc::clone(&self.config),
        }
        .build()?;

        // Validation runs against a throwaway copy so the walk cannot
        // leak side effects into the engine's state.
        let state = shared_state(self.state.clone());
        let diff = shared_diff(Diff::new());
        let report = self
            .run_walk(&graph, WalkOperation::Validate, state, diff)
            .await?;
        Ok(report.diagnostics)
    }

    /// Runs the provider input walk, memoizing answers for later walks
    /// within this engine.
    pub async fn input(&self) -> Result<Diagnostics> {
        let graph = PlanGraphBuilder {
            config: Arc::clone(&self.config),
            state: Arc::new(self.state.clone()),
            targets: self.targets.clone(),
        }
        .build()?;
        let state = shared_state(self.state.clone());
        let diff = shared_diff(Diff::new());
        let report = self
            .run_walk(&graph, WalkOperation::Input, state, diff)
            .await?;
        Ok(report.diagnostics)
    }

    /// Reconciles recorded state with remote reality.
    pub async fn refresh(&mut self) -> Result<RefreshReport> {
        let graph = RefreshGraphBuilder {
            config: Arc::clone(&self.config),
            state: Arc::new(self.state.clone()),
            targets: self.targets.clone(),
        }
        .build()?;

        let state = shared_state(self.state.clone());
        let diff = shared_diff(Diff::new());
        let report = self
            .run_walk(&graph, WalkOperation::Refresh, state.clone(), diff)
            .await?;

        let mut new_state = state.read().unwrap_or_else(|e| e.into_inner()).clone();
        new_state.prune();
        new_state.touch();
        self.state = new_state;

        Ok(RefreshReport {
            success: !report.has_failures(),
            diagnostics: report.diagnostics,
        })
    }

    /// Computes a plan: the minimal diff from recorded state to the
    /// desired configuration (or to nothing, for a destroy).
    pub async fn plan(&self, destroy: bool) -> Result<Plan> {
        let graph = if destroy {
            PlanDestroyGraphBuilder {
                config: Arc::clone(&self.config),
                state: Arc::new(self.state.clone()),
                targets: self.targets.clone(),
            }
            .build()?
        } else {
            PlanGraphBuilder {
                config: Arc::clone(&self.config),
                state: Arc::new(self.state.clone()),
                targets: self.targets.clone(),
            }
            .build()?
        };

        let operation = if destroy {
            WalkOperation::PlanDestroy
        } else {
            WalkOperation::Plan
        };

        // Planning evaluates against a throwaway state copy; only the
        // diff is kept.
        let state = shared_state(self.state.clone());
        let diff = shared_diff(Diff::new());
        let report = self
            .run_walk(&graph, operation, state, diff.clone())
            .await?;

        let computed = diff.read().unwrap_or_else(|e| e.into_inner()).clone();
        debug!(changes = computed.change_count(), "plan computed");
        Ok(Plan {
            diff: computed,
            destroy,
            success: !report.has_failures(),
            diagnostics: report.diagnostics,
        })
    }

    /// Applies a computed plan, updating the engine's state to what was
    /// actually achieved.
    pub async fn apply(&mut self, plan: &Plan) -> Result<ApplyReport> {
        let graph = ApplyGraphBuilder {
            config: Arc::clone(&self.config),
            diff: Arc::new(plan.diff.clone()),
            state: Arc::new(self.state.clone()),
            targets: self.targets.clone(),
            destroy: plan.destroy,
        }
        .build()?;

        let state = shared_state(self.state.clone());
        let diff = shared_diff(plan.diff.clone());
        let report = self
            .run_walk(&graph, WalkOperation::Apply, state.clone(), diff)
            .await?;

        let mut new_state = state.read().unwrap_or_else(|e| e.into_inner()).clone();
        new_state.prune();
        new_state.touch();
        self.state = new_state;

        Ok(ApplyReport {
            success: !report.has_failures(),
            diagnostics: report.diagnostics,
        })
    }

    /// Imports existing remote instances under a resource address,
    /// recording them in state without touching the remote objects.
    pub async fn import_resource(&mut self, addr: &str, id: &str) -> Result<usize> {
        let abs = AbsResource::parse(addr)?;
        let provider_type =
            crate::config::provider_type_for(&abs.resource.type_name).to_string();
        let provider_addr =
            ProviderConfig::default_for(provider_type.clone()).absolute(abs.module.clone());

        let provider = self
            .components
            .provider(&provider_type, &provider_addr.to_string())
            .await?;
        let (values, diags) = provider
            .import_resource_state(&abs.resource.type_name, id)
            .await?;
        if diags.has_errors() {
            return Err(SkeinError::Validation(diags));
        }

        let module = self.state.module_mut(&abs.module);
        let mut imported = 0;
        for value in &values {
            if value.is_null() {
                continue;
            }
            let instance_id = value
                .as_map()
                .and_then(|m| m.get("id"))
                .and_then(Value::as_str)
                .unwrap_or(id)
                .to_string();
            let local_key = abs.local_string();
            module.resources.insert(
                local_key,
                ResourceState {
                    provider: Some(provider_addr.to_string()),
                    dependencies: Vec::new(),
                    primary: Some(InstanceState::new(instance_id, flatten_value(value))),
                    deposed: BTreeMap::new(),
                },
            );
            imported += 1;
        }
        if imported > 0 {
            self.state.touch();
        }
        info!(resource = %abs, count = imported, "imported instances");
        Ok(imported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AttrSchema, AttrType, BlockSchema, Module, ModuleCall, ProviderConfigBlock,
        ResourceConfig,
    };
    use crate::engine::hook::CountHook;
    use crate::lang::Expr;
    use crate::provider::ProviderSchema;
    use crate::provider::mock::{MockFactory, MockProvider};
    use crate::state::ChangeKind;

    fn thing_schema() -> ProviderSchema {
        ProviderSchema {
            provider: BlockSchema::new()
                .with_attr("region", AttrSchema::optional(AttrType::String)),
            resource_types: BTreeMap::from([(
                String::from("p_thing"),
                BlockSchema::new()
                    .with_attr("name", AttrSchema::required(AttrType::String))
                    .with_attr("peer", AttrSchema::optional(AttrType::String))
                    .with_attr("id", AttrSchema::computed(AttrType::String)),
            )]),
            data_sources: BTreeMap::from([(
                String::from("p_info"),
                BlockSchema::new()
                    .with_attr("filter", AttrSchema::optional(AttrType::String))
                    .with_attr("id", AttrSchema::computed(AttrType::String)),
            )]),
        }
    }

    fn engine_with(config: ConfigTree) -> (Engine, Arc<MockProvider>) {
        let provider = Arc::new(MockProvider::new(thing_schema()));
        let factory = MockFactory::new().with_provider("p", Arc::clone(&provider));
        (Engine::new(config, Arc::new(factory)), provider)
    }

    fn single_resource_config() -> ConfigTree {
        ConfigTree::new(
            Module::new()
                .with_provider(ProviderConfigBlock::new("p"))
                .with_resource(
                    ResourceConfig::managed("p_thing", "a").with_attr("name", Expr::lit("web")),
                ),
        )
    }

    #[tokio::test]
    async fn test_plan_apply_then_empty_plan() {
        let (mut engine, provider) = engine_with(single_resource_config());

        let plan = engine.plan(false).await.expect("plan");
        assert!(plan.success, "{}", plan.diagnostics);
        assert_eq!(plan.diff.change_count(), 1);

        let report = engine.apply(&plan).await.expect("apply");
        assert!(report.success, "{}", report.diagnostics);
        assert!(provider.calls().iter().any(|c| c == "apply:p_thing"));

        let module = engine.state().module(&ModulePath::root()).expect("module");
        let resource = module.resources.get("p_thing.a").expect("resource state");
        let instance = resource.primary.as_ref().expect("instance");
        assert!(!instance.id.is_empty());
        assert_eq!(
            instance.attributes.get("name").map(String::as_str),
            Some("web")
        );
        assert_eq!(
            resource.provider.as_deref(),
            Some("provider.p")
        );

        // Applying the plan converged the state: planning again is empty.
        let second = engine.plan(false).await.expect("second plan");
        assert!(second.is_empty(), "{:?}", second.diff);
    }

    #[tokio::test]
    async fn test_validate_is_side_effect_free() {
        let (engine, provider) = engine_with(single_resource_config());
        let serial_before = engine.state().serial;

        let diags = engine.validate().await.expect("validate");
        assert!(!diags.has_errors(), "{diags}");
        assert_eq!(engine.state().serial, serial_before);
        assert!(engine.state().is_empty());
        assert!(!provider.calls().iter().any(|c| c.starts_with("plan:")));
        assert!(!provider.calls().iter().any(|c| c.starts_with("apply:")));
    }

    #[tokio::test]
    async fn test_validate_collects_provider_reported_problems() {
        let provider = Arc::new(
            MockProvider::new(thing_schema()).with_validate_error("name is reserved"),
        );
        let factory = MockFactory::new().with_provider("p", Arc::clone(&provider));
        let engine = Engine::new(single_resource_config(), Arc::new(factory));

        let diags = engine.validate().await.expect("validate");
        assert!(diags.has_errors());
        assert!(diags.to_string().contains("name is reserved"));
    }

    #[tokio::test]
    async fn test_chain_applies_in_dependency_order() {
        let mut module = Module::new().with_provider(ProviderConfigBlock::new("p"));
        // d -> c -> b -> a reference chain.
        module = module.with_resource(
            ResourceConfig::managed("p_thing", "a").with_attr("name", Expr::lit("a")),
        );
        for (name, prev) in [("b", "a"), ("c", "b"), ("d", "c")] {
            module = module.with_resource(
                ResourceConfig::managed("p_thing", name)
                    .with_attr("name", Expr::lit(name))
                    .with_attr(
                        "peer",
                        Expr::parse_ref(&format!("p_thing.{prev}.id")).expect("ref"),
                    ),
            );
        }
        let (mut engine, _) = engine_with(ConfigTree::new(module));
        let hook = Arc::new(CountHook::new());
        engine = engine.with_hook(Arc::clone(&hook) as Arc<dyn Hook>).with_parallelism(4);

        let plan = engine.plan(false).await.expect("plan");
        assert_eq!(plan.diff.change_count(), 4);
        let report = engine.apply(&plan).await.expect("apply");
        assert!(report.success, "{}", report.diagnostics);

        assert_eq!(
            hook.applied(),
            vec!["p_thing.a", "p_thing.b", "p_thing.c", "p_thing.d"]
        );
        // A strict chain never overlaps.
        assert_eq!(hook.peak_concurrent(), 1);

        // Dependent attributes picked up the dependency's applied id.
        let module_state = engine.state().module(&ModulePath::root()).expect("module");
        let a_id = module_state.resources["p_thing.a"]
            .primary
            .as_ref()
            .expect("a")
            .id
            .clone();
        let b_peer = module_state.resources["p_thing.b"]
            .primary
            .as_ref()
            .expect("b")
            .attributes["peer"]
            .clone();
        assert_eq!(a_id, b_peer);
    }

    #[tokio::test]
    async fn test_independent_resources_apply_concurrently() {
        let mut module = Module::new().with_provider(ProviderConfigBlock::new("p"));
        for name in ["a", "b", "c", "d"] {
            module = module.with_resource(
                ResourceConfig::managed("p_thing", name).with_attr("name", Expr::lit(name)),
            );
        }
        let provider = Arc::new(MockProvider::new(thing_schema()).with_apply_delay_ms(20));
        let factory = MockFactory::new().with_provider("p", Arc::clone(&provider));
        let hook = Arc::new(CountHook::new());
        let mut engine = Engine::new(ConfigTree::new(module), Arc::new(factory))
            .with_hook(Arc::clone(&hook) as Arc<dyn Hook>)
            .with_parallelism(4);

        let plan = engine.plan(false).await.expect("plan");
        let report = engine.apply(&plan).await.expect("apply");
        assert!(report.success, "{}", report.diagnostics);
        assert_eq!(hook.post_apply_count(), 4);
        assert!(hook.peak_concurrent() >= 2, "applies never overlapped");
    }

    #[tokio::test]
    async fn test_module_inheritance_end_to_end() {
        let tree = ConfigTree::new(
            Module::new()
                .with_provider(
                    ProviderConfigBlock::new("p").with_attr("region", Expr::lit("west")),
                )
                .with_module_call(ModuleCall::new("m")),
        )
        .with_child(
            "m",
            ConfigTree::new(Module::new().with_resource(
                ResourceConfig::managed("p_thing", "a").with_attr("name", Expr::lit("nested")),
            )),
        );
        let provider = Arc::new(MockProvider::new(thing_schema()));
        let factory = MockFactory::new().with_provider("p", Arc::clone(&provider));
        let factory = Arc::new(factory);
        let mut engine = Engine::new(tree, Arc::clone(&factory) as Arc<dyn ComponentFactory>);

        let plan = engine.plan(false).await.expect("plan");
        assert!(plan.success, "{}", plan.diagnostics);
        let report = engine.apply(&plan).await.expect("apply");
        assert!(report.success, "{}", report.diagnostics);

        // One provider instance, started for the root configuration.
        assert_eq!(factory.provider_starts(), vec!["p@provider.p", "p@provider.p"]);
        let configured = provider.configured_with().expect("configured");
        assert_eq!(
            configured.as_map().and_then(|m| m.get("region")),
            Some(&Value::from("west"))
        );

        let child = ModulePath::root().child("m", None);
        let module_state = engine.state().module(&child).expect("child module state");
        let resource = module_state.resources.get("p_thing.a").expect("resource");
        assert_eq!(resource.provider.as_deref(), Some("provider.p"));
    }

    #[tokio::test]
    async fn test_destroy_plan_and_apply_empties_state() {
        let (mut engine, _) = engine_with(single_resource_config());
        let plan = engine.plan(false).await.expect("plan");
        engine.apply(&plan).await.expect("apply");
        assert!(!engine.state().is_empty());

        let destroy_plan = engine.plan(true).await.expect("destroy plan");
        assert!(destroy_plan.destroy);
        assert_eq!(destroy_plan.diff.change_count(), 1);
        let report = engine.apply(&destroy_plan).await.expect("destroy apply");
        assert!(report.success, "{}", report.diagnostics);
        assert!(engine.state().is_empty());
    }

    #[tokio::test]
    async fn test_count_creates_keyed_instances() {
        let config = ConfigTree::new(
            Module::new()
                .with_provider(ProviderConfigBlock::new("p"))
                .with_resource(
                    ResourceConfig::managed("p_thing", "a")
                        .with_attr("name", Expr::lit("web"))
                        .with_count(Expr::lit(2_i64)),
                ),
        );
        let (mut engine, _) = engine_with(config);
        let plan = engine.plan(false).await.expect("plan");
        assert_eq!(plan.diff.change_count(), 2);
        let report = engine.apply(&plan).await.expect("apply");
        assert!(report.success, "{}", report.diagnostics);

        let module = engine.state().module(&ModulePath::root()).expect("module");
        assert!(module.resources.contains_key("p_thing.a[0]"));
        assert!(module.resources.contains_key("p_thing.a[1]"));
    }

    #[tokio::test]
    async fn test_missing_required_variable_is_config_error() {
        let config = ConfigTree::new(
            Module::new()
                .with_variable("region", None)
                .with_provider(ProviderConfigBlock::new("p"))
                .with_resource(
                    ResourceConfig::managed("p_thing", "a")
                        .with_attr("name", Expr::parse_ref("var.region").expect("ref")),
                ),
        );
        let (engine, _) = engine_with(config);
        let err = engine.plan(false).await.expect_err("missing variable");
        assert!(matches!(err, SkeinError::Config { .. }));
        assert!(err.to_string().contains("region"));
    }

    #[tokio::test]
    async fn test_update_plans_only_the_change() {
        let (mut engine, _) = engine_with(single_resource_config());
        let plan = engine.plan(false).await.expect("plan");
        engine.apply(&plan).await.expect("apply");

        // Same config but a different name value.
        let changed = ConfigTree::new(
            Module::new()
                .with_provider(ProviderConfigBlock::new("p"))
                .with_resource(
                    ResourceConfig::managed("p_thing", "a").with_attr("name", Expr::lit("api")),
                ),
        );
        let provider = Arc::new(MockProvider::new(thing_schema()));
        let factory = MockFactory::new().with_provider("p", Arc::clone(&provider));
        let engine2 = Engine::new(changed, Arc::new(factory))
            .with_state(engine.state().clone());

        let plan = engine2.plan(false).await.expect("plan");
        assert_eq!(plan.diff.change_count(), 1);
        let module = plan.diff.module(&ModulePath::root()).expect("module diff");
        let diff = module.resources.get("p_thing.a").expect("instance diff");
        assert_eq!(diff.change, ChangeKind::Update);
        assert_eq!(diff.attributes["name"].old, "web");
        assert_eq!(diff.attributes["name"].new, "api");
    }

    #[tokio::test]
    async fn test_orphan_is_planned_for_destroy() {
        let (mut engine, _) = engine_with(single_resource_config());
        let plan = engine.plan(false).await.expect("plan");
        engine.apply(&plan).await.expect("apply");

        // New configuration no longer declares the resource.
        let empty = ConfigTree::new(Module::new().with_provider(ProviderConfigBlock::new("p")));
        let provider = Arc::new(MockProvider::new(thing_schema()));
        let factory = MockFactory::new().with_provider("p", Arc::clone(&provider));
        let mut engine2 = Engine::new(empty, Arc::new(factory))
            .with_state(engine.state().clone());

        let plan = engine2.plan(false).await.expect("plan");
        let module = plan.diff.module(&ModulePath::root()).expect("module diff");
        let diff = module.resources.get("p_thing.a").expect("orphan diff");
        assert_eq!(diff.change, ChangeKind::Destroy);

        let report = engine2.apply(&plan).await.expect("apply");
        assert!(report.success, "{}", report.diagnostics);
        assert!(engine2.state().is_empty());
    }

    #[tokio::test]
    async fn test_provisioners_run_after_create() {
        use crate::config::ProvisionerConfig;
        use crate::provider::mock::MockProvisioner;

        let config = ConfigTree::new(
            Module::new()
                .with_provider(ProviderConfigBlock::new("p"))
                .with_resource(
                    ResourceConfig::managed("p_thing", "a")
                        .with_attr("name", Expr::lit("web"))
                        .with_provisioner(ProvisionerConfig {
                            type_name: String::from("shell"),
                            body: crate::lang::Body::from([(
                                String::from("command"),
                                Expr::lit("echo done"),
                            )]),
                        }),
                ),
        );
        let provider = Arc::new(MockProvider::new(thing_schema()));
        let provisioner = Arc::new(MockProvisioner::new());
        let factory = MockFactory::new()
            .with_provider("p", Arc::clone(&provider))
            .with_provisioner("shell", Arc::clone(&provisioner));
        let mut engine = Engine::new(config, Arc::new(factory));

        let plan = engine.plan(false).await.expect("plan");
        let report = engine.apply(&plan).await.expect("apply");
        assert!(report.success, "{}", report.diagnostics);
        assert_eq!(provisioner.apply_count(), 1);

        let module = engine.state().module(&ModulePath::root()).expect("module");
        let instance = module.resources["p_thing.a"].primary.as_ref().expect("instance");
        assert!(!instance.tainted);
    }

    #[tokio::test]
    async fn test_failed_provisioner_taints_the_instance() {
        use crate::config::ProvisionerConfig;
        use crate::provider::mock::MockProvisioner;

        let config = ConfigTree::new(
            Module::new()
                .with_provider(ProviderConfigBlock::new("p"))
                .with_resource(
                    ResourceConfig::managed("p_thing", "a")
                        .with_attr("name", Expr::lit("web"))
                        .with_provisioner(ProvisionerConfig {
                            type_name: String::from("shell"),
                            body: crate::lang::Body::new(),
                        }),
                ),
        );
        let provider = Arc::new(MockProvider::new(thing_schema()));
        let provisioner = Arc::new(MockProvisioner::failing("connection refused"));
        let factory = MockFactory::new()
            .with_provider("p", Arc::clone(&provider))
            .with_provisioner("shell", Arc::clone(&provisioner));
        let mut engine = Engine::new(config, Arc::new(factory));

        let plan = engine.plan(false).await.expect("plan");
        let report = engine.apply(&plan).await.expect("apply");
        assert!(!report.success);
        assert!(report.diagnostics.to_string().contains("connection refused"));

        // The instance exists but is tainted, forcing replacement next
        // time around.
        let module = engine.state().module(&ModulePath::root()).expect("module");
        let instance = module.resources["p_thing.a"].primary.as_ref().expect("instance");
        assert!(instance.tainted);

        let replan = engine.plan(false).await.expect("replan");
        let module_diff = replan.diff.module(&ModulePath::root()).expect("module diff");
        assert_eq!(
            module_diff.resources.get("p_thing.a").map(|d| d.change),
            Some(ChangeKind::Replace)
        );
    }

    #[tokio::test]
    async fn test_import_records_instance() {
        let (mut engine, provider) = engine_with(single_resource_config());
        let imported = engine
            .import_resource("p_thing.a", "i-existing")
            .await
            .expect("import");
        assert_eq!(imported, 1);
        assert!(
            provider
                .calls()
                .iter()
                .any(|c| c == "import:p_thing:i-existing")
        );
        let module = engine.state().module(&ModulePath::root()).expect("module");
        let instance = module.resources["p_thing.a"].primary.as_ref().expect("instance");
        assert_eq!(instance.id, "i-existing");
    }

    #[tokio::test]
    async fn test_data_source_feeds_resource_through_apply() {
        let config = ConfigTree::new(
            Module::new()
                .with_provider(ProviderConfigBlock::new("p"))
                .with_resource(
                    ResourceConfig::data("p_info", "x").with_attr("filter", Expr::lit("f")),
                )
                .with_resource(
                    ResourceConfig::managed("p_thing", "a")
                        .with_attr("name", Expr::parse_ref("data.p_info.x.id").expect("ref")),
                ),
        );
        let (mut engine, provider) = engine_with(config);

        let plan = engine.plan(false).await.expect("plan");
        assert!(plan.success, "{}", plan.diagnostics);
        // The plan read the data source and recorded a re-read for apply.
        let module_diff = plan.diff.module(&ModulePath::root()).expect("module diff");
        assert_eq!(
            module_diff.resources.get("data.p_info.x").map(|d| d.change),
            Some(ChangeKind::Read)
        );

        let report = engine.apply(&plan).await.expect("apply");
        assert!(report.success, "{}", report.diagnostics);
        assert!(provider.calls().iter().any(|c| c == "read_data:p_info"));

        let module = engine.state().module(&ModulePath::root()).expect("module");
        let data_id = module.resources["data.p_info.x"]
            .primary
            .as_ref()
            .expect("data instance")
            .id
            .clone();
        let name = module.resources["p_thing.a"]
            .primary
            .as_ref()
            .expect("resource instance")
            .attributes["name"]
            .clone();
        assert_eq!(name, data_id);
    }

    #[tokio::test]
    async fn test_create_before_destroy_replacement() {
        fn schema_with_force_new() -> ProviderSchema {
            ProviderSchema {
                provider: BlockSchema::new(),
                resource_types: BTreeMap::from([(
                    String::from("p_thing"),
                    BlockSchema::new()
                        .with_attr("name", AttrSchema::required(AttrType::String).force_new())
                        .with_attr("id", AttrSchema::computed(AttrType::String)),
                )]),
                data_sources: BTreeMap::new(),
            }
        }
        fn config_named(name: &str) -> ConfigTree {
            ConfigTree::new(
                Module::new()
                    .with_provider(ProviderConfigBlock::new("p"))
                    .with_resource(
                        ResourceConfig::managed("p_thing", "a")
                            .with_attr("name", Expr::lit(name))
                            .with_create_before_destroy(),
                    ),
            )
        }

        let provider = Arc::new(MockProvider::new(schema_with_force_new()));
        let factory = MockFactory::new().with_provider("p", Arc::clone(&provider));
        let mut engine = Engine::new(config_named("old"), Arc::new(factory));
        let plan = engine.plan(false).await.expect("plan");
        engine.apply(&plan).await.expect("apply");
        let old_id = engine
            .state()
            .module(&ModulePath::root())
            .expect("module")
            .resources["p_thing.a"]
            .primary
            .as_ref()
            .expect("instance")
            .id
            .clone();

        // Reuse the provider instance so generated ids keep advancing.
        let factory2 = MockFactory::new().with_provider("p", Arc::clone(&provider));
        let mut engine2 = Engine::new(config_named("new"), Arc::new(factory2))
            .with_state(engine.state().clone());

        let plan = engine2.plan(false).await.expect("plan");
        let module_diff = plan.diff.module(&ModulePath::root()).expect("module diff");
        let diff = module_diff.resources.get("p_thing.a").expect("diff");
        assert_eq!(diff.change, ChangeKind::Replace);
        assert!(diff.create_before_destroy);

        let report = engine2.apply(&plan).await.expect("apply");
        assert!(report.success, "{}", report.diagnostics);

        let module = engine2.state().module(&ModulePath::root()).expect("module");
        let resource = module.resources.get("p_thing.a").expect("resource");
        let instance = resource.primary.as_ref().expect("new primary");
        assert_ne!(instance.id, old_id);
        assert_eq!(
            instance.attributes.get("name").map(String::as_str),
            Some("new")
        );
        // The displaced instance was destroyed, not left deposed.
        assert!(resource.deposed.is_empty());
    }

    #[tokio::test]
    async fn test_stop_cancels_walk() {
        let (engine, _) = engine_with(single_resource_config());
        engine.stop();
        let plan = engine.plan(false).await.expect("plan runs");
        assert!(!plan.success);
        assert!(plan.diagnostics.to_string().contains("canceled"));
    }

    #[tokio::test]
    async fn test_outputs_recorded_after_apply() {
        let config = ConfigTree::new(
            Module::new()
                .with_provider(ProviderConfigBlock::new("p"))
                .with_resource(
                    ResourceConfig::managed("p_thing", "a").with_attr("name", Expr::lit("web")),
                )
                .with_output("thing_id", Expr::parse_ref("p_thing.a.id").expect("ref")),
        );
        let (mut engine, _) = engine_with(config);
        let plan = engine.plan(false).await.expect("plan");
        let report = engine.apply(&plan).await.expect("apply");
        assert!(report.success, "{}", report.diagnostics);

        let module = engine.state().module(&ModulePath::root()).expect("module");
        let output = module.outputs.get("thing_id").expect("output");
        assert!(!output.is_unknown());
        assert!(output.as_str().is_some());
    }
}
