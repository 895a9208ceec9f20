//! The per-module-instance evaluation context.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::addrs::{InstanceKey, ModulePath, ProviderConfig};
use crate::config::BlockSchema;
use crate::diag::Diagnostics;
use crate::error::{Result, SkeinError};
use crate::lang::{Body, Expr, ScopeData, Value};
use crate::provider::{ComponentFactory, Provider, ProviderSchema, Provisioner, UiInput};
use crate::state::{SharedDiff, SharedState};

use super::hook::{Hook, HookAction};
use super::stop::StopSignal;

/// Plugin instances and memoization shared by every context in one walk.
///
/// Caches are keyed by canonical address strings. Creation follows a
/// check-then-init pattern: the graph guarantees each key is initialized
/// by exactly one vertex, so no lock is held across the plugin calls
/// themselves.
#[derive(Default)]
pub struct WalkShared {
    providers: Mutex<HashMap<String, Arc<dyn Provider>>>,
    schemas: Mutex<HashMap<String, Arc<ProviderSchema>>>,
    provisioners: Mutex<HashMap<String, Arc<dyn Provisioner>>>,
    /// Memoized user-input answers. Unlike the plugin caches this is
    /// handed in by the engine so answers gathered by an input walk
    /// survive into the walks that follow.
    provider_input: SharedProviderInput,
    configured: Mutex<HashMap<String, [u8; 32]>>,
}

/// Provider-input memoization shared across an engine's walks.
pub type SharedProviderInput = Arc<Mutex<HashMap<String, BTreeMap<String, Value>>>>;

impl WalkShared {
    /// Creates empty shared walk storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates shared walk storage around an existing input memoization
    /// table.
    #[must_use]
    pub fn with_provider_input(provider_input: SharedProviderInput) -> Self {
        Self {
            provider_input,
            ..Self::default()
        }
    }

    /// Stops and drops every plugin instance still cached. Called at walk
    /// teardown for plugins no close vertex reached.
    pub async fn shutdown(&self) {
        let providers: Vec<(String, Arc<dyn Provider>)> = {
            let mut cache = self.providers.lock().unwrap_or_else(|e| e.into_inner());
            cache.drain().collect()
        };
        for (key, provider) in providers {
            if let Err(err) = provider.stop().await {
                debug!(provider = %key, error = %err, "provider stop failed at teardown");
            }
        }
        let provisioners: Vec<(String, Arc<dyn Provisioner>)> = {
            let mut cache = self.provisioners.lock().unwrap_or_else(|e| e.into_inner());
            cache.drain().collect()
        };
        for (key, provisioner) in provisioners {
            if let Err(err) = provisioner.stop().await {
                debug!(provisioner = %key, error = %err, "provisioner stop failed at teardown");
            }
        }
    }
}

/// The capability set handed to eval leaves: plugin lifecycle, schema and
/// input caches, expression evaluation in the module's scope, hook
/// dispatch, shared state and diff, and the stop signal.
///
/// One context exists per (walk, module instance), created lazily by the
/// walker on first entry.
pub struct EvalContext {
    path: ModulePath,
    stop: StopSignal,
    components: Arc<dyn ComponentFactory>,
    hooks: Arc<Vec<Arc<dyn Hook>>>,
    ui_input: Option<Arc<dyn UiInput>>,
    scope_data: Arc<ScopeData>,
    state: SharedState,
    diff: SharedDiff,
    shared: Arc<WalkShared>,
}

impl EvalContext {
    /// Creates a context for one module instance.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        path: ModulePath,
        stop: StopSignal,
        components: Arc<dyn ComponentFactory>,
        hooks: Arc<Vec<Arc<dyn Hook>>>,
        ui_input: Option<Arc<dyn UiInput>>,
        scope_data: Arc<ScopeData>,
        state: SharedState,
        diff: SharedDiff,
        shared: Arc<WalkShared>,
    ) -> Self {
        Self {
            path,
            stop,
            components,
            hooks,
            ui_input,
            scope_data,
            state,
            diff,
            shared,
        }
    }

    /// The module instance this context evaluates within.
    #[must_use]
    pub fn path(&self) -> &ModulePath {
        &self.path
    }

    /// The cooperative stop signal.
    #[must_use]
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Fails with `Canceled` once stop has been signalled. Leaves call
    /// this at their suspension points.
    pub fn check_stopped(&self) -> Result<()> {
        if self.stop.is_stopped() {
            return Err(SkeinError::Canceled);
        }
        Ok(())
    }

    /// Dispatches an event to every hook in order. The first halting hook
    /// wins.
    pub fn hook<F>(&self, f: F) -> HookAction
    where
        F: Fn(&dyn Hook) -> HookAction,
    {
        for hook in self.hooks.iter() {
            if f(hook.as_ref()) == HookAction::Halt {
                return HookAction::Halt;
            }
        }
        HookAction::Continue
    }

    /// The hooks registered for this walk.
    #[must_use]
    pub fn hooks(&self) -> &[Arc<dyn Hook>] {
        &self.hooks
    }

    /// The user input source, when the walk has one.
    #[must_use]
    pub fn ui_input(&self) -> Option<&Arc<dyn UiInput>> {
        self.ui_input.as_ref()
    }

    /// Starts the provider for the given cache key (a canonical absolute
    /// provider address) and caches its schema.
    ///
    /// Initializing the same key twice within a walk is an error.
    pub async fn init_provider(&self, type_name: &str, key: &str) -> Result<Arc<dyn Provider>> {
        if self.provider(key).is_some() {
            return Err(SkeinError::internal(format!(
                "provider {key:?} already initialized"
            )));
        }
        self.check_stopped()?;

        // The graph dedicates one vertex to each provider key, so nothing
        // races us between the check above and the inserts below; the
        // plugin calls run without any lock held.
        let provider = self.components.provider(type_name, key).await?;
        let schema = provider.get_schema().await?;
        debug!(provider = %key, "initialized provider and cached schema");

        self.shared
            .schemas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), Arc::new(schema));
        self.shared
            .providers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    /// Returns the provider for a cache key, or `None` if it has not been
    /// initialized. Never blocks on plugin startup.
    #[must_use]
    pub fn provider(&self, key: &str) -> Option<Arc<dyn Provider>> {
        self.shared
            .providers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Returns the cached schema for an initialized provider.
    #[must_use]
    pub fn provider_schema(&self, key: &str) -> Option<Arc<ProviderSchema>> {
        self.shared
            .schemas
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Shuts down and forgets the provider for a cache key.
    pub async fn close_provider(&self, key: &str) -> Result<()> {
        let provider = {
            let mut cache = self
                .shared
                .providers
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            cache.remove(key)
        };
        if let Some(provider) = provider {
            debug!(provider = %key, "closing provider");
            provider.stop().await?;
        }
        Ok(())
    }

    /// Configures an initialized provider.
    ///
    /// Configuring the same provider twice with different values is an
    /// internal error; identical values are a no-op for the second call.
    pub async fn configure_provider(&self, key: &str, config: &Value) -> Result<Diagnostics> {
        let Some(provider) = self.provider(key) else {
            return Err(SkeinError::internal(format!(
                "provider {key:?} not initialized"
            )));
        };

        let fingerprint = fingerprint_value(config);
        {
            let mut configured = self
                .shared
                .configured
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match configured.get(key) {
                Some(previous) if *previous == fingerprint => return Ok(Diagnostics::new()),
                Some(_) => {
                    return Err(SkeinError::internal(format!(
                        "provider {key:?} configured twice with different values"
                    )));
                }
                None => {
                    configured.insert(key.to_string(), fingerprint);
                }
            }
        }

        self.check_stopped()?;
        provider.configure(config).await
    }

    /// Returns memoized input values for a provider configuration,
    /// searching upward through the module tree the way inheritance does.
    #[must_use]
    pub fn provider_input(&self, config: &ProviderConfig) -> Option<BTreeMap<String, Value>> {
        let input = self
            .shared
            .provider_input
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let mut module = Some(self.path.clone());
        while let Some(current) = module {
            let key = config.absolute(current.clone()).to_string();
            if let Some(values) = input.get(&key) {
                return Some(values.clone());
            }
            module = current.parent();
        }
        None
    }

    /// Memoizes input values for a provider configuration at this
    /// context's module.
    pub fn set_provider_input(&self, config: &ProviderConfig, values: BTreeMap<String, Value>) {
        let key = config.absolute(self.path.clone()).to_string();
        self.shared
            .provider_input
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, values);
    }

    /// Starts the provisioner with the given type name for this module,
    /// or fails if it was already initialized.
    pub async fn init_provisioner(&self, type_name: &str) -> Result<Arc<dyn Provisioner>> {
        let key = self.provisioner_key(type_name);
        if self.provisioner(type_name).is_some() {
            return Err(SkeinError::internal(format!(
                "provisioner {key:?} already initialized"
            )));
        }
        self.check_stopped()?;
        let provisioner = self.components.provisioner(type_name, &key).await?;
        self.shared
            .provisioners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::clone(&provisioner));
        Ok(provisioner)
    }

    /// Returns the provisioner for this module, initializing it on first
    /// use. Unlike [`Self::init_provisioner`] this is safe to call from
    /// several resources sharing one provisioner type.
    pub async fn ensure_provisioner(&self, type_name: &str) -> Result<Arc<dyn Provisioner>> {
        if let Some(existing) = self.provisioner(type_name) {
            return Ok(existing);
        }
        self.check_stopped()?;
        let key = self.provisioner_key(type_name);
        let created = self.components.provisioner(type_name, &key).await?;
        let mut cache = self
            .shared
            .provisioners
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        Ok(Arc::clone(cache.entry(key).or_insert(created)))
    }

    /// Returns an already-initialized provisioner, or `None`.
    #[must_use]
    pub fn provisioner(&self, type_name: &str) -> Option<Arc<dyn Provisioner>> {
        self.shared
            .provisioners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&self.provisioner_key(type_name))
            .cloned()
    }

    fn provisioner_key(&self, type_name: &str) -> String {
        let path = self.path.to_string();
        if path.is_empty() {
            type_name.to_string()
        } else {
            format!("{path}.{type_name}")
        }
    }

    /// Evaluates a block body against a schema in this module's scope,
    /// producing a value conforming to the schema.
    #[must_use]
    pub fn evaluate_block(
        &self,
        body: &Body,
        schema: &BlockSchema,
        self_value: Option<&Value>,
        count_index: Option<u64>,
    ) -> (Value, Diagnostics) {
        let mut scope = self.scope_data.scope(&self.path);
        if let Some(value) = self_value {
            scope = scope.with_self(value);
        }
        if let Some(index) = count_index {
            scope = scope.with_count_index(index);
        }
        scope.eval_block(body, schema)
    }

    /// Evaluates a single expression in this module's scope.
    #[must_use]
    pub fn evaluate_expr(&self, expr: &Expr, count_index: Option<u64>) -> (Value, Diagnostics) {
        let mut scope = self.scope_data.scope(&self.path);
        if let Some(index) = count_index {
            scope = scope.with_count_index(index);
        }
        scope.eval_expr(expr)
    }

    /// Merges argument values into the input map of the child module
    /// called `name`; later calls shadow earlier ones per key.
    pub fn set_module_call_arguments(
        &self,
        name: &str,
        key: Option<InstanceKey>,
        values: BTreeMap<String, Value>,
    ) {
        let child = self.path.child(name, key);
        self.scope_data.merge_variables(&child, values);
    }

    /// The walk-wide scope data (variables, locals, state access).
    #[must_use]
    pub fn scope_data(&self) -> &Arc<ScopeData> {
        &self.scope_data
    }

    /// The shared state and its lock.
    #[must_use]
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// The shared diff and its lock.
    #[must_use]
    pub fn diff(&self) -> &SharedDiff {
        &self.diff
    }
}

/// SHA-256 over the wire encoding of a value, for configure-idempotency
/// checks.
fn fingerprint_value(value: &Value) -> [u8; 32] {
    let mut hasher = Sha256::new();
    if let Ok(encoded) = serde_json::to_vec(value) {
        hasher.update(&encoded);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::{MockFactory, MockProvider};
    use crate::state::{Diff, State, shared_diff, shared_state};
    use std::collections::BTreeMap;

    fn context_with(factory: MockFactory) -> EvalContext {
        let state = shared_state(State::new());
        let (_, stop) = super::super::stop::StopHandle::new();
        EvalContext::new(
            ModulePath::root(),
            stop,
            Arc::new(factory),
            Arc::new(Vec::new()),
            None,
            Arc::new(ScopeData::new(shared_state(State::new()), "default")),
            state,
            shared_diff(Diff::new()),
            Arc::new(WalkShared::new()),
        )
    }

    #[tokio::test]
    async fn test_init_provider_twice_fails() {
        let factory = MockFactory::new()
            .with_provider("p", Arc::new(MockProvider::new(Default::default())));
        let ctx = context_with(factory);
        assert!(ctx.provider("provider.p").is_none());
        ctx.init_provider("p", "provider.p").await.expect("init");
        assert!(ctx.provider("provider.p").is_some());
        assert!(ctx.provider_schema("provider.p").is_some());

        let err = ctx.init_provider("p", "provider.p").await;
        assert!(matches!(err, Err(SkeinError::Internal(_))));
    }

    #[tokio::test]
    async fn test_configure_is_idempotent_for_identical_values() {
        let factory = MockFactory::new()
            .with_provider("p", Arc::new(MockProvider::new(Default::default())));
        let ctx = context_with(factory);
        ctx.init_provider("p", "provider.p").await.expect("init");

        let config = Value::from("same");
        ctx.configure_provider("provider.p", &config)
            .await
            .expect("first configure");
        ctx.configure_provider("provider.p", &config)
            .await
            .expect("second identical configure");

        let err = ctx
            .configure_provider("provider.p", &Value::from("different"))
            .await;
        assert!(matches!(err, Err(SkeinError::Internal(_))));
    }

    #[tokio::test]
    async fn test_init_provisioner_twice_fails() {
        use crate::provider::mock::MockProvisioner;
        let factory = MockFactory::new().with_provisioner("shell", Arc::new(MockProvisioner::new()));
        let ctx = context_with(factory);
        assert!(ctx.provisioner("shell").is_none());
        ctx.init_provisioner("shell").await.expect("init");
        assert!(ctx.provisioner("shell").is_some());
        let err = ctx.init_provisioner("shell").await;
        assert!(matches!(err, Err(SkeinError::Internal(_))));

        // The get-or-init path tolerates repeats.
        ctx.ensure_provisioner("shell").await.expect("ensure");
    }

    #[tokio::test]
    async fn test_provider_input_walks_up_modules() {
        let factory = MockFactory::new();
        let root_ctx = context_with(factory);
        let config = ProviderConfig::default_for("p");
        root_ctx.set_provider_input(
            &config,
            BTreeMap::from([(String::from("region"), Value::from("x"))]),
        );

        let child = EvalContext::new(
            ModulePath::root().child("m", None),
            root_ctx.stop.clone(),
            Arc::clone(&root_ctx.components),
            Arc::clone(&root_ctx.hooks),
            None,
            Arc::clone(&root_ctx.scope_data),
            root_ctx.state.clone(),
            root_ctx.diff.clone(),
            Arc::clone(&root_ctx.shared),
        );
        let found = child.provider_input(&config).expect("inherited input");
        assert_eq!(found.get("region"), Some(&Value::from("x")));
    }

    #[tokio::test]
    async fn test_check_stopped_surfaces_cancellation() {
        let factory = MockFactory::new();
        let ctx = context_with(factory);
        assert!(ctx.check_stopped().is_ok());
        // Build a context whose handle we control.
        let (handle, stop) = super::super::stop::StopHandle::new();
        let stopped_ctx = EvalContext::new(
            ModulePath::root(),
            stop,
            Arc::clone(&ctx.components),
            Arc::clone(&ctx.hooks),
            None,
            Arc::clone(&ctx.scope_data),
            ctx.state.clone(),
            ctx.diff.clone(),
            Arc::new(WalkShared::new()),
        );
        handle.stop();
        assert!(matches!(
            stopped_ctx.check_stopped(),
            Err(SkeinError::Canceled)
        ));
    }
}
