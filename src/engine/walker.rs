//! The graph walker: evaluates vertices against cached per-module
//! contexts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::addrs::ModulePath;
use crate::dag::{GraphVisitor, VisitOutcome};
use crate::eval::{EvalError, EvalScratch, WalkOperation, build_eval_tree, eval};
use crate::graph::GraphNode;
use crate::lang::ScopeData;
use crate::provider::{ComponentFactory, UiInput};
use crate::state::{SharedDiff, SharedState};

use super::context::{EvalContext, SharedProviderInput, WalkShared};
use super::hook::Hook;
use super::stop::StopSignal;

/// Walks a built graph for one operation, lazily creating and caching an
/// evaluation context per module instance.
pub struct EngineWalker {
    operation: WalkOperation,
    stop: StopSignal,
    components: Arc<dyn ComponentFactory>,
    hooks: Arc<Vec<Arc<dyn Hook>>>,
    ui_input: Option<Arc<dyn UiInput>>,
    scope_data: Arc<ScopeData>,
    state: SharedState,
    diff: SharedDiff,
    shared: Arc<WalkShared>,
    contexts: Mutex<HashMap<String, Arc<EvalContext>>>,
}

impl EngineWalker {
    /// Creates a walker for one operation.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        operation: WalkOperation,
        stop: StopSignal,
        components: Arc<dyn ComponentFactory>,
        hooks: Arc<Vec<Arc<dyn Hook>>>,
        ui_input: Option<Arc<dyn UiInput>>,
        scope_data: Arc<ScopeData>,
        state: SharedState,
        diff: SharedDiff,
        provider_input: SharedProviderInput,
    ) -> Self {
        Self {
            operation,
            stop,
            components,
            hooks,
            ui_input,
            scope_data,
            state,
            diff,
            shared: Arc::new(WalkShared::with_provider_input(provider_input)),
            contexts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached context for a module instance, creating it on
    /// first entry.
    #[must_use]
    pub fn enter_path(&self, path: &ModulePath) -> Arc<EvalContext> {
        let key = path.to_string();
        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ctx) = contexts.get(&key) {
            return Arc::clone(ctx);
        }
        trace!(module = %key, "creating evaluation context");
        let ctx = Arc::new(EvalContext::new(
            path.clone(),
            self.stop.clone(),
            Arc::clone(&self.components),
            Arc::clone(&self.hooks),
            self.ui_input.clone(),
            Arc::clone(&self.scope_data),
            self.state.clone(),
            self.diff.clone(),
            Arc::clone(&self.shared),
        ));
        contexts.insert(key, Arc::clone(&ctx));
        ctx
    }

    /// The plugin caches shared across contexts, for walk teardown.
    #[must_use]
    pub fn shared(&self) -> &Arc<WalkShared> {
        &self.shared
    }
}

#[async_trait]
impl GraphVisitor<GraphNode> for EngineWalker {
    async fn visit(&self, vertex: &GraphNode) -> VisitOutcome {
        let name = crate::dag::Vertex::name(vertex);
        trace!(operation = %self.operation, vertex = %name, "entering eval tree");
        let ctx = self.enter_path(&vertex.path());
        let tree = build_eval_tree(vertex).filter(self.operation);
        let mut scratch = EvalScratch::default();
        let outcome = match eval(&tree, &ctx, &mut scratch).await {
            Ok(()) => VisitOutcome::Ok,
            Err(EvalError::EarlyExit) => {
                debug!(vertex = %name, "early exit requested by hook");
                VisitOutcome::Ok
            }
            Err(EvalError::NonFatal(diags)) => VisitOutcome::NonFatal(diags),
            Err(EvalError::Fatal(diags)) => VisitOutcome::Fatal(diags),
        };
        trace!(operation = %self.operation, vertex = %name, "exiting eval tree");
        outcome
    }
}
