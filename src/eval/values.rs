//! Value vertices: outputs, locals, module variables, and state fixups.

use std::collections::BTreeMap;

use tracing::debug;

use crate::addrs::ModulePath;
use crate::config::OutputConfig;
use crate::engine::EvalContext;
use crate::lang::{Expr, Value};

use super::exec::{EvalResult, fatal, internal};

/// Evaluates an output value into state, or removes it.
#[derive(Debug, Clone)]
pub struct EvalOutput {
    /// Module the output belongs to.
    pub module: ModulePath,
    /// Output name.
    pub name: String,
    /// Configuration; absent when removing.
    pub config: Option<OutputConfig>,
    /// Remove the recorded value instead of evaluating.
    pub remove: bool,
}

impl EvalOutput {
    pub(crate) fn eval(&self, ctx: &EvalContext) -> EvalResult {
        if self.remove {
            let mut state = ctx.state().write().unwrap_or_else(|e| e.into_inner());
            if let Some(module) = state.modules.iter_mut().find(|m| m.path == self.module) {
                module.outputs.remove(&self.name);
            }
            return Ok(());
        }
        let Some(config) = &self.config else {
            return Ok(());
        };
        let (value, diags) = ctx.evaluate_expr(&config.expr, None);
        if diags.has_errors() {
            return Err(fatal(diags));
        }
        let mut state = ctx.state().write().unwrap_or_else(|e| e.into_inner());
        state
            .module_mut(&self.module)
            .outputs
            .insert(self.name.clone(), value);
        Ok(())
    }
}

/// Evaluates a local value into the walk's scope cache.
#[derive(Debug, Clone)]
pub struct EvalLocal {
    /// Module the local belongs to.
    pub module: ModulePath,
    /// Local name.
    pub name: String,
    /// The local's expression.
    pub expr: Expr,
}

impl EvalLocal {
    pub(crate) fn eval(&self, ctx: &EvalContext) -> EvalResult {
        let (value, diags) = ctx.evaluate_expr(&self.expr, None);
        if diags.has_errors() {
            return Err(fatal(diags));
        }
        ctx.scope_data().set_local(&self.module, &self.name, value);
        Ok(())
    }
}

/// Evaluates a child-module input variable at its call site and stages it
/// into the child's input map.
#[derive(Debug, Clone)]
pub struct EvalModuleVariable {
    /// The child module instance the variable belongs to.
    pub module: ModulePath,
    /// Variable name.
    pub name: String,
    /// Argument expression from the call, if the call passes one.
    pub expr: Option<Expr>,
    /// Declared default.
    pub default: Option<Value>,
}

impl EvalModuleVariable {
    pub(crate) fn eval(&self, ctx: &EvalContext) -> EvalResult {
        let Some(step) = self.module.last_step().cloned() else {
            return Err(internal("module variable vertex at the root module"));
        };

        let mut value = match &self.expr {
            Some(expr) => {
                let (value, diags) = ctx.evaluate_expr(expr, None);
                if diags.has_errors() {
                    return Err(fatal(diags));
                }
                value
            }
            None => Value::Null,
        };
        if value.is_null()
            && let Some(default) = &self.default
        {
            value = default.clone();
        }

        ctx.set_module_call_arguments(
            &step.name,
            step.key,
            BTreeMap::from([(self.name.clone(), value)]),
        );
        Ok(())
    }
}

/// Normalizes state keys for resources that gained or lost `count`.
#[derive(Debug, Clone)]
pub struct CountBoundaryFixup {
    /// (module, base local address, has count) per managed resource.
    pub fixups: Vec<(ModulePath, String, bool)>,
}

impl CountBoundaryFixup {
    pub(crate) fn eval(&self, ctx: &EvalContext) -> EvalResult {
        let mut state = ctx.state().write().unwrap_or_else(|e| e.into_inner());
        for (module, base, has_count) in &self.fixups {
            if state.module(module).is_none() {
                continue;
            }
            state.module_mut(module).normalize_count_key(base, *has_count);
        }
        Ok(())
    }
}

/// Removes the state of a module no longer present in configuration once
/// its resources are gone.
#[derive(Debug, Clone)]
pub struct ModuleRemovedCleanup {
    /// The module instance to clean up.
    pub module: ModulePath,
}

impl ModuleRemovedCleanup {
    pub(crate) fn eval(&self, ctx: &EvalContext) -> EvalResult {
        let mut state = ctx.state().write().unwrap_or_else(|e| e.into_inner());
        let before = state.modules.len();
        state
            .modules
            .retain(|m| m.path != self.module || !m.resources.is_empty());
        if state.modules.len() < before {
            debug!(module = %self.module, "removed empty module from state");
        }
        Ok(())
    }
}
