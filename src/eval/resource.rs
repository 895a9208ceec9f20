//! Resource lifecycle leaves: validate, refresh, plan, apply, destroy.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::addrs::{AbsResource, InstanceKey, Referenceable, ResourceMode};
use crate::config::{BlockSchema, ResourceConfig};
use crate::diag::{Diagnostic, Diagnostics};
use crate::engine::{EvalContext, HookAction};
use crate::lang::{Value, flatten_value, unflatten_attrs};
use crate::provider::{OutputSink, Provider};
use crate::state::{ChangeKind, InstanceDiff, InstanceState, compute_instance_diff};

use super::exec::{EvalError, EvalResult, fatal, internal};

/// Fetches the resolved provider instance for a consumer leaf.
fn resolved_provider(
    ctx: &EvalContext,
    key: &Option<String>,
    addr: &AbsResource,
) -> Result<(String, Arc<dyn Provider>), EvalError> {
    let Some(key) = key else {
        return Err(internal(format!("no provider resolved for {addr}")));
    };
    let Some(provider) = ctx.provider(key) else {
        return Err(internal(format!("provider {key:?} not initialized")));
    };
    Ok((key.clone(), provider))
}

/// Fetches the schema for a resource type from the provider's cached
/// schema.
fn resource_schema(
    ctx: &EvalContext,
    provider_key: &str,
    addr: &AbsResource,
) -> Result<BlockSchema, EvalError> {
    let Some(schema) = ctx.provider_schema(provider_key) else {
        return Err(internal(format!(
            "no schema cached for provider {provider_key:?}"
        )));
    };
    let data = addr.resource.mode == ResourceMode::Data;
    schema
        .schema_for(&addr.resource.type_name, data)
        .cloned()
        .ok_or_else(|| {
            fatal(
                Diagnostic::error(format!(
                    "provider {provider_key} does not support resource type {:?}",
                    addr.resource.type_name
                ))
                .with_subject(addr.to_string())
                .into(),
            )
        })
}

/// The object value for a recorded instance, with `id` always present.
fn instance_value(instance: &InstanceState) -> Value {
    let mut value = unflatten_attrs(&instance.attributes);
    if let Value::Map(entries) = &mut value {
        entries
            .entry(String::from("id"))
            .or_insert_with(|| Value::String(instance.id.clone()));
    } else {
        value = Value::Map(BTreeMap::from([(
            String::from("id"),
            Value::String(instance.id.clone()),
        )]));
    }
    value
}

/// Converts a provider-returned state value back into an instance record.
/// `Null` means the instance no longer exists.
fn value_to_instance(value: &Value, fallback_id: Option<&str>) -> Option<InstanceState> {
    if value.is_null() {
        return None;
    }
    let id = value
        .as_map()
        .and_then(|m| m.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| fallback_id.map(str::to_string))
        .unwrap_or_default();
    Some(InstanceState::new(id, flatten_value(value)))
}

/// The dependency addresses recorded into state for destroy ordering.
fn state_dependencies(config: &ResourceConfig) -> Vec<String> {
    let mut deps: Vec<String> = config
        .references()
        .into_iter()
        .filter_map(|r| match &r.subject {
            Referenceable::Resource { resource, .. } => Some(resource.to_string()),
            Referenceable::ModuleCallOutput { call, name } => Some(format!("module.{call}.{name}")),
            _ => None,
        })
        .collect();
    deps.sort();
    deps.dedup();
    deps
}

/// Evaluates a `count` expression into a concrete instance count.
fn eval_count(ctx: &EvalContext, config: &ResourceConfig) -> Result<Option<u64>, EvalError> {
    let Some(expr) = &config.count else {
        return Ok(None);
    };
    let (value, diags) = ctx.evaluate_expr(expr, None);
    if diags.has_errors() {
        return Err(fatal(diags));
    }
    if value.is_unknown() {
        return Err(fatal(
            Diagnostic::error("count value cannot be computed")
                .with_detail("the count depends on a value known only after apply")
                .into(),
        ));
    }
    match value.as_u64() {
        Some(n) => Ok(Some(n)),
        None => Err(fatal(
            Diagnostic::error(format!(
                "invalid count value: expected a whole non-negative number, got {value}"
            ))
            .into(),
        )),
    }
}

/// Expands a count into per-instance (index, state-key suffix) pairs.
fn instance_suffixes(count: Option<u64>) -> Vec<(Option<u64>, String)> {
    match count {
        None => vec![(None, String::new())],
        Some(n) => (0..n).map(|i| (Some(i), format!("[{i}]"))).collect(),
    }
}

/// Routes provisioner output lines to the walk's hooks.
struct HookSink<'a> {
    ctx: &'a EvalContext,
    addr: AbsResource,
    type_name: String,
}

impl OutputSink for HookSink<'_> {
    fn output(&self, line: &str) {
        for hook in self.ctx.hooks() {
            hook.provision_output(&self.addr, &self.type_name, line);
        }
    }
}

/// Validates one resource's configuration: count, body against schema,
/// provider-side checks, and provisioner bodies. All problems are
/// collected into one non-fatal bundle.
#[derive(Debug, Clone)]
pub struct ValidateResource {
    /// Base resource address.
    pub addr: AbsResource,
    /// The resource configuration.
    pub config: ResourceConfig,
    /// Resolved provider cache key.
    pub provider_key: Option<String>,
}

impl ValidateResource {
    pub(crate) async fn eval(&self, ctx: &EvalContext) -> EvalResult {
        let (key, provider) = resolved_provider(ctx, &self.provider_key, &self.addr)?;
        let schema = resource_schema(ctx, &key, &self.addr)?;
        let mut diags = Diagnostics::new();

        if let Some(expr) = &self.config.count {
            let (value, count_diags) = ctx.evaluate_expr(expr, Some(0));
            diags.extend(count_diags);
            if !value.is_unknown() && !value.is_null() && value.as_u64().is_none() {
                diags.push(
                    Diagnostic::error(format!(
                        "invalid count value: expected a whole non-negative number, got {value}"
                    ))
                    .with_subject(self.addr.to_string()),
                );
            }
        }

        let (config_value, block_diags) =
            ctx.evaluate_block(&self.config.body, &schema, None, Some(0));
        diags.extend(block_diags);

        let provider_diags = match self.addr.resource.mode {
            ResourceMode::Managed => {
                provider
                    .validate_resource_type_config(&self.addr.resource.type_name, &config_value)
                    .await?
            }
            ResourceMode::Data => {
                provider
                    .validate_data_source_config(&self.addr.resource.type_name, &config_value)
                    .await?
            }
        };
        diags.extend(provider_diags);

        for provisioner in &self.config.provisioners {
            let provisioner_body: crate::lang::Body = provisioner.body.clone();
            let scope = ctx.scope_data().scope(ctx.path());
            let (_, p_diags) = scope.eval_body(&provisioner_body);
            diags.extend(p_diags);
        }

        if diags.is_empty() {
            Ok(())
        } else {
            Err(EvalError::NonFatal(diags))
        }
    }
}

/// Refreshes every recorded instance of a resource from the remote
/// system, updating or removing state entries.
#[derive(Debug, Clone)]
pub struct RefreshResource {
    /// Base resource address.
    pub addr: AbsResource,
    /// Resolved provider cache key.
    pub provider_key: Option<String>,
}

impl RefreshResource {
    pub(crate) async fn eval(&self, ctx: &EvalContext) -> EvalResult {
        let (key, provider) = resolved_provider(ctx, &self.provider_key, &self.addr)?;
        let base = self.addr.resource.to_string();

        let entries: Vec<(String, InstanceState)> = {
            let state = ctx.state().read().unwrap_or_else(|e| e.into_inner());
            state
                .module(&self.addr.module)
                .map(|module| {
                    module
                        .resources
                        .iter()
                        .filter(|(k, _)| local_key_matches(k, &base))
                        .filter_map(|(k, rs)| {
                            rs.primary.as_ref().map(|p| (k.clone(), p.clone()))
                        })
                        .collect()
                })
                .unwrap_or_default()
        };

        for (local_key, instance) in entries {
            ctx.check_stopped()?;
            if ctx.hook(|h| h.pre_refresh(&self.addr)) == HookAction::Halt {
                return Err(EvalError::EarlyExit);
            }
            let current = instance_value(&instance);
            let (new_value, diags) = provider
                .read_resource(&self.addr.resource.type_name, &current)
                .await
                .map_err(EvalError::from)?;
            if diags.has_errors() {
                return Err(fatal(diags));
            }
            {
                let mut state = ctx.state().write().unwrap_or_else(|e| e.into_inner());
                let module = state.module_mut(&self.addr.module);
                match value_to_instance(&new_value, Some(&instance.id)) {
                    None => {
                        debug!(resource = %self.addr, key = %local_key, "instance gone; dropping from state");
                        if let Some(rs) = module.resources.get_mut(&local_key) {
                            rs.primary = None;
                            if rs.is_empty() {
                                module.resources.remove(&local_key);
                            }
                        }
                    }
                    Some(mut refreshed) => {
                        refreshed.tainted = instance.tainted;
                        if let Some(rs) = module.resources.get_mut(&local_key) {
                            rs.provider = Some(key.clone());
                            rs.primary = Some(refreshed);
                        }
                    }
                }
            }
            if ctx.hook(|h| h.post_refresh(&self.addr)) == HookAction::Halt {
                return Err(EvalError::EarlyExit);
            }
        }
        Ok(())
    }
}

/// When a data-source read executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataReadMode {
    /// During refresh: read if the configuration is fully known.
    Refresh,
    /// During plan: read if possible, otherwise record a deferred read in
    /// the diff.
    Plan,
    /// During apply: perform reads the plan deferred.
    Apply,
}

/// Reads a data source into state, or defers the read into the diff when
/// its configuration is not yet known.
#[derive(Debug, Clone)]
pub struct ReadDataSource {
    /// Base data source address.
    pub addr: AbsResource,
    /// The data source configuration.
    pub config: ResourceConfig,
    /// Resolved provider cache key.
    pub provider_key: Option<String>,
    /// Which walk this leaf runs in.
    pub mode: DataReadMode,
}

impl ReadDataSource {
    pub(crate) async fn eval(&self, ctx: &EvalContext) -> EvalResult {
        let (key, provider) = resolved_provider(ctx, &self.provider_key, &self.addr)?;
        let schema = resource_schema(ctx, &key, &self.addr)?;
        let base = self.addr.resource.to_string();

        if self.mode == DataReadMode::Apply {
            let deferred = {
                let diff = ctx.diff().read().unwrap_or_else(|e| e.into_inner());
                diff.module(&self.addr.module)
                    .and_then(|m| m.resources.get(&base))
                    .is_some_and(|d| d.change == ChangeKind::Read)
            };
            if !deferred {
                return Ok(());
            }
        }

        let (mut config_value, diags) = ctx.evaluate_block(&self.config.body, &schema, None, None);
        if diags.has_errors() {
            return Err(fatal(diags));
        }

        // Computed attributes are the provider's to fill in; only the
        // user-written configuration decides whether the read can run.
        if let Value::Map(entries) = &mut config_value {
            for (name, attr) in &schema.attributes {
                if attr.computed
                    && !attr.optional
                    && !attr.required
                    && entries.get(name).is_some_and(Value::is_unknown)
                {
                    entries.insert(name.clone(), Value::Null);
                }
            }
        }

        if config_value.contains_unknown() {
            match self.mode {
                DataReadMode::Plan => {
                    trace!(data = %self.addr, "configuration not yet known; deferring read");
                    let mut diff = ctx.diff().write().unwrap_or_else(|e| e.into_inner());
                    diff.module_mut(&self.addr.module).resources.insert(
                        base,
                        InstanceDiff {
                            change: ChangeKind::Read,
                            attributes: BTreeMap::new(),
                            destroy_deposed: None,
                            create_before_destroy: false,
                        },
                    );
                    return Ok(());
                }
                DataReadMode::Refresh => return Ok(()),
                DataReadMode::Apply => {
                    return Err(fatal(
                        Diagnostic::error("data source configuration still unknown at apply")
                            .with_subject(self.addr.to_string())
                            .into(),
                    ));
                }
            }
        }

        ctx.check_stopped()?;
        let (result, read_diags) = provider
            .read_data_source(&self.addr.resource.type_name, &config_value)
            .await
            .map_err(EvalError::from)?;
        if read_diags.has_errors() {
            return Err(fatal(read_diags));
        }

        if let Some(instance) = value_to_instance(&result, None) {
            let mut state = ctx.state().write().unwrap_or_else(|e| e.into_inner());
            let module = state.module_mut(&self.addr.module);
            let entry = module.resources.entry(base.clone()).or_default();
            entry.provider = Some(key);
            entry.dependencies = state_dependencies(&self.config);
            entry.primary = Some(instance);
        }

        // Plan walks read against a throwaway state, so the read is also
        // recorded in the diff for the apply walk to repeat for real.
        if self.mode == DataReadMode::Plan {
            let mut diff = ctx.diff().write().unwrap_or_else(|e| e.into_inner());
            diff.module_mut(&self.addr.module).resources.insert(
                base,
                InstanceDiff {
                    change: ChangeKind::Read,
                    attributes: BTreeMap::new(),
                    destroy_deposed: None,
                    create_before_destroy: false,
                },
            );
        }
        Ok(())
    }
}

/// Plans creation and update changes for every instance of a resource.
#[derive(Debug, Clone)]
pub struct PlanResource {
    /// Base resource address.
    pub addr: AbsResource,
    /// The resource configuration.
    pub config: ResourceConfig,
    /// Resolved provider cache key.
    pub provider_key: Option<String>,
}

impl PlanResource {
    pub(crate) async fn eval(&self, ctx: &EvalContext) -> EvalResult {
        let (key, provider) = resolved_provider(ctx, &self.provider_key, &self.addr)?;
        let schema = resource_schema(ctx, &key, &self.addr)?;
        let base = self.addr.resource.to_string();

        if ctx.hook(|h| h.pre_diff(&self.addr)) == HookAction::Halt {
            return Err(EvalError::EarlyExit);
        }

        let count = eval_count(ctx, &self.config)?;
        let suffixes = instance_suffixes(count);

        for (index, suffix) in &suffixes {
            ctx.check_stopped()?;
            let local_key = format!("{base}{suffix}");
            let prior = self.prior_instance(ctx, &base, suffix);

            let (proposed, diags) =
                ctx.evaluate_block(&self.config.body, &schema, None, *index);
            if diags.has_errors() {
                return Err(fatal(diags));
            }

            let prior_value = prior.as_ref().map_or(Value::Null, instance_value);
            let (planned, plan_diags) = provider
                .plan_resource_change(&self.addr.resource.type_name, &prior_value, &proposed)
                .await
                .map_err(EvalError::from)?;
            if plan_diags.has_errors() {
                return Err(fatal(plan_diags));
            }

            let planned_flat = flatten_value(&planned);
            let diff = compute_instance_diff(
                prior.as_ref(),
                &planned_flat,
                &schema,
                self.config.create_before_destroy,
            );
            let change = diff.change;
            if !diff.is_empty() {
                trace!(resource = %local_key, change = ?change, "planned change");
                let mut shared = ctx.diff().write().unwrap_or_else(|e| e.into_inner());
                shared
                    .module_mut(&self.addr.module)
                    .resources
                    .insert(local_key, diff);
            }
            if ctx.hook(|h| h.post_diff(&self.addr, change)) == HookAction::Halt {
                return Err(EvalError::EarlyExit);
            }
        }

        self.plan_shrink_destroys(ctx, &base, count);
        Ok(())
    }

    /// Finds the prior instance for one planned instance, tolerating the
    /// `r` ↔ `r[0]` key shapes that exist until the count boundary fixup
    /// runs at apply.
    fn prior_instance(
        &self,
        ctx: &EvalContext,
        base: &str,
        suffix: &str,
    ) -> Option<InstanceState> {
        let state = ctx.state().read().unwrap_or_else(|e| e.into_inner());
        let module = state.module(&self.addr.module)?;
        let exact = format!("{base}{suffix}");
        let alternate = match suffix {
            "" => format!("{base}[0]"),
            "[0]" => base.to_string(),
            _ => exact.clone(),
        };
        module
            .resources
            .get(&exact)
            .or_else(|| module.resources.get(&alternate))
            .and_then(|rs| rs.primary.clone())
    }

    /// Plans destroys for instances beyond the current count.
    fn plan_shrink_destroys(&self, ctx: &EvalContext, base: &str, count: Option<u64>) {
        let retired: Vec<String> = {
            let state = ctx.state().read().unwrap_or_else(|e| e.into_inner());
            let Some(module) = state.module(&self.addr.module) else {
                return;
            };
            module
                .resources
                .keys()
                .filter(|k| local_key_matches(k, base))
                .filter(|k| {
                    match parse_index(k, base) {
                        // Unkeyed entries are retired only in favor of the
                        // `[0]` form, which the fixup pass renames.
                        None => false,
                        Some(i) => match count {
                            None => i >= 1,
                            Some(n) => i >= n,
                        },
                    }
                })
                .cloned()
                .collect()
        };
        if retired.is_empty() {
            return;
        }
        let mut diff = ctx.diff().write().unwrap_or_else(|e| e.into_inner());
        let module = diff.module_mut(&self.addr.module);
        for local_key in retired {
            debug!(resource = %local_key, "planning destroy for retired instance");
            module.resources.insert(local_key, InstanceDiff::destroy());
        }
    }
}

/// Plans destruction of everything recorded for a resource: primary and
/// deposed instances alike.
#[derive(Debug, Clone)]
pub struct PlanDestroyResource {
    /// Base resource address.
    pub addr: AbsResource,
}

impl PlanDestroyResource {
    pub(crate) async fn eval(&self, ctx: &EvalContext) -> EvalResult {
        let base = self.addr.resource.to_string();
        let planned: Vec<(String, InstanceDiff)> = {
            let state = ctx.state().read().unwrap_or_else(|e| e.into_inner());
            let Some(module) = state.module(&self.addr.module) else {
                return Ok(());
            };
            let mut out = Vec::new();
            for (local_key, rs) in module
                .resources
                .iter()
                .filter(|(k, _)| local_key_matches(k, &base))
            {
                if rs.primary.is_some() {
                    out.push((local_key.clone(), InstanceDiff::destroy()));
                }
                for deposed_key in rs.deposed.keys() {
                    let mut diff = InstanceDiff::destroy();
                    diff.destroy_deposed = Some(deposed_key.clone());
                    out.push((format!("{local_key}(deposed {deposed_key})"), diff));
                }
            }
            out
        };

        if planned.is_empty() {
            return Ok(());
        }
        let mut diff = ctx.diff().write().unwrap_or_else(|e| e.into_inner());
        let module = diff.module_mut(&self.addr.module);
        for (local_key, instance_diff) in planned {
            module.resources.insert(local_key, instance_diff);
        }
        Ok(())
    }
}

/// Applies planned create/update/replace changes for a resource, running
/// provisioners after creation.
#[derive(Debug, Clone)]
pub struct ApplyResource {
    /// Base resource address.
    pub addr: AbsResource,
    /// The resource configuration.
    pub config: ResourceConfig,
    /// Resolved provider cache key.
    pub provider_key: Option<String>,
}

impl ApplyResource {
    pub(crate) async fn eval(&self, ctx: &EvalContext) -> EvalResult {
        let (key, provider) = resolved_provider(ctx, &self.provider_key, &self.addr)?;
        let schema = resource_schema(ctx, &key, &self.addr)?;
        let base = self.addr.resource.to_string();

        let pending: Vec<(String, InstanceDiff)> = {
            let diff = ctx.diff().read().unwrap_or_else(|e| e.into_inner());
            diff.module(&self.addr.module)
                .map(|m| {
                    m.resources
                        .iter()
                        .filter(|(k, _)| local_key_matches(k, &base))
                        .filter(|(_, d)| {
                            matches!(
                                d.change,
                                ChangeKind::Create | ChangeKind::Update | ChangeKind::Replace
                            )
                        })
                        .map(|(k, d)| (k.clone(), d.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        for (local_key, instance_diff) in pending {
            ctx.check_stopped()?;
            let keyed_addr = keyed_addr(&self.addr, &local_key, &base);
            if ctx.hook(|h| h.pre_apply(&keyed_addr, instance_diff.change)) == HookAction::Halt {
                return Err(EvalError::EarlyExit);
            }

            // Create-before-destroy replacement displaces the old
            // instance first; the destroy node deals with it afterwards.
            if instance_diff.change == ChangeKind::Replace
                && instance_diff.create_before_destroy
            {
                let mut state = ctx.state().write().unwrap_or_else(|e| e.into_inner());
                if let Some(rs) = state
                    .module_mut(&self.addr.module)
                    .resources
                    .get_mut(&local_key)
                {
                    rs.depose_primary();
                }
            }

            let prior = self.take_prior(ctx, &local_key, &base);
            let count_index = parse_index(&local_key, &base);
            let (proposed, diags) =
                ctx.evaluate_block(&self.config.body, &schema, None, count_index);
            if diags.has_errors() {
                return Err(fatal(diags));
            }

            let prior_value = prior.as_ref().map_or(Value::Null, instance_value);
            let (new_value, apply_diags) = provider
                .apply_resource_change(&self.addr.resource.type_name, &prior_value, &proposed)
                .await
                .map_err(EvalError::from)?;
            if apply_diags.has_errors() {
                ctx.hook(|h| {
                    h.post_apply(&keyed_addr, Some(&apply_diags.to_string()))
                });
                return Err(fatal(apply_diags));
            }

            let fallback_id = prior.as_ref().map(|p| p.id.as_str());
            match value_to_instance(&new_value, fallback_id) {
                None => {
                    let mut state = ctx.state().write().unwrap_or_else(|e| e.into_inner());
                    let module = state.module_mut(&self.addr.module);
                    if let Some(rs) = module.resources.get_mut(&local_key) {
                        rs.primary = None;
                        if rs.is_empty() {
                            module.resources.remove(&local_key);
                        }
                    }
                }
                Some(instance) => {
                    let mut state = ctx.state().write().unwrap_or_else(|e| e.into_inner());
                    let module = state.module_mut(&self.addr.module);
                    let entry = module.resources.entry(local_key.clone()).or_default();
                    entry.provider = Some(key.clone());
                    entry.dependencies = state_dependencies(&self.config);
                    entry.primary = Some(instance);
                }
            }

            let created = matches!(
                instance_diff.change,
                ChangeKind::Create | ChangeKind::Replace
            );
            if created && !self.config.provisioners.is_empty() {
                if let Err(err) = self
                    .run_provisioners(ctx, &keyed_addr, &new_value, count_index)
                    .await
                {
                    // A provisioner failure leaves the instance created
                    // but tainted, forcing replacement on the next apply.
                    let mut state = ctx.state().write().unwrap_or_else(|e| e.into_inner());
                    if let Some(instance) = state
                        .module_mut(&self.addr.module)
                        .resources
                        .get_mut(&local_key)
                        .and_then(|rs| rs.primary.as_mut())
                    {
                        instance.tainted = true;
                    }
                    drop(state);
                    ctx.hook(|h| h.post_apply(&keyed_addr, Some("provisioner failed")));
                    return Err(err);
                }
            }

            if ctx.hook(|h| h.post_apply(&keyed_addr, None)) == HookAction::Halt {
                return Err(EvalError::EarlyExit);
            }
        }
        Ok(())
    }

    /// Reads the prior instance for a diff key, moving a `r` ↔ `r[0]`
    /// shaped entry onto the key first so the write-back lands on one
    /// entry.
    fn take_prior(
        &self,
        ctx: &EvalContext,
        local_key: &str,
        base: &str,
    ) -> Option<InstanceState> {
        let mut state = ctx.state().write().unwrap_or_else(|e| e.into_inner());
        let module = state.module_mut(&self.addr.module);
        if !module.resources.contains_key(local_key) {
            let alternate = if local_key == base {
                Some(format!("{base}[0]"))
            } else if local_key == format!("{base}[0]") {
                Some(base.to_string())
            } else {
                None
            };
            if let Some(alternate) = alternate
                && let Some(entry) = module.resources.remove(&alternate)
            {
                module.resources.insert(local_key.to_string(), entry);
            }
        }
        module
            .resources
            .get(local_key)
            .and_then(|rs| rs.primary.clone())
    }

    async fn run_provisioners(
        &self,
        ctx: &EvalContext,
        addr: &AbsResource,
        state_value: &Value,
        count_index: Option<u64>,
    ) -> EvalResult {
        for provisioner in &self.config.provisioners {
            ctx.check_stopped()?;
            if ctx.hook(|h| h.pre_provision(addr, &provisioner.type_name)) == HookAction::Halt {
                return Err(EvalError::EarlyExit);
            }
            let instance = ctx.ensure_provisioner(&provisioner.type_name).await?;

            let mut scope = ctx.scope_data().scope(ctx.path()).with_self(state_value);
            if let Some(index) = count_index {
                scope = scope.with_count_index(index);
            }
            let (evaluated, diags) = scope.eval_body(&provisioner.body);
            if diags.has_errors() {
                return Err(fatal(diags));
            }
            let config_value = Value::Map(evaluated);

            let sink = HookSink {
                ctx,
                addr: addr.clone(),
                type_name: provisioner.type_name.clone(),
            };
            let apply_diags = instance
                .apply(state_value, &config_value, &sink)
                .await
                .map_err(EvalError::from)?;
            if apply_diags.has_errors() {
                return Err(fatal(apply_diags));
            }
            if ctx.hook(|h| h.post_provision(addr, &provisioner.type_name)) == HookAction::Halt {
                return Err(EvalError::EarlyExit);
            }
        }
        Ok(())
    }
}

/// Applies planned destroys for a resource: primary instances, specific
/// deposed instances, and the deposed leg of create-before-destroy
/// replacements.
#[derive(Debug, Clone)]
pub struct DestroyResource {
    /// Base resource address.
    pub addr: AbsResource,
    /// Resolved provider cache key.
    pub provider_key: Option<String>,
}

impl DestroyResource {
    pub(crate) async fn eval(&self, ctx: &EvalContext) -> EvalResult {
        let (_, provider) = resolved_provider(ctx, &self.provider_key, &self.addr)?;
        let base = self.addr.resource.to_string();

        let pending: Vec<(String, InstanceDiff)> = {
            let diff = ctx.diff().read().unwrap_or_else(|e| e.into_inner());
            diff.module(&self.addr.module)
                .map(|m| {
                    m.resources
                        .iter()
                        .filter(|(k, _)| local_key_matches(k, &base))
                        .filter(|(_, d)| d.is_destroy() || d.destroy_deposed.is_some())
                        .map(|(k, d)| (k.clone(), d.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        for (diff_key, instance_diff) in pending {
            ctx.check_stopped()?;
            // Deferred-read markers share the diff namespace; skip them.
            if instance_diff.change == ChangeKind::Read {
                continue;
            }
            let local_key = diff_key
                .split_once("(deposed ")
                .map_or(diff_key.as_str(), |(prefix, _)| prefix)
                .to_string();
            let keyed_addr = keyed_addr(&self.addr, &local_key, &base);

            if ctx.hook(|h| h.pre_apply(&keyed_addr, ChangeKind::Destroy)) == HookAction::Halt {
                return Err(EvalError::EarlyExit);
            }

            let targets = self.destroy_targets(ctx, &local_key, &instance_diff);
            for target in targets {
                let prior_value = instance_value(&target.instance);
                let (result, diags) = provider
                    .apply_resource_change(
                        &self.addr.resource.type_name,
                        &prior_value,
                        &Value::Null,
                    )
                    .await
                    .map_err(EvalError::from)?;
                if diags.has_errors() {
                    ctx.hook(|h| h.post_apply(&keyed_addr, Some(&diags.to_string())));
                    return Err(fatal(diags));
                }
                if !result.is_null() {
                    return Err(internal(format!(
                        "provider returned state for destroyed instance {keyed_addr}"
                    )));
                }

                let mut state = ctx.state().write().unwrap_or_else(|e| e.into_inner());
                let module = state.module_mut(&self.addr.module);
                if let Some(rs) = module.resources.get_mut(&local_key) {
                    match &target.deposed_key {
                        Some(deposed_key) => {
                            rs.deposed.remove(deposed_key);
                        }
                        None => rs.primary = None,
                    }
                    if rs.is_empty() {
                        module.resources.remove(&local_key);
                    }
                }
            }

            if ctx.hook(|h| h.post_apply(&keyed_addr, None)) == HookAction::Halt {
                return Err(EvalError::EarlyExit);
            }
        }
        Ok(())
    }

    /// Resolves which concrete instances a destroy diff targets.
    fn destroy_targets(
        &self,
        ctx: &EvalContext,
        local_key: &str,
        instance_diff: &InstanceDiff,
    ) -> Vec<DestroyTarget> {
        let state = ctx.state().read().unwrap_or_else(|e| e.into_inner());
        let Some(rs) = state
            .module(&self.addr.module)
            .and_then(|m| m.resources.get(local_key))
        else {
            return Vec::new();
        };

        if let Some(deposed_key) = &instance_diff.destroy_deposed {
            return rs
                .deposed
                .get(deposed_key)
                .map(|instance| {
                    vec![DestroyTarget {
                        instance: instance.clone(),
                        deposed_key: Some(deposed_key.clone()),
                    }]
                })
                .unwrap_or_default();
        }

        if instance_diff.change == ChangeKind::Replace && instance_diff.create_before_destroy {
            // The apply node already deposed the old primary; destroy
            // everything waiting in the deposed set.
            return rs
                .deposed
                .iter()
                .map(|(k, instance)| DestroyTarget {
                    instance: instance.clone(),
                    deposed_key: Some(k.clone()),
                })
                .collect();
        }

        rs.primary
            .as_ref()
            .map(|instance| {
                vec![DestroyTarget {
                    instance: instance.clone(),
                    deposed_key: None,
                }]
            })
            .unwrap_or_default()
    }
}

struct DestroyTarget {
    instance: InstanceState,
    deposed_key: Option<String>,
}

/// Whether a module-local state/diff key belongs to the given base
/// resource address (`base`, `base[0]`, `base(deposed …)`).
fn local_key_matches(key: &str, base: &str) -> bool {
    key == base
        || key
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('[') || rest.starts_with("(deposed "))
}

/// Extracts the count index from a `base[i]` key.
fn parse_index(key: &str, base: &str) -> Option<u64> {
    key.strip_prefix(base)?
        .strip_prefix('[')?
        .split(']')
        .next()?
        .parse()
        .ok()
}

/// The instance-keyed address for hooks and messages.
fn keyed_addr(addr: &AbsResource, local_key: &str, base: &str) -> AbsResource {
    match parse_index(local_key, base) {
        Some(index) => addr.with_key(InstanceKey::Index(index)),
        None => addr.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ModulePath, Resource};

    #[test]
    fn test_local_key_matching() {
        assert!(local_key_matches("p_thing.a", "p_thing.a"));
        assert!(local_key_matches("p_thing.a[3]", "p_thing.a"));
        assert!(local_key_matches("p_thing.a(deposed x)", "p_thing.a"));
        assert!(!local_key_matches("p_thing.ab", "p_thing.a"));
        assert!(!local_key_matches("p_thing.a", "p_thing.ab"));
    }

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_index("p_thing.a[2]", "p_thing.a"), Some(2));
        assert_eq!(parse_index("p_thing.a", "p_thing.a"), None);
        assert_eq!(parse_index("p_thing.a[x]", "p_thing.a"), None);
    }

    #[test]
    fn test_instance_value_always_has_id() {
        let instance = InstanceState::new("i-1", BTreeMap::new());
        let value = instance_value(&instance);
        assert_eq!(
            value.as_map().and_then(|m| m.get("id")),
            Some(&Value::from("i-1"))
        );
    }

    #[test]
    fn test_value_to_instance_null_is_gone() {
        assert!(value_to_instance(&Value::Null, Some("i-1")).is_none());
        let value = Value::Map(BTreeMap::from([(
            String::from("id"),
            Value::from("i-9"),
        )]));
        let instance = value_to_instance(&value, None).expect("instance");
        assert_eq!(instance.id, "i-9");
    }

    #[test]
    fn test_state_dependencies_filters_and_sorts() {
        let config = ResourceConfig::managed("p_thing", "b")
            .with_attr("x", crate::lang::Expr::parse_ref("p_thing.a.id").expect("ref"))
            .with_attr("y", crate::lang::Expr::parse_ref("var.v").expect("ref"))
            .with_attr("z", crate::lang::Expr::parse_ref("module.m.out").expect("ref"));
        let deps = state_dependencies(&config);
        assert_eq!(deps, vec!["module.m.out", "p_thing.a"]);
    }

    #[test]
    fn test_keyed_addr() {
        let addr = Resource::managed("p_thing", "a").absolute(ModulePath::root());
        let keyed = keyed_addr(&addr, "p_thing.a[1]", "p_thing.a");
        assert_eq!(keyed.to_string(), "p_thing.a[1]");
    }
}
