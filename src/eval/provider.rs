//! Provider lifecycle leaves.

use std::collections::BTreeMap;

use tracing::debug;

use crate::addrs::AbsProviderConfig;
use crate::engine::EvalContext;
use crate::lang::{Body, Value};

use super::exec::{EvalError, EvalResult, EvalScratch, internal};

/// Starts the provider plugin for a configuration address.
#[derive(Debug, Clone)]
pub struct InitProvider {
    /// Provider type name.
    pub type_name: String,
    /// Canonical absolute address; the plugin cache key.
    pub key: String,
}

impl InitProvider {
    pub(crate) async fn eval(&self, ctx: &EvalContext) -> EvalResult {
        ctx.init_provider(&self.type_name, &self.key).await?;
        Ok(())
    }
}

/// Evaluates the provider's configuration block, merging in any memoized
/// user input, and stores the result in the scratchpad.
#[derive(Debug, Clone)]
pub struct BuildProviderConfig {
    /// Address of the configuration being built.
    pub addr: AbsProviderConfig,
    /// The configuration block body (empty for implicit providers).
    pub body: Body,
}

impl BuildProviderConfig {
    pub(crate) async fn eval(&self, ctx: &EvalContext, scratch: &mut EvalScratch) -> EvalResult {
        let key = self.addr.to_string();
        let Some(schema) = ctx.provider_schema(&key) else {
            return Err(internal(format!("no schema cached for provider {key:?}")));
        };
        let (mut value, diags) = ctx.evaluate_block(&self.body, &schema.provider, None, None);
        if diags.has_errors() {
            return Err(EvalError::Fatal(diags));
        }

        // Input answers only ever fill attributes the configuration left
        // unset.
        if let (Some(input), Value::Map(entries)) =
            (ctx.provider_input(&self.addr.config), &mut value)
        {
            for (name, answer) in input {
                if entries.get(&name).is_none_or(Value::is_null) {
                    entries.insert(name, answer);
                }
            }
        }

        scratch.provider_config = Some(value);
        Ok(())
    }
}

/// Asks the provider to validate the configuration built earlier in the
/// tree. Problems are collected, not fatal, so one validate walk reports
/// everything.
#[derive(Debug, Clone)]
pub struct ValidateProvider {
    /// The plugin cache key.
    pub key: String,
}

impl ValidateProvider {
    pub(crate) async fn eval(&self, ctx: &EvalContext, scratch: &mut EvalScratch) -> EvalResult {
        let Some(provider) = ctx.provider(&self.key) else {
            return Err(internal(format!("provider {:?} not initialized", self.key)));
        };
        let config = scratch.provider_config.clone().unwrap_or(Value::Null);
        let diags = provider.validate_provider_config(&config).await?;
        if diags.is_empty() {
            Ok(())
        } else {
            Err(EvalError::NonFatal(diags))
        }
    }
}

/// Prompts the user for required provider attributes the configuration
/// leaves unset, memoizing the answers for later walks.
#[derive(Debug, Clone)]
pub struct InputProvider {
    /// Address of the provider configuration.
    pub addr: AbsProviderConfig,
}

impl InputProvider {
    pub(crate) async fn eval(&self, ctx: &EvalContext, scratch: &mut EvalScratch) -> EvalResult {
        let Some(input) = ctx.ui_input().cloned() else {
            return Ok(());
        };
        let key = self.addr.to_string();
        let Some(schema) = ctx.provider_schema(&key) else {
            return Err(internal(format!("no schema cached for provider {key:?}")));
        };
        let config = scratch.provider_config.clone().unwrap_or(Value::Null);
        let entries = config.as_map().cloned().unwrap_or_default();

        let mut answers = BTreeMap::new();
        for (name, attr) in &schema.provider.attributes {
            if !attr.required || attr.computed {
                continue;
            }
            if entries.get(name).is_some_and(|v| !v.is_null()) {
                continue;
            }
            ctx.check_stopped()?;
            let id = format!("{key}.{name}");
            let query = format!("value for {key} attribute {name:?}");
            if let Some(answer) = input.input(&id, &query).await? {
                answers.insert(name.clone(), Value::String(answer));
            }
        }

        if !answers.is_empty() {
            debug!(provider = %key, count = answers.len(), "memoizing provider input");
            ctx.set_provider_input(&self.addr.config, answers);
        }
        Ok(())
    }
}

/// Configures an initialized provider with the configuration built
/// earlier in the tree.
#[derive(Debug, Clone)]
pub struct ConfigureProvider {
    /// The plugin cache key.
    pub key: String,
}

impl ConfigureProvider {
    pub(crate) async fn eval(&self, ctx: &EvalContext, scratch: &mut EvalScratch) -> EvalResult {
        let config = scratch.provider_config.clone().unwrap_or(Value::Null);
        let diags = ctx.configure_provider(&self.key, &config).await?;
        if diags.has_errors() {
            return Err(EvalError::Fatal(diags));
        }
        if diags.is_empty() {
            Ok(())
        } else {
            Err(EvalError::NonFatal(diags))
        }
    }
}

/// Shuts a provider down once every consumer has finished.
#[derive(Debug, Clone)]
pub struct CloseProviderLeaf {
    /// The plugin cache key.
    pub key: String,
}

impl CloseProviderLeaf {
    pub(crate) async fn eval(&self, ctx: &EvalContext) -> EvalResult {
        ctx.close_provider(&self.key).await?;
        Ok(())
    }
}
