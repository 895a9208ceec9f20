//! Provider and provisioner plugin contracts.
//!
//! Providers run out of process behind an RPC transport; the engine
//! consumes them through the async traits here and never sees the wire.
//! The handshake constants and dynamic-value codec the transport uses are
//! in [`handshake`]; [`mock`] has in-memory implementations for tests.

pub mod handshake;
pub mod mock;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BlockSchema;
use crate::diag::Diagnostics;
use crate::error::Result;
use crate::lang::Value;

/// Everything a provider knows how to describe: its own configuration
/// block plus one schema per resource type and data source.
#[derive(Debug, Clone, Default)]
pub struct ProviderSchema {
    /// Schema of the provider configuration block.
    pub provider: BlockSchema,
    /// Managed resource type name → block schema.
    pub resource_types: BTreeMap<String, BlockSchema>,
    /// Data source type name → block schema.
    pub data_sources: BTreeMap<String, BlockSchema>,
}

impl ProviderSchema {
    /// Looks up the schema for a resource type or data source.
    #[must_use]
    pub fn schema_for(&self, type_name: &str, data_source: bool) -> Option<&BlockSchema> {
        if data_source {
            self.data_sources.get(type_name)
        } else {
            self.resource_types.get(type_name)
        }
    }
}

/// A provider plugin: the party responsible for one type-namespace of
/// resources.
///
/// State values cross this boundary as typed [`Value`]s; `Null` stands for
/// "no instance". Methods return provider-reported problems as
/// diagnostics; a hard `Err` means the plugin itself failed.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider's full schema.
    async fn get_schema(&self) -> Result<ProviderSchema>;

    /// Validates the provider configuration block.
    async fn validate_provider_config(&self, config: &Value) -> Result<Diagnostics>;

    /// Validates the configuration of one managed resource.
    async fn validate_resource_type_config(
        &self,
        type_name: &str,
        config: &Value,
    ) -> Result<Diagnostics>;

    /// Validates the configuration of one data source.
    async fn validate_data_source_config(
        &self,
        type_name: &str,
        config: &Value,
    ) -> Result<Diagnostics>;

    /// Configures the provider. Called at most once per walk, after
    /// validation.
    async fn configure(&self, config: &Value) -> Result<Diagnostics>;

    /// Plans a change from `prior` to `proposed`, returning the planned
    /// new state (which may contain unknown values).
    async fn plan_resource_change(
        &self,
        type_name: &str,
        prior: &Value,
        proposed: &Value,
    ) -> Result<(Value, Diagnostics)>;

    /// Applies a planned change, returning the new state (`Null` when the
    /// instance was destroyed).
    async fn apply_resource_change(
        &self,
        type_name: &str,
        prior: &Value,
        planned: &Value,
    ) -> Result<(Value, Diagnostics)>;

    /// Reads the current remote state of an instance (`Null` when it no
    /// longer exists).
    async fn read_resource(&self, type_name: &str, current: &Value) -> Result<(Value, Diagnostics)>;

    /// Imports existing instances by opaque id.
    async fn import_resource_state(
        &self,
        type_name: &str,
        id: &str,
    ) -> Result<(Vec<Value>, Diagnostics)>;

    /// Reads a data source.
    async fn read_data_source(
        &self,
        type_name: &str,
        config: &Value,
    ) -> Result<(Value, Diagnostics)>;

    /// Asks the provider to wind down any in-flight work.
    async fn stop(&self) -> Result<()>;
}

/// Receives line-oriented output streamed by a provisioner.
pub trait OutputSink: Send + Sync {
    /// Receives one line of provisioner output.
    fn output(&self, line: &str);
}

/// A provisioner plugin.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Validates the provisioner configuration block.
    async fn validate_provisioner_config(&self, config: &Value) -> Result<Diagnostics>;

    /// Runs the provisioner against a newly-created instance, streaming
    /// output lines to the sink.
    async fn apply(
        &self,
        state: &Value,
        config: &Value,
        output: &dyn OutputSink,
    ) -> Result<Diagnostics>;

    /// Asks the provisioner to wind down any in-flight work.
    async fn stop(&self) -> Result<()>;
}

/// Resolves plugin instances for a walk. The evaluation context calls this
/// once per (type, key) pair and owns the instance for the walk's
/// lifetime.
#[async_trait]
pub trait ComponentFactory: Send + Sync {
    /// Starts (or dispenses) a provider instance of the given type. The
    /// key is the canonical absolute provider configuration address.
    async fn provider(&self, type_name: &str, key: &str) -> Result<Arc<dyn Provider>>;

    /// Starts (or dispenses) a provisioner instance of the given type.
    async fn provisioner(&self, type_name: &str, key: &str) -> Result<Arc<dyn Provisioner>>;
}

/// Asks the user for a value during the input walk.
#[async_trait]
pub trait UiInput: Send + Sync {
    /// Prompts for a single value. `None` means the user declined.
    async fn input(&self, id: &str, query: &str) -> Result<Option<String>>;
}
