//! In-memory plugin doubles for tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::diag::{Diagnostic, Diagnostics};
use crate::error::{Result, SkeinError};
use crate::lang::Value;

use super::{
    ComponentFactory, OutputSink, Provider, ProviderSchema, Provisioner, UiInput,
};

/// A scriptable in-memory provider.
///
/// Planning echoes the proposed value; applying materializes unknown
/// attributes with deterministic placeholders so a second plan against the
/// applied state is empty. Every call is recorded for assertions.
#[derive(Debug, Default)]
pub struct MockProvider {
    schema: ProviderSchema,
    calls: Mutex<Vec<String>>,
    configured: Mutex<Option<Value>>,
    apply_counter: AtomicUsize,
    validate_error: Option<String>,
    plan_error: Option<String>,
    apply_error: Option<String>,
    apply_delay_ms: u64,
}

impl MockProvider {
    /// Creates a mock with the given schema.
    #[must_use]
    pub fn new(schema: ProviderSchema) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    /// Makes every validate call report the given error.
    #[must_use]
    pub fn with_validate_error(mut self, message: impl Into<String>) -> Self {
        self.validate_error = Some(message.into());
        self
    }

    /// Makes every plan call report the given error.
    #[must_use]
    pub fn with_plan_error(mut self, message: impl Into<String>) -> Self {
        self.plan_error = Some(message.into());
        self
    }

    /// Makes every apply call report the given error.
    #[must_use]
    pub fn with_apply_error(mut self, message: impl Into<String>) -> Self {
        self.apply_error = Some(message.into());
        self
    }

    /// Makes every apply call sleep first; tests use this to observe
    /// concurrency.
    #[must_use]
    pub const fn with_apply_delay_ms(mut self, millis: u64) -> Self {
        self.apply_delay_ms = millis;
        self
    }

    /// The recorded call log, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// The configuration value passed to `configure`, if any.
    #[must_use]
    pub fn configured_with(&self) -> Option<Value> {
        self.configured
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call.into());
    }

    fn scripted(error: &Option<String>) -> Diagnostics {
        error
            .as_ref()
            .map(|message| Diagnostics::from(Diagnostic::error(message.clone())))
            .unwrap_or_default()
    }

    /// Replaces unknown attributes with deterministic concrete values.
    fn materialize(&self, type_name: &str, value: &Value) -> Value {
        match value {
            Value::Unknown => {
                let n = self.apply_counter.fetch_add(1, Ordering::SeqCst) + 1;
                Value::String(format!("{type_name}-{n}"))
            }
            Value::List(items) => Value::List(
                items
                    .iter()
                    .map(|item| self.materialize(type_name, item))
                    .collect(),
            ),
            Value::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), self.materialize(type_name, v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn get_schema(&self) -> Result<ProviderSchema> {
        self.record("get_schema");
        Ok(self.schema.clone())
    }

    async fn validate_provider_config(&self, _config: &Value) -> Result<Diagnostics> {
        self.record("validate_provider_config");
        Ok(Self::scripted(&self.validate_error))
    }

    async fn validate_resource_type_config(
        &self,
        type_name: &str,
        _config: &Value,
    ) -> Result<Diagnostics> {
        self.record(format!("validate_resource_type_config:{type_name}"));
        Ok(Self::scripted(&self.validate_error))
    }

    async fn validate_data_source_config(
        &self,
        type_name: &str,
        _config: &Value,
    ) -> Result<Diagnostics> {
        self.record(format!("validate_data_source_config:{type_name}"));
        Ok(Self::scripted(&self.validate_error))
    }

    async fn configure(&self, config: &Value) -> Result<Diagnostics> {
        self.record("configure");
        *self.configured.lock().unwrap_or_else(|e| e.into_inner()) = Some(config.clone());
        Ok(Diagnostics::new())
    }

    async fn plan_resource_change(
        &self,
        type_name: &str,
        prior: &Value,
        proposed: &Value,
    ) -> Result<(Value, Diagnostics)> {
        self.record(format!("plan:{type_name}"));
        let diags = Self::scripted(&self.plan_error);
        if diags.has_errors() {
            return Ok((Value::Null, diags));
        }
        // Echo the proposal, preserving prior values for attributes the
        // proposal leaves unknown.
        let planned = match (proposed, prior) {
            (Value::Map(proposed_map), Value::Map(prior_map)) => {
                let mut merged = BTreeMap::new();
                for (name, value) in proposed_map {
                    let planned = match (value, prior_map.get(name)) {
                        (Value::Unknown, Some(known)) if !known.is_unknown() => known.clone(),
                        _ => value.clone(),
                    };
                    merged.insert(name.clone(), planned);
                }
                Value::Map(merged)
            }
            _ => proposed.clone(),
        };
        Ok((planned, diags))
    }

    async fn apply_resource_change(
        &self,
        type_name: &str,
        _prior: &Value,
        planned: &Value,
    ) -> Result<(Value, Diagnostics)> {
        self.record(format!("apply:{type_name}"));
        if self.apply_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.apply_delay_ms)).await;
        }
        let diags = Self::scripted(&self.apply_error);
        if diags.has_errors() {
            return Ok((Value::Null, diags));
        }
        if planned.is_null() {
            return Ok((Value::Null, diags));
        }
        Ok((self.materialize(type_name, planned), diags))
    }

    async fn read_resource(
        &self,
        type_name: &str,
        current: &Value,
    ) -> Result<(Value, Diagnostics)> {
        self.record(format!("read:{type_name}"));
        Ok((current.clone(), Diagnostics::new()))
    }

    async fn import_resource_state(
        &self,
        type_name: &str,
        id: &str,
    ) -> Result<(Vec<Value>, Diagnostics)> {
        self.record(format!("import:{type_name}:{id}"));
        let state = Value::Map(BTreeMap::from([(
            String::from("id"),
            Value::String(id.to_string()),
        )]));
        Ok((vec![state], Diagnostics::new()))
    }

    async fn read_data_source(
        &self,
        type_name: &str,
        config: &Value,
    ) -> Result<(Value, Diagnostics)> {
        self.record(format!("read_data:{type_name}"));
        let mut result = match config {
            Value::Map(entries) => entries.clone(),
            _ => BTreeMap::new(),
        };
        let n = self.apply_counter.fetch_add(1, Ordering::SeqCst) + 1;
        result
            .entry(String::from("id"))
            .and_modify(|v| {
                if v.is_unknown() || v.is_null() {
                    *v = Value::String(format!("{type_name}-{n}"));
                }
            })
            .or_insert_with(|| Value::String(format!("{type_name}-{n}")));
        Ok((Value::Map(result), Diagnostics::new()))
    }

    async fn stop(&self) -> Result<()> {
        self.record("stop");
        Ok(())
    }
}

/// A sink that collects provisioner output lines.
#[derive(Debug, Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<String>>,
}

impl CollectingSink {
    /// The collected lines.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl OutputSink for CollectingSink {
    fn output(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(line.to_string());
    }
}

/// A scriptable in-memory provisioner.
#[derive(Debug, Default)]
pub struct MockProvisioner {
    applies: AtomicUsize,
    fail: Option<String>,
}

impl MockProvisioner {
    /// Creates a provisioner that succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every apply report the given error.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            applies: AtomicUsize::new(0),
            fail: Some(message.into()),
        }
    }

    /// Number of apply calls so far.
    #[must_use]
    pub fn apply_count(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn validate_provisioner_config(&self, _config: &Value) -> Result<Diagnostics> {
        Ok(Diagnostics::new())
    }

    async fn apply(
        &self,
        _state: &Value,
        config: &Value,
        output: &dyn OutputSink,
    ) -> Result<Diagnostics> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        output.output(&format!("provisioning with {config}"));
        Ok(self
            .fail
            .as_ref()
            .map(|message| Diagnostics::from(Diagnostic::error(message.clone())))
            .unwrap_or_default())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

/// A factory dispensing registered mock plugins and counting how many
/// instances of each were requested.
#[derive(Default)]
pub struct MockFactory {
    providers: Mutex<BTreeMap<String, Arc<MockProvider>>>,
    provisioners: Mutex<BTreeMap<String, Arc<MockProvisioner>>>,
    provider_starts: Mutex<Vec<String>>,
}

impl MockFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider for a type name.
    #[must_use]
    pub fn with_provider(self, type_name: impl Into<String>, provider: Arc<MockProvider>) -> Self {
        self.providers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(type_name.into(), provider);
        self
    }

    /// Registers a provisioner for a type name.
    #[must_use]
    pub fn with_provisioner(
        self,
        type_name: impl Into<String>,
        provisioner: Arc<MockProvisioner>,
    ) -> Self {
        self.provisioners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(type_name.into(), provisioner);
        self
    }

    /// The (type, key) pairs providers were started with, in order.
    #[must_use]
    pub fn provider_starts(&self) -> Vec<String> {
        self.provider_starts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ComponentFactory for MockFactory {
    async fn provider(&self, type_name: &str, key: &str) -> Result<Arc<dyn Provider>> {
        self.provider_starts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("{type_name}@{key}"));
        let providers = self.providers.lock().unwrap_or_else(|e| e.into_inner());
        providers
            .get(type_name)
            .map(|p| Arc::clone(p) as Arc<dyn Provider>)
            .ok_or_else(|| {
                SkeinError::plugin(type_name, format!("no such provider plugin {type_name:?}"))
            })
    }

    async fn provisioner(&self, type_name: &str, _key: &str) -> Result<Arc<dyn Provisioner>> {
        let provisioners = self.provisioners.lock().unwrap_or_else(|e| e.into_inner());
        provisioners
            .get(type_name)
            .map(|p| Arc::clone(p) as Arc<dyn Provisioner>)
            .ok_or_else(|| {
                SkeinError::plugin(
                    type_name,
                    format!("no such provisioner plugin {type_name:?}"),
                )
            })
    }
}

/// A UI input source answering from a fixed table.
#[derive(Debug, Default)]
pub struct MapInput {
    answers: BTreeMap<String, String>,
}

impl MapInput {
    /// Creates an input source with the given answers keyed by query id.
    #[must_use]
    pub fn new(answers: BTreeMap<String, String>) -> Self {
        Self { answers }
    }
}

#[async_trait]
impl UiInput for MapInput {
    async fn input(&self, id: &str, _query: &str) -> Result<Option<String>> {
        Ok(self.answers.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AttrSchema, AttrType, BlockSchema};

    fn schema() -> ProviderSchema {
        ProviderSchema {
            provider: BlockSchema::new().with_attr("region", AttrSchema::optional(AttrType::String)),
            resource_types: BTreeMap::from([(
                String::from("p_thing"),
                BlockSchema::new()
                    .with_attr("name", AttrSchema::required(AttrType::String))
                    .with_attr("id", AttrSchema::computed(AttrType::String)),
            )]),
            data_sources: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_plan_preserves_known_prior_values() {
        let provider = MockProvider::new(schema());
        let prior = Value::Map(BTreeMap::from([
            (String::from("name"), Value::from("web")),
            (String::from("id"), Value::from("p_thing-1")),
        ]));
        let proposed = Value::Map(BTreeMap::from([
            (String::from("name"), Value::from("web")),
            (String::from("id"), Value::Unknown),
        ]));
        let (planned, diags) = provider
            .plan_resource_change("p_thing", &prior, &proposed)
            .await
            .expect("plan");
        assert!(!diags.has_errors());
        let map = planned.as_map().expect("map");
        assert_eq!(map.get("id"), Some(&Value::from("p_thing-1")));
    }

    #[tokio::test]
    async fn test_apply_materializes_unknowns() {
        let provider = MockProvider::new(schema());
        let planned = Value::Map(BTreeMap::from([
            (String::from("name"), Value::from("web")),
            (String::from("id"), Value::Unknown),
        ]));
        let (applied, _) = provider
            .apply_resource_change("p_thing", &Value::Null, &planned)
            .await
            .expect("apply");
        let map = applied.as_map().expect("map");
        assert_eq!(map.get("id"), Some(&Value::from("p_thing-1")));
        assert!(!applied.contains_unknown());
    }

    #[tokio::test]
    async fn test_factory_rejects_unknown_type() {
        let factory = MockFactory::new();
        let err = factory.provider("nope", "provider.nope").await;
        assert!(matches!(err, Err(SkeinError::Plugin { .. })));
    }

    #[tokio::test]
    async fn test_provisioner_streams_output() {
        let provisioner = MockProvisioner::new();
        let sink = CollectingSink::default();
        let diags = provisioner
            .apply(&Value::Null, &Value::from("cfg"), &sink)
            .await
            .expect("apply");
        assert!(!diags.has_errors());
        assert_eq!(provisioner.apply_count(), 1);
        assert_eq!(sink.lines().len(), 1);
    }
}
