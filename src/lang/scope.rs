//! Reference resolution within a module instance scope.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use crate::addrs::{ModulePath, Reference, Referenceable};
use crate::config::BlockSchema;
use crate::diag::{Diagnostic, Diagnostics};
use crate::lang::shim::unflatten_attrs;
use crate::state::SharedState;

use super::expr::{Body, Expr};
use super::value::Value;

/// Values shared by every scope in a walk: resolved input variables and
/// locals per module, the state, and engine metadata.
///
/// Variable and local maps are written by the corresponding graph vertices
/// and read by every downstream evaluation; reference edges guarantee the
/// writes happen first.
pub struct ScopeData {
    state: SharedState,
    workspace: String,
    variables: Mutex<HashMap<String, BTreeMap<String, Value>>>,
    locals: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl ScopeData {
    /// Creates scope data over the given shared state.
    #[must_use]
    pub fn new(state: SharedState, workspace: impl Into<String>) -> Self {
        Self {
            state,
            workspace: workspace.into(),
            variables: Mutex::new(HashMap::new()),
            locals: Mutex::new(HashMap::new()),
        }
    }

    /// The shared state this scope reads resource values from.
    #[must_use]
    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Merges input variable values for a module instance; later writes
    /// shadow earlier ones per key.
    pub fn merge_variables(&self, module: &ModulePath, values: BTreeMap<String, Value>) {
        let mut variables = self.variables.lock().unwrap_or_else(|e| e.into_inner());
        variables
            .entry(module.to_string())
            .or_default()
            .extend(values);
    }

    /// Records the evaluated value of a local.
    pub fn set_local(&self, module: &ModulePath, name: impl Into<String>, value: Value) {
        let mut locals = self.locals.lock().unwrap_or_else(|e| e.into_inner());
        locals
            .entry(module.to_string())
            .or_default()
            .insert(name.into(), value);
    }

    /// Looks up an input variable value for a module instance.
    #[must_use]
    pub fn variable(&self, module: &ModulePath, name: &str) -> Option<Value> {
        let variables = self.variables.lock().unwrap_or_else(|e| e.into_inner());
        variables.get(&module.to_string())?.get(name).cloned()
    }

    fn local(&self, module: &ModulePath, name: &str) -> Option<Value> {
        let locals = self.locals.lock().unwrap_or_else(|e| e.into_inner());
        locals.get(&module.to_string())?.get(name).cloned()
    }

    /// Creates an evaluation scope for a module instance.
    #[must_use]
    pub fn scope<'a>(&'a self, module: &'a ModulePath) -> Scope<'a> {
        Scope {
            data: self,
            module,
            self_value: None,
            count_index: None,
            each: None,
        }
    }
}

/// An evaluation scope: scope data bound to a module instance, an optional
/// `self` value, and optional iterator bindings.
pub struct Scope<'a> {
    data: &'a ScopeData,
    module: &'a ModulePath,
    self_value: Option<&'a Value>,
    count_index: Option<u64>,
    each: Option<(String, Value)>,
}

impl<'a> Scope<'a> {
    /// Binds the `self` value for the object currently being evaluated.
    #[must_use]
    pub fn with_self(mut self, value: &'a Value) -> Self {
        self.self_value = Some(value);
        self
    }

    /// Binds `count.index` for per-instance evaluation.
    #[must_use]
    pub const fn with_count_index(mut self, index: u64) -> Self {
        self.count_index = Some(index);
        self
    }

    /// Binds `each.key` and `each.value` for keyed expansion.
    #[must_use]
    pub fn with_each(mut self, key: impl Into<String>, value: Value) -> Self {
        self.each = Some((key.into(), value));
        self
    }

    /// Evaluates a single expression.
    #[must_use]
    pub fn eval_expr(&self, expr: &Expr) -> (Value, Diagnostics) {
        let mut diags = Diagnostics::new();
        let value = self.eval(expr, &mut diags);
        (value, diags)
    }

    /// Evaluates every attribute of a body.
    #[must_use]
    pub fn eval_body(&self, body: &Body) -> (BTreeMap<String, Value>, Diagnostics) {
        let mut diags = Diagnostics::new();
        let mut out = BTreeMap::new();
        for (name, expr) in body {
            out.insert(name.clone(), self.eval(expr, &mut diags));
        }
        (out, diags)
    }

    /// Evaluates a body and shapes the result to the given schema,
    /// producing an object value that conforms to it.
    #[must_use]
    pub fn eval_block(&self, body: &Body, schema: &BlockSchema) -> (Value, Diagnostics) {
        let (evaluated, mut diags) = self.eval_body(body);
        let (value, conform_diags) = schema.conform(evaluated);
        diags.extend(conform_diags);
        (value, diags)
    }

    fn eval(&self, expr: &Expr, diags: &mut Diagnostics) -> Value {
        match expr {
            Expr::Literal(value) => value.clone(),
            Expr::Ref(reference) => self.resolve(reference, diags),
            Expr::List(items) => {
                Value::List(items.iter().map(|e| self.eval(e, diags)).collect())
            }
            Expr::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, e)| (k.clone(), self.eval(e, diags)))
                    .collect(),
            ),
            Expr::Template(parts) => {
                let mut rendered = String::new();
                for part in parts {
                    let value = self.eval(part, diags);
                    if value.contains_unknown() {
                        return Value::Unknown;
                    }
                    rendered.push_str(&value.to_string());
                }
                Value::String(rendered)
            }
        }
    }

    /// Resolves a single reference to a value. Unresolvable references
    /// yield `Null` alongside an error diagnostic; values that merely are
    /// not known yet yield `Unknown` without a diagnostic.
    pub fn resolve(&self, reference: &Reference, diags: &mut Diagnostics) -> Value {
        let base = match &reference.subject {
            Referenceable::InputVariable { name } => {
                match self.data.variable(self.module, name) {
                    Some(value) => value,
                    None => {
                        diags.push(
                            Diagnostic::error(format!(
                                "reference to undeclared input variable \"var.{name}\""
                            ))
                            .with_subject(reference.to_string()),
                        );
                        return Value::Null;
                    }
                }
            }
            Referenceable::LocalValue { name } => match self.data.local(self.module, name) {
                Some(value) => value,
                None => {
                    diags.push(
                        Diagnostic::error(format!(
                            "reference to undeclared local value \"local.{name}\""
                        ))
                        .with_subject(reference.to_string()),
                    );
                    return Value::Null;
                }
            },
            Referenceable::Resource { resource, key } => {
                let state = self
                    .data
                    .state
                    .read()
                    .unwrap_or_else(|e| e.into_inner());
                let Some(module) = state.module(self.module) else {
                    return Value::Unknown;
                };
                let mut local_key = resource.to_string();
                if let Some(key) = key {
                    local_key.push_str(&key.to_string());
                }
                // An unkeyed reference to a counted resource falls back to
                // the first instance.
                let resource_state = module
                    .resources
                    .get(&local_key)
                    .or_else(|| module.resources.get(&format!("{resource}[0]")));
                let Some(resource_state) = resource_state else {
                    return Value::Unknown;
                };
                let Some(instance) = &resource_state.primary else {
                    return Value::Unknown;
                };
                let mut value = unflatten_attrs(&instance.attributes);
                if let Value::Map(entries) = &mut value {
                    entries
                        .entry(String::from("id"))
                        .or_insert_with(|| Value::String(instance.id.clone()));
                }
                value
            }
            Referenceable::ModuleCallOutput { call, name } => {
                let child = self.module.child(call.clone(), None);
                let state = self
                    .data
                    .state
                    .read()
                    .unwrap_or_else(|e| e.into_inner());
                match state.module(&child).and_then(|m| m.outputs.get(name)) {
                    Some(value) => value.clone(),
                    None => return Value::Unknown,
                }
            }
            Referenceable::PathAttr { name } => match name.as_str() {
                "module" => Value::String(self.module.to_string()),
                "root" => Value::String(String::new()),
                other => {
                    diags.push(Diagnostic::error(format!(
                        "unsupported path attribute \"path.{other}\""
                    )));
                    return Value::Null;
                }
            },
            Referenceable::EngineMeta { name } => match name.as_str() {
                "workspace" => Value::String(self.data.workspace.clone()),
                other => {
                    diags.push(Diagnostic::error(format!(
                        "unsupported engine attribute \"skein.{other}\""
                    )));
                    return Value::Null;
                }
            },
            Referenceable::CountAttr { name } => match (name.as_str(), self.count_index) {
                ("index", Some(index)) => Value::from(index),
                ("index", None) => {
                    diags.push(Diagnostic::error(
                        "\"count.index\" used outside of a counted resource",
                    ));
                    return Value::Null;
                }
                (other, _) => {
                    diags.push(Diagnostic::error(format!(
                        "unsupported count attribute \"count.{other}\""
                    )));
                    return Value::Null;
                }
            },
            Referenceable::EachAttr { name } => match (&self.each, name.as_str()) {
                (Some((key, _)), "key") => Value::String(key.clone()),
                (Some((_, value)), "value") => value.clone(),
                (None, _) => {
                    diags.push(Diagnostic::error(
                        "\"each\" used outside of a keyed expansion",
                    ));
                    return Value::Null;
                }
                (_, other) => {
                    diags.push(Diagnostic::error(format!(
                        "unsupported each attribute \"each.{other}\""
                    )));
                    return Value::Null;
                }
            },
        };

        match base.traverse(&reference.attr_path) {
            Some(value) => value,
            // The attribute may exist only after apply; treat a missing
            // path into an existing object as not-yet-known.
            None => Value::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{InstanceState, ResourceState, State, shared_state};

    fn data_with_state() -> ScopeData {
        let mut state = State::new();
        let module = state.module_mut(&ModulePath::root());
        module.resources.insert(
            String::from("p_thing.a"),
            ResourceState {
                provider: Some(String::from("provider.p")),
                dependencies: vec![],
                primary: Some(InstanceState::new(
                    "i-1",
                    BTreeMap::from([(String::from("name"), String::from("web"))]),
                )),
                deposed: BTreeMap::new(),
            },
        );
        ScopeData::new(shared_state(state), "default")
    }

    #[test]
    fn test_variable_resolution_and_shadowing() {
        let data = data_with_state();
        let root = ModulePath::root();
        data.merge_variables(&root, BTreeMap::from([(String::from("x"), Value::from("1"))]));
        data.merge_variables(&root, BTreeMap::from([(String::from("x"), Value::from("2"))]));
        let scope = data.scope(&root);
        let (value, diags) = scope.eval_expr(&Expr::parse_ref("var.x").expect("ref"));
        assert!(diags.is_empty());
        assert_eq!(value, Value::from("2"));
    }

    #[test]
    fn test_undeclared_variable_is_an_error() {
        let data = data_with_state();
        let root = ModulePath::root();
        let scope = data.scope(&root);
        let (_, diags) = scope.eval_expr(&Expr::parse_ref("var.missing").expect("ref"));
        assert!(diags.has_errors());
    }

    #[test]
    fn test_resource_reference_reads_state() {
        let data = data_with_state();
        let root = ModulePath::root();
        let scope = data.scope(&root);
        let (value, diags) = scope.eval_expr(&Expr::parse_ref("p_thing.a.id").expect("ref"));
        assert!(diags.is_empty());
        assert_eq!(value, Value::from("i-1"));

        let (value, _) = scope.eval_expr(&Expr::parse_ref("p_thing.a.name").expect("ref"));
        assert_eq!(value, Value::from("web"));
    }

    #[test]
    fn test_missing_resource_is_unknown_not_error() {
        let data = data_with_state();
        let root = ModulePath::root();
        let scope = data.scope(&root);
        let (value, diags) = scope.eval_expr(&Expr::parse_ref("p_thing.nope.id").expect("ref"));
        assert!(diags.is_empty());
        assert!(value.is_unknown());
    }

    #[test]
    fn test_workspace_and_count_index() {
        let data = data_with_state();
        let root = ModulePath::root();
        let scope = data.scope(&root).with_count_index(3);
        let (value, _) = scope.eval_expr(&Expr::parse_ref("skein.workspace").expect("ref"));
        assert_eq!(value, Value::from("default"));
        let (value, _) = scope.eval_expr(&Expr::parse_ref("count.index").expect("ref"));
        assert_eq!(value, Value::from(3_u64));
    }

    #[test]
    fn test_each_bindings_resolve() {
        let data = data_with_state();
        let root = ModulePath::root();
        let scope = data
            .scope(&root)
            .with_each("primary", Value::from("10.0.0.0/16"));
        let (key, _) = scope.eval_expr(&Expr::parse_ref("each.key").expect("ref"));
        assert_eq!(key, Value::from("primary"));
        let (value, _) = scope.eval_expr(&Expr::parse_ref("each.value").expect("ref"));
        assert_eq!(value, Value::from("10.0.0.0/16"));

        let bare = data.scope(&root);
        let (_, diags) = bare.eval_expr(&Expr::parse_ref("each.key").expect("ref"));
        assert!(diags.has_errors());
    }

    #[test]
    fn test_template_concatenates_or_goes_unknown() {
        let data = data_with_state();
        let root = ModulePath::root();
        let scope = data.scope(&root);
        let (value, _) = scope.eval_expr(&Expr::Template(vec![
            Expr::lit("name-"),
            Expr::parse_ref("p_thing.a.name").expect("ref"),
        ]));
        assert_eq!(value, Value::from("name-web"));

        let (value, _) = scope.eval_expr(&Expr::Template(vec![
            Expr::lit("name-"),
            Expr::parse_ref("p_thing.nope.id").expect("ref"),
        ]));
        assert!(value.is_unknown());
    }
}
