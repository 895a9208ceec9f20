//! Eval tree structure and operation filtering.

use super::provider::{
    BuildProviderConfig, CloseProviderLeaf, ConfigureProvider, InitProvider, InputProvider,
    ValidateProvider,
};
use super::resource::{
    ApplyResource, DestroyResource, PlanDestroyResource, PlanResource, ReadDataSource,
    RefreshResource, ValidateResource,
};
use super::values::{
    CountBoundaryFixup, EvalLocal, EvalModuleVariable, EvalOutput, ModuleRemovedCleanup,
};

/// The operation a walk is performing. Eval trees carry `OpFilter` nodes
/// that restrict subtrees to particular operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOperation {
    /// Gather provider input from the user.
    Input,
    /// Validate configuration without touching state or plugins' remote
    /// objects.
    Validate,
    /// Reconcile recorded state with remote reality.
    Refresh,
    /// Compute a diff for creation and update.
    Plan,
    /// Compute a pure-destroy diff.
    PlanDestroy,
    /// Execute a computed diff.
    Apply,
}

impl std::fmt::Display for WalkOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Input => "input",
            Self::Validate => "validate",
            Self::Refresh => "refresh",
            Self::Plan => "plan",
            Self::PlanDestroy => "plan-destroy",
            Self::Apply => "apply",
        };
        write!(f, "{s}")
    }
}

/// A node in an eval tree.
#[derive(Debug, Clone)]
pub enum EvalNode {
    /// Executes children in order, stopping at the first error.
    Sequence(Vec<EvalNode>),
    /// Executes the inner node only when the walk operation is listed.
    OpFilter {
        /// Operations the subtree participates in.
        ops: Vec<WalkOperation>,
        /// The filtered subtree.
        node: Box<EvalNode>,
    },
    /// Does nothing.
    Noop,
    /// A domain-specific leaf.
    Leaf(Box<EvalLeaf>),
}

impl EvalNode {
    /// Convenience constructor for a sequence.
    #[must_use]
    pub fn sequence(nodes: Vec<Self>) -> Self {
        Self::Sequence(nodes)
    }

    /// Convenience constructor for an operation filter.
    #[must_use]
    pub fn op_filter(ops: &[WalkOperation], node: Self) -> Self {
        Self::OpFilter {
            ops: ops.to_vec(),
            node: Box::new(node),
        }
    }

    /// Wraps a leaf.
    #[must_use]
    pub fn leaf(leaf: EvalLeaf) -> Self {
        Self::Leaf(Box::new(leaf))
    }

    /// Prunes the tree down to the parts participating in `op`.
    #[must_use]
    pub fn filter(self, op: WalkOperation) -> Self {
        match self {
            Self::OpFilter { ops, node } => {
                if ops.contains(&op) {
                    node.filter(op)
                } else {
                    Self::Noop
                }
            }
            Self::Sequence(children) => {
                Self::Sequence(children.into_iter().map(|c| c.filter(op)).collect())
            }
            other => other,
        }
    }
}

/// Every domain-specific leaf. Execution dispatches on this tag.
#[derive(Debug, Clone)]
pub enum EvalLeaf {
    /// Starts a provider plugin and caches its schema.
    InitProvider(InitProvider),
    /// Evaluates a provider configuration block into the scratchpad.
    BuildProviderConfig(BuildProviderConfig),
    /// Asks the provider to validate its configuration.
    ValidateProvider(ValidateProvider),
    /// Prompts for missing provider configuration and memoizes it.
    InputProvider(InputProvider),
    /// Configures an initialized provider.
    ConfigureProvider(ConfigureProvider),
    /// Shuts a provider down after its last consumer.
    CloseProvider(CloseProviderLeaf),
    /// Validates a resource's configuration.
    ValidateResource(ValidateResource),
    /// Refreshes recorded instances from the remote system.
    RefreshResource(RefreshResource),
    /// Reads a data source into state (or defers it into the diff).
    ReadDataSource(ReadDataSource),
    /// Plans creation/update changes for a resource.
    PlanResource(PlanResource),
    /// Plans destruction of everything recorded for a resource.
    PlanDestroyResource(PlanDestroyResource),
    /// Applies creation/update changes.
    ApplyResource(ApplyResource),
    /// Applies destruction changes.
    DestroyResource(DestroyResource),
    /// Evaluates (or removes) an output value.
    EvalOutput(EvalOutput),
    /// Evaluates a local value into the scope cache.
    EvalLocal(EvalLocal),
    /// Evaluates a child-module input variable at its call site.
    EvalModuleVariable(EvalModuleVariable),
    /// Normalizes state keys for resources that gained or lost `count`.
    CountBoundaryFixup(CountBoundaryFixup),
    /// Removes the state of a module no longer in configuration.
    ModuleRemovedCleanup(ModuleRemovedCleanup),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::ModulePath;

    fn marker() -> EvalNode {
        EvalNode::leaf(EvalLeaf::ModuleRemovedCleanup(ModuleRemovedCleanup {
            module: ModulePath::root(),
        }))
    }

    #[test]
    fn test_filter_prunes_foreign_ops() {
        let tree = EvalNode::sequence(vec![
            EvalNode::op_filter(&[WalkOperation::Apply], marker()),
            EvalNode::op_filter(&[WalkOperation::Plan, WalkOperation::Validate], marker()),
        ]);
        let filtered = tree.filter(WalkOperation::Plan);
        let EvalNode::Sequence(children) = filtered else {
            panic!("expected sequence");
        };
        assert!(matches!(children[0], EvalNode::Noop));
        assert!(matches!(children[1], EvalNode::Leaf(_)));
    }

    #[test]
    fn test_filter_recurses_through_nested_filters() {
        let tree = EvalNode::op_filter(
            &[WalkOperation::Apply, WalkOperation::Plan],
            EvalNode::op_filter(&[WalkOperation::Apply], marker()),
        );
        assert!(matches!(
            tree.clone().filter(WalkOperation::Plan),
            EvalNode::Noop
        ));
        assert!(matches!(
            tree.filter(WalkOperation::Apply),
            EvalNode::Leaf(_)
        ));
    }
}
