//! Eval tree execution.

use std::future::Future;
use std::pin::Pin;

use crate::diag::Diagnostics;
use crate::engine::EvalContext;
use crate::error::SkeinError;
use crate::lang::Value;

use super::node::{EvalLeaf, EvalNode};

/// How a (sub)tree execution ended, when not cleanly.
#[derive(Debug)]
pub enum EvalError {
    /// The vertex failed; its transitive dependents must not run.
    Fatal(Diagnostics),
    /// Diagnostics to accumulate without failing the vertex.
    NonFatal(Diagnostics),
    /// A hook asked the walk to wind down; not an error.
    EarlyExit,
}

impl From<SkeinError> for EvalError {
    fn from(err: SkeinError) -> Self {
        Self::Fatal(err.into_diagnostics())
    }
}

/// Result of executing an eval (sub)tree.
pub type EvalResult = Result<(), EvalError>;

/// Values shared between leaves of a single vertex's tree.
#[derive(Debug, Default)]
pub struct EvalScratch {
    /// The evaluated provider configuration, produced by
    /// `BuildProviderConfig` and consumed by the validate / input /
    /// configure leaves that follow it.
    pub provider_config: Option<Value>,
}

/// Executes an eval tree against a context.
pub fn eval<'a>(
    node: &'a EvalNode,
    ctx: &'a EvalContext,
    scratch: &'a mut EvalScratch,
) -> Pin<Box<dyn Future<Output = EvalResult> + Send + 'a>> {
    Box::pin(async move {
        match node {
            EvalNode::Noop => Ok(()),
            EvalNode::Sequence(children) => {
                for child in children {
                    eval(child, ctx, scratch).await?;
                }
                Ok(())
            }
            // Unfiltered trees may still carry filters; treat them as
            // transparent (the walker filters before executing).
            EvalNode::OpFilter { node, .. } => eval(node, ctx, scratch).await,
            EvalNode::Leaf(leaf) => eval_leaf(leaf, ctx, scratch).await,
        }
    })
}

async fn eval_leaf(leaf: &EvalLeaf, ctx: &EvalContext, scratch: &mut EvalScratch) -> EvalResult {
    match leaf {
        EvalLeaf::InitProvider(leaf) => leaf.eval(ctx).await,
        EvalLeaf::BuildProviderConfig(leaf) => leaf.eval(ctx, scratch).await,
        EvalLeaf::ValidateProvider(leaf) => leaf.eval(ctx, scratch).await,
        EvalLeaf::InputProvider(leaf) => leaf.eval(ctx, scratch).await,
        EvalLeaf::ConfigureProvider(leaf) => leaf.eval(ctx, scratch).await,
        EvalLeaf::CloseProvider(leaf) => leaf.eval(ctx).await,
        EvalLeaf::ValidateResource(leaf) => leaf.eval(ctx).await,
        EvalLeaf::RefreshResource(leaf) => leaf.eval(ctx).await,
        EvalLeaf::ReadDataSource(leaf) => leaf.eval(ctx).await,
        EvalLeaf::PlanResource(leaf) => leaf.eval(ctx).await,
        EvalLeaf::PlanDestroyResource(leaf) => leaf.eval(ctx).await,
        EvalLeaf::ApplyResource(leaf) => leaf.eval(ctx).await,
        EvalLeaf::DestroyResource(leaf) => leaf.eval(ctx).await,
        EvalLeaf::EvalOutput(leaf) => leaf.eval(ctx),
        EvalLeaf::EvalLocal(leaf) => leaf.eval(ctx),
        EvalLeaf::EvalModuleVariable(leaf) => leaf.eval(ctx),
        EvalLeaf::CountBoundaryFixup(leaf) => leaf.eval(ctx),
        EvalLeaf::ModuleRemovedCleanup(leaf) => leaf.eval(ctx),
    }
}

/// Wraps a diagnostics bundle as a fatal eval error.
#[must_use]
pub(crate) fn fatal(diags: Diagnostics) -> EvalError {
    EvalError::Fatal(diags)
}

/// Builds a fatal internal error, for invariant violations.
#[must_use]
pub(crate) fn internal(message: impl Into<String>) -> EvalError {
    EvalError::Fatal(SkeinError::internal(message).into_diagnostics())
}
