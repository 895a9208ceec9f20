//! Walk lifecycle hooks.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::addrs::AbsResource;
use crate::state::ChangeKind;

/// What a hook wants the walk to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookAction {
    /// Keep going.
    Continue,
    /// Wind the walk down early. Not an error.
    Halt,
}

/// Observes walk lifecycle events. All methods default to continuing, so
/// implementations override only what they care about.
pub trait Hook: Send + Sync {
    /// Called before refreshing an instance.
    fn pre_refresh(&self, _addr: &AbsResource) -> HookAction {
        HookAction::Continue
    }

    /// Called after refreshing an instance.
    fn post_refresh(&self, _addr: &AbsResource) -> HookAction {
        HookAction::Continue
    }

    /// Called before planning an instance.
    fn pre_diff(&self, _addr: &AbsResource) -> HookAction {
        HookAction::Continue
    }

    /// Called after planning an instance, with the planned change kind.
    fn post_diff(&self, _addr: &AbsResource, _change: ChangeKind) -> HookAction {
        HookAction::Continue
    }

    /// Called before applying a change to an instance.
    fn pre_apply(&self, _addr: &AbsResource, _change: ChangeKind) -> HookAction {
        HookAction::Continue
    }

    /// Called after applying a change, with the error message if the
    /// apply failed.
    fn post_apply(&self, _addr: &AbsResource, _error: Option<&str>) -> HookAction {
        HookAction::Continue
    }

    /// Called before running a provisioner.
    fn pre_provision(&self, _addr: &AbsResource, _type_name: &str) -> HookAction {
        HookAction::Continue
    }

    /// Called after running a provisioner.
    fn post_provision(&self, _addr: &AbsResource, _type_name: &str) -> HookAction {
        HookAction::Continue
    }

    /// Receives a line of provisioner output.
    fn provision_output(&self, _addr: &AbsResource, _type_name: &str, _line: &str) {}
}

/// A hook that counts lifecycle events; used by tests to observe apply
/// concurrency and by callers for progress summaries.
#[derive(Debug, Default)]
pub struct CountHook {
    pre_applies: AtomicUsize,
    post_applies: AtomicUsize,
    concurrent: AtomicUsize,
    peak_concurrent: AtomicUsize,
    applied: Mutex<Vec<String>>,
}

impl CountHook {
    /// Creates a zeroed counter hook.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of applies started.
    #[must_use]
    pub fn pre_apply_count(&self) -> usize {
        self.pre_applies.load(Ordering::SeqCst)
    }

    /// Number of applies finished.
    #[must_use]
    pub fn post_apply_count(&self) -> usize {
        self.post_applies.load(Ordering::SeqCst)
    }

    /// Highest number of applies observed in flight at once.
    #[must_use]
    pub fn peak_concurrent(&self) -> usize {
        self.peak_concurrent.load(Ordering::SeqCst)
    }

    /// Addresses applied, in completion order.
    #[must_use]
    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Hook for CountHook {
    fn pre_apply(&self, _addr: &AbsResource, _change: ChangeKind) -> HookAction {
        self.pre_applies.fetch_add(1, Ordering::SeqCst);
        let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_concurrent.fetch_max(now, Ordering::SeqCst);
        HookAction::Continue
    }

    fn post_apply(&self, addr: &AbsResource, _error: Option<&str>) -> HookAction {
        self.post_applies.fetch_add(1, Ordering::SeqCst);
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(addr.to_string());
        HookAction::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ModulePath, Resource};

    #[test]
    fn test_count_hook_tracks_applies() {
        let hook = CountHook::new();
        let addr = Resource::managed("p_thing", "a").absolute(ModulePath::root());
        hook.pre_apply(&addr, ChangeKind::Create);
        hook.pre_apply(&addr, ChangeKind::Create);
        hook.post_apply(&addr, None);
        hook.post_apply(&addr, None);
        assert_eq!(hook.pre_apply_count(), 2);
        assert_eq!(hook.post_apply_count(), 2);
        assert_eq!(hook.peak_concurrent(), 2);
        assert_eq!(hook.applied().len(), 2);
    }
}
