//! Resource kind → hook table

use std::collections::BTreeMap;

use tracing::warn;

use super::{DeploymentHook, Hook, Operation, PodHook, ResourceKind};

/// How a request for a registered kind should be handled
pub enum Dispatch<'a> {
    /// The hook evaluates this operation
    Evaluate(&'a dyn Hook),
    /// The hook does not police this operation; the request is allowed as-is
    Unhandled,
}

/// Immutable mapping from resource kind to its hook.
///
/// Built once at startup and shared read-only between requests.
#[derive(Default)]
pub struct HookRegistry {
    hooks: BTreeMap<ResourceKind, Box<dyn Hook>>,
}

impl HookRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in deployment and pod policies
    pub fn builtin() -> Self {
        Self::new().with_hook(DeploymentHook).with_hook(PodHook)
    }

    /// Add `hook` under its own kind, replacing any earlier registration
    #[must_use]
    pub fn with_hook(mut self, hook: impl Hook + 'static) -> Self {
        let kind = hook.kind();
        if self.hooks.insert(kind, Box::new(hook)).is_some() {
            warn!(kind = %kind, "Replacing previously registered hook");
        }
        self
    }

    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        self.hooks.keys().copied()
    }

    pub fn contains(&self, kind: ResourceKind) -> bool {
        self.hooks.contains_key(&kind)
    }

    /// Find what to do with `operation` on `kind`. `None` means no hook is
    /// registered for the kind at all.
    pub fn dispatch(&self, kind: ResourceKind, operation: &Operation) -> Option<Dispatch<'_>> {
        let hook = self.hooks.get(&kind)?;
        if hook.operations().contains(operation) {
            Some(Dispatch::Evaluate(hook.as_ref()))
        } else {
            Some(Dispatch::Unhandled)
        }
    }
}
