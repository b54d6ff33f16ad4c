//! Session hook points.
//!
//! Plugins are a fixed vector of [`SessionHook`] implementations held by
//! the session and dispatched at named pipeline points. Every method has
//! a no-op default, so a hook implements only what it cares about.

use crate::case::Case;
use crate::config::SessionConfig;
use crate::generator::Generator;
use crate::graph::CaseGraph;

/// One plugin. All methods are optional.
pub trait SessionHook: Send + Sync {
    /// The session has been configured, before discovery.
    fn session_initialize(&self, _config: &SessionConfig) {}

    /// Discovery produced these generators.
    fn session_discovery(&self, _generators: &[Generator]) {}

    /// A case's working directory has been created and staged.
    fn test_setup(&self, _case: &Case) {}

    /// A case is about to be handed to a worker.
    fn test_prelaunch(&self, _case: &Case) {}

    /// A case reached a terminal status.
    fn test_finish(&self, _case: &Case) {}

    /// The pipeline is complete.
    fn session_finish(&self, _graph: &CaseGraph) {}
}

/// The session's ordered hook vector.
#[derive(Default)]
pub struct HookRegistry {
    hooks: Vec<Box<dyn SessionHook>>,
}

impl HookRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook; dispatch order is registration order.
    pub fn register(&mut self, hook: Box<dyn SessionHook>) {
        self.hooks.push(hook);
    }

    pub(crate) fn session_initialize(&self, config: &SessionConfig) {
        for hook in &self.hooks {
            hook.session_initialize(config);
        }
    }

    pub(crate) fn session_discovery(&self, generators: &[Generator]) {
        for hook in &self.hooks {
            hook.session_discovery(generators);
        }
    }

    pub(crate) fn test_setup(&self, case: &Case) {
        for hook in &self.hooks {
            hook.test_setup(case);
        }
    }

    pub(crate) fn test_prelaunch(&self, case: &Case) {
        for hook in &self.hooks {
            hook.test_prelaunch(case);
        }
    }

    pub(crate) fn test_finish(&self, case: &Case) {
        for hook in &self.hooks {
            hook.test_finish(case);
        }
    }

    pub(crate) fn session_finish(&self, graph: &CaseGraph) {
        for hook in &self.hooks {
            hook.session_finish(graph);
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("count", &self.hooks.len())
            .finish()
    }
}
