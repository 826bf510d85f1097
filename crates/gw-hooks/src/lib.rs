//! Hook executor (spec §4.9): runs external shell commands at named
//! lifecycle points. New component with no direct teacher analogue for
//! the facade shape, but the execution primitive is grounded in the
//! teacher's hook runner (`shell_escape`/`substitute_variables`/process-
//! group timeout kill) and its lifecycle dispatch loop (non-short-
//! circuiting, sequential, collect-all-results).

pub mod decision;
pub mod lifecycle;
pub mod runner;
pub mod selector;

use std::collections::HashMap;

use tokio::sync::RwLock;

pub use decision::HookDecision;
pub use lifecycle::LifecyclePoint;
pub use runner::{HookResult, HookSpec};
pub use selector::Selector;

struct RegisteredHook {
    point: LifecyclePoint,
    selector: Option<Selector>,
    spec: HookSpec,
}

/// Holds all registered hooks and dispatches them at a lifecycle point.
/// Hooks run sequentially in registration order; a deny or error from one
/// hook never prevents the rest from running (spec §4.9) — callers
/// combine the returned decisions however their policy requires.
pub struct HookExecutor {
    hooks: RwLock<Vec<RegisteredHook>>,
}

impl Default for HookExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl HookExecutor {
    pub fn new() -> Self {
        Self { hooks: RwLock::new(Vec::new()) }
    }

    pub async fn register(&self, point: LifecyclePoint, selector: Option<Selector>, spec: HookSpec) {
        self.hooks.write().await.push(RegisteredHook { point, selector, spec });
    }

    /// Run every hook registered at `point` whose selector matches (or
    /// that has no selector, matching unconditionally), in registration
    /// order, waiting for each to finish before starting the next.
    pub async fn run_for_event(
        &self,
        point: LifecyclePoint,
        tool_name: &str,
        payload: &serde_json::Value,
        variables: &HashMap<String, String>,
    ) -> Vec<HookResult> {
        let hooks = self.hooks.read().await;
        let mut results = Vec::new();
        for hook in hooks.iter().filter(|h| h.point == point) {
            let fires = hook.selector.as_ref().is_none_or(|s| s.matches(tool_name, payload));
            if !fires {
                continue;
            }
            match runner::run_hook(&hook.spec, variables).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::warn!(hook = %hook.spec.name, error = %e, "hook failed to spawn");
                    results.push(HookResult {
                        name: hook.spec.name.clone(),
                        decision: HookDecision::Error(e.to_string()),
                        stdout: String::new(),
                        stderr: String::new(),
                    });
                }
            }
        }
        results
    }
}
