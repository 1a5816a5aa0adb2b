//! Hook registry for resource lifecycle events.
//!
//! Hooks can be driven two ways. `dispatch` hands each matching hook to its
//! own tokio task and only logs the outcome, which suits best-effort delivery.
//! `dispatch_and_wait` runs matching hooks on the caller's task and returns
//! the first failure so a request handler can report it to its client.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use super::hooks::{HookError, ResourceHook};
use super::types::ResourceEvent;

/// Default timeout for hook execution.
const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Registry of resource hooks.
pub struct HookRegistry {
    hooks: RwLock<Vec<Arc<dyn ResourceHook>>>,
    timeout: Duration,
}

impl HookRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_HOOK_TIMEOUT)
    }

    /// Create a new registry with custom timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
            timeout,
        }
    }

    /// Register a resource hook.
    pub async fn register(&self, hook: Arc<dyn ResourceHook>) {
        let name = hook.name().to_string();
        self.hooks.write().await.push(hook);
        debug!(hook = %name, "Registered resource hook");
    }

    /// Get the number of registered hooks.
    pub async fn hook_count(&self) -> usize {
        self.hooks.read().await.len()
    }

    /// Get hooks that match an event.
    pub async fn get_matching_hooks(&self, event: &ResourceEvent) -> Vec<Arc<dyn ResourceHook>> {
        let hooks = self.hooks.read().await;
        hooks.iter().filter(|h| h.matches(event)).cloned().collect()
    }

    /// Dispatch an event to all matching hooks in the background.
    ///
    /// Each hook runs in its own task with timeout and panic protection.
    /// Failures are logged and never reach the caller.
    pub async fn dispatch(&self, event: &ResourceEvent) {
        let hooks = self.get_matching_hooks(event).await;
        if hooks.is_empty() {
            debug!(resource_type = %event.resource_type, "No hooks matched event");
            return;
        }

        let timeout = self.timeout;
        for hook in hooks {
            let event = event.clone();
            tokio::spawn(async move {
                let hook_name = hook.name().to_string();
                match run_hook(hook, &event, timeout).await {
                    Ok(()) => debug!(hook = %hook_name, "Hook executed successfully"),
                    Err(e @ (HookError::Panicked { .. } | HookError::Timeout { .. })) => {
                        error!(hook = %hook_name, error = %e, "Hook aborted");
                    }
                    Err(e) => warn!(hook = %hook_name, error = %e, "Hook execution failed"),
                }
            });
        }
    }

    /// Run all matching hooks on the current task, in registration order.
    ///
    /// Every matching hook is given the event even if an earlier one failed;
    /// the first failure is returned.
    pub async fn dispatch_and_wait(&self, event: &ResourceEvent) -> Result<(), HookError> {
        let hooks = self.get_matching_hooks(event).await;
        let mut first_error = None;

        for hook in hooks {
            let hook_name = hook.name().to_string();
            if let Err(e) = run_hook(hook, event, self.timeout).await {
                warn!(hook = %hook_name, error = %e, "Hook execution failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

async fn run_hook(
    hook: Arc<dyn ResourceHook>,
    event: &ResourceEvent,
    timeout: Duration,
) -> Result<(), HookError> {
    let result = tokio::time::timeout(
        timeout,
        AssertUnwindSafe(hook.handle(event)).catch_unwind(),
    )
    .await;

    match result {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(panic)) => Err(HookError::Panicked {
            hook: hook.name().to_string(),
            message: panic_message(panic.as_ref()),
        }),
        Err(_) => Err(HookError::Timeout {
            hook: hook.name().to_string(),
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
