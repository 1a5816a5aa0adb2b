//! Hook traits for resource lifecycle events.
//!
//! Hooks are asynchronous handlers that react to committed resource changes.
//! The same hook may be driven inline on a request task or on a background
//! delivery task, so implementations must not assume a particular caller.

use async_trait::async_trait;

use super::types::{ResourceEvent, ResourceEventType};

/// Error type for hook operations.
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    /// Hook execution failed with a message.
    #[error("Hook execution failed: {0}")]
    Execution(String),

    /// Hook did not finish within the registry timeout.
    #[error("Hook {hook} timed out after {timeout_ms}ms")]
    Timeout {
        /// Name of the hook.
        hook: String,
        /// Timeout that was exceeded.
        timeout_ms: u64,
    },

    /// Hook panicked while handling an event.
    #[error("Hook {hook} panicked: {message}")]
    Panicked {
        /// Name of the hook.
        hook: String,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// Hook failed with a typed error that callers may downcast.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HookError {
    /// Create an execution error from a string.
    pub fn execution(msg: impl Into<String>) -> Self {
        HookError::Execution(msg.into())
    }

    /// Wrap a typed error so the caller can recover it with `downcast`.
    pub fn other<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        HookError::Other(anyhow::Error::new(err))
    }
}

/// Trait for FHIR resource event hooks.
///
/// # Example
///
/// ```ignore
/// struct AuditHook;
///
/// #[async_trait]
/// impl ResourceHook for AuditHook {
///     fn name(&self) -> &str { "audit" }
///     fn resource_types(&self) -> &[&str] { &["Location"] }
///
///     async fn handle(&self, event: &ResourceEvent) -> Result<(), HookError> {
///         tracing::info!(id = %event.resource_id, "location changed");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait ResourceHook: Send + Sync {
    /// Unique name for this hook (for logging).
    fn name(&self) -> &str;

    /// Resource types this hook is interested in.
    ///
    /// Return an empty slice to match all resource types.
    fn resource_types(&self) -> &[&str];

    /// Event types this hook handles.
    ///
    /// Return an empty slice to match all event types (Created, Updated, Deleted).
    fn event_types(&self) -> &[ResourceEventType] {
        &[]
    }

    /// Handle a resource change event.
    async fn handle(&self, event: &ResourceEvent) -> Result<(), HookError>;

    /// Check if this hook should handle the given event.
    fn matches(&self, event: &ResourceEvent) -> bool {
        let types = self.resource_types();
        if !types.is_empty() && !types.contains(&event.resource_type.as_str()) {
            return false;
        }

        let event_types = self.event_types();
        event_types.is_empty() || event_types.contains(&event.event_type)
    }
}
