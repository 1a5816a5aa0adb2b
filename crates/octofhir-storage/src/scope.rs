//! Scoped transactions.
//!
//! [`in_transaction`] runs one operation inside a transaction it owns:
//! it commits on success, rolls back on failure, and never finishes a
//! transaction the backend has already completed. [`TransactionalHook`]
//! applies the same boundary to every background delivery of a
//! [`TransactionAwareHook`] and hands it the transaction. Hooks delivered
//! inline on a request already run inside the request transaction and must
//! not be wrapped: that would open a second transaction for the same write.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use octofhir_core::events::{HookError, ResourceEvent, ResourceEventType, ResourceHook};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::traits::{FhirStorage, Transaction};

/// Run `operation` inside a new transaction of `storage`.
///
/// - `Ok`: commits, unless the transaction is already completed (nothing to do)
///   or marked rollback-only (rolled back instead).
/// - `Err`: rolls back unless already completed, then returns the operation's
///   error unchanged. A failing rollback is logged and does not replace it.
///
/// ```ignore
/// let stored = in_transaction(storage, |tx| {
///     Box::pin(async move { tx.update(&location).await.map_err(ApiError::from) })
/// })
/// .await?;
/// ```
pub async fn in_transaction<T, E, F>(storage: &dyn FhirStorage, operation: F) -> Result<T, E>
where
    F: for<'t> FnOnce(&'t mut dyn Transaction) -> BoxFuture<'t, Result<T, E>>,
    E: From<StorageError>,
{
    let mut tx = storage.begin_transaction().await?;
    let outcome = operation(&mut *tx).await;

    match outcome {
        Ok(value) => {
            if tx.is_completed() {
                debug!("Transaction already completed, nothing to commit");
            } else if tx.is_rollback_only() {
                debug!("Transaction marked rollback-only, rolling back");
                tx.rollback().await?;
            } else {
                tx.commit().await?;
            }
            Ok(value)
        }
        Err(err) => {
            if tx.is_completed() {
                debug!("Transaction already completed, skipping rollback");
            } else if let Err(rollback_err) = tx.rollback().await {
                warn!(error = %rollback_err, "Rollback after failed operation failed");
            }
            Err(err)
        }
    }
}

impl From<StorageError> for HookError {
    fn from(err: StorageError) -> Self {
        HookError::other(err)
    }
}

/// A hook that does its storage work through the delivery transaction.
#[async_trait]
pub trait TransactionAwareHook: ResourceHook {
    async fn handle_in(
        &self,
        event: &ResourceEvent,
        tx: &mut dyn Transaction,
    ) -> Result<(), HookError>;
}

/// Decorates a hook so that each delivery runs in its own transaction.
pub struct TransactionalHook<H> {
    inner: Arc<H>,
    storage: Arc<dyn FhirStorage>,
}

impl<H: TransactionAwareHook + 'static> TransactionalHook<H> {
    pub fn new(inner: Arc<H>, storage: Arc<dyn FhirStorage>) -> Self {
        Self { inner, storage }
    }
}

#[async_trait]
impl<H: TransactionAwareHook + 'static> ResourceHook for TransactionalHook<H> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn resource_types(&self) -> &[&str] {
        self.inner.resource_types()
    }

    fn event_types(&self) -> &[ResourceEventType] {
        self.inner.event_types()
    }

    fn matches(&self, event: &ResourceEvent) -> bool {
        self.inner.matches(event)
    }

    async fn handle(&self, event: &ResourceEvent) -> Result<(), HookError> {
        let inner = Arc::clone(&self.inner);
        let event = event.clone();
        in_transaction(self.storage.as_ref(), move |tx| {
            Box::pin(async move { inner.handle_in(&event, tx).await })
        })
        .await
    }
}
