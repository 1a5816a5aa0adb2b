//! Storage traits for the FHIR storage abstraction layer.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::types::StoredResource;

/// The storage trait that FHIR storage backends implement.
///
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Example
///
/// ```ignore
/// use octofhir_storage::{FhirStorage, StorageError, StoredResource};
///
/// async fn get_location(storage: &dyn FhirStorage, id: &str) -> Result<StoredResource, StorageError> {
///     storage
///         .read("Location", id)
///         .await?
///         .ok_or_else(|| StorageError::not_found("Location", id))
/// }
/// ```
#[async_trait]
pub trait FhirStorage: Send + Sync {
    /// Creates a new resource in the storage.
    ///
    /// The resource must contain a `resourceType` field and may contain an `id` field.
    /// If no `id` is provided, the storage backend generates one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::AlreadyExists` if a resource with the same type and ID exists.
    /// Returns `StorageError::InvalidResource` if the resource is malformed.
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError>;

    /// Reads a resource by type and ID.
    ///
    /// Returns `None` if the resource does not exist.
    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError>;

    /// Updates a resource, creating it under the supplied id if it does not exist.
    ///
    /// The resource must contain `resourceType` and `id` fields. Writing the same
    /// resource twice never produces a duplicate.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidResource` if the resource is malformed.
    async fn update(&self, resource: &Value) -> Result<StoredResource, StorageError>;

    /// Begins a new transaction.
    ///
    /// The returned transaction must be either committed or rolled back.
    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError>;

    /// Returns the number of stored resources of a type.
    async fn count(&self, resource_type: &str) -> Result<usize, StorageError>;

    /// Returns the name of this storage backend for logging/debugging.
    fn backend_name(&self) -> &'static str;
}

/// A transaction for performing atomic operations.
///
/// Operations within a transaction are isolated from other operations until
/// the transaction is committed. Reads inside the transaction see its own
/// uncommitted writes.
///
/// ```ignore
/// let mut tx = storage.begin_transaction().await?;
/// tx.update(&zone).await?;
/// tx.update(&facility).await?;
/// tx.commit().await?;
/// ```
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Commits all operations in this transaction.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::TransactionError` if the commit fails or the
    /// transaction was marked rollback-only.
    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Discards all operations in this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;

    /// Creates a new resource within this transaction.
    async fn create(&mut self, resource: &Value) -> Result<StoredResource, StorageError>;

    /// Updates (or creates) a resource within this transaction.
    async fn update(&mut self, resource: &Value) -> Result<StoredResource, StorageError>;

    /// Reads a resource, seeing uncommitted changes of this transaction.
    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError>;

    /// True once the backend has finished this transaction on its own,
    /// for example after the database aborted it.
    fn is_completed(&self) -> bool {
        false
    }

    /// True if the transaction may only be rolled back.
    fn is_rollback_only(&self) -> bool;

    /// Mark the transaction so that it can only be rolled back.
    fn set_rollback_only(&mut self);
}
