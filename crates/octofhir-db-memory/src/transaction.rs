//! Transactions for the in-memory backend.
//!
//! Writes are staged in the transaction and applied to the shared map in one
//! step on commit. Rollback simply drops the staged writes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use octofhir_storage::{
    StorageError, StoredResource, Transaction, resource_id_of, resource_type_of,
};
use serde_json::Value;
use tracing::debug;

use crate::storage::{Shared, StorageKey, make_storage_key};

#[derive(Debug)]
struct Staged {
    stored: StoredResource,
    /// Staged by `create`: the key must still be free at commit time.
    is_create: bool,
}

#[derive(Debug)]
pub struct InMemoryTransaction {
    shared: Arc<Shared>,
    staged: HashMap<StorageKey, Staged>,
    rollback_only: bool,
}

impl InMemoryTransaction {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            staged: HashMap::new(),
            rollback_only: false,
        }
    }

    async fn current(&self, key: &str) -> Option<StoredResource> {
        if let Some(staged) = self.staged.get(key) {
            return Some(staged.stored.clone());
        }
        let _guard = self.shared.commit_lock.read().await;
        self.shared.get(key)
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let Self {
            shared,
            staged,
            rollback_only,
        } = *self;
        if rollback_only {
            return Err(StorageError::transaction_error(
                "transaction is marked rollback-only",
            ));
        }

        let _guard = shared.commit_lock.write().await;
        for (key, entry) in &staged {
            if entry.is_create && shared.data.contains_key(key) {
                return Err(StorageError::already_exists(
                    &entry.stored.resource_type,
                    &entry.stored.id,
                ));
            }
        }

        let count = staged.len();
        for (key, entry) in staged {
            shared.data.insert(key, entry.stored);
        }
        debug!(writes = count, "In-memory transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        debug!(
            writes = self.staged.len(),
            "In-memory transaction rolled back"
        );
        Ok(())
    }

    async fn create(&mut self, resource: &Value) -> Result<StoredResource, StorageError> {
        let resource_type = resource_type_of(resource)?;
        let id = resource_id_of(resource)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let key = make_storage_key(resource_type, &id);

        if self.current(&key).await.is_some() {
            return Err(StorageError::already_exists(resource_type, &id));
        }

        let stored = self.shared.stamp(resource_type, &id, resource, None)?;
        self.staged.insert(
            key,
            Staged {
                stored: stored.clone(),
                is_create: true,
            },
        );
        Ok(stored)
    }

    async fn update(&mut self, resource: &Value) -> Result<StoredResource, StorageError> {
        let resource_type = resource_type_of(resource)?;
        let id = resource_id_of(resource)
            .ok_or_else(|| StorageError::invalid_resource("Missing id field for update"))?;
        let key = make_storage_key(resource_type, id);

        let current = self.current(&key).await;
        let stored = self
            .shared
            .stamp(resource_type, id, resource, current.as_ref())?;
        let is_create = self.staged.get(&key).is_some_and(|s| s.is_create);
        self.staged.insert(
            key,
            Staged {
                stored: stored.clone(),
                is_create,
            },
        );
        Ok(stored)
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        Ok(self.current(&make_storage_key(resource_type, id)).await)
    }

    fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }
}

#[cfg(test)]
mod tests {
    use crate::InMemoryStorage;
    use octofhir_storage::{FhirStorage, StorageError, Transaction};
    use serde_json::json;

    #[tokio::test]
    async fn test_commit_applies_staged_writes() {
        let storage = InMemoryStorage::new();
        let mut tx = storage.begin_transaction().await.unwrap();

        tx.update(&json!({"resourceType": "Location", "id": "zone"}))
            .await
            .unwrap();
        tx.create(&json!({"resourceType": "Location", "id": "site"}))
            .await
            .unwrap();

        // Not visible outside the transaction yet, visible inside it
        assert!(storage.read("Location", "zone").await.unwrap().is_none());
        assert!(tx.read("Location", "zone").await.unwrap().is_some());

        tx.commit().await.unwrap();
        assert_eq!(storage.count("Location").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let storage = InMemoryStorage::new();
        let mut tx = storage.begin_transaction().await.unwrap();
        tx.update(&json!({"resourceType": "Location", "id": "zone"}))
            .await
            .unwrap();

        tx.rollback().await.unwrap();
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_rollback_only_refuses_commit() {
        let storage = InMemoryStorage::new();
        let mut tx = storage.begin_transaction().await.unwrap();
        tx.update(&json!({"resourceType": "Location", "id": "zone"}))
            .await
            .unwrap();
        tx.set_rollback_only();
        assert!(tx.is_rollback_only());

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, StorageError::TransactionError { .. }));
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_create_conflicts_at_commit() {
        let storage = InMemoryStorage::new();
        let mut tx = storage.begin_transaction().await.unwrap();
        tx.create(&json!({"resourceType": "Location", "id": "a"}))
            .await
            .unwrap();

        storage
            .create(&json!({"resourceType": "Location", "id": "a"}))
            .await
            .unwrap();

        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_update_in_transaction_versions_existing() {
        let storage = InMemoryStorage::new();
        let first = storage
            .update(&json!({"resourceType": "Location", "id": "a", "name": "one"}))
            .await
            .unwrap();

        let mut tx = storage.begin_transaction().await.unwrap();
        let second = tx
            .update(&json!({"resourceType": "Location", "id": "a", "name": "two"}))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(second.created_at, first.created_at);
        assert_eq!(storage.count("Location").await.unwrap(), 1);
    }
}
