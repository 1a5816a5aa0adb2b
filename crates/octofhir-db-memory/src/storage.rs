use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use octofhir_storage::{
    FhirStorage, StorageError, StoredResource, Transaction, resource_id_of, resource_type_of,
};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::sync::RwLock;

use crate::transaction::InMemoryTransaction;

pub type StorageKey = String; // Format: "ResourceType/id"

pub(crate) fn make_storage_key(resource_type: &str, id: &str) -> StorageKey {
    format!("{resource_type}/{id}")
}

/// In-memory FHIR storage backend.
///
/// Resources live in a `DashMap` keyed by `Type/id`. Transaction commits take
/// the write side of `commit_lock` so readers never observe half of a commit.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    pub(crate) shared: Arc<Shared>,
}

#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) data: DashMap<StorageKey, StoredResource>,
    pub(crate) version_counter: AtomicU64,
    pub(crate) commit_lock: RwLock<()>,
}

impl Shared {
    /// Generates the next version ID.
    pub(crate) fn next_version(&self) -> String {
        (self.version_counter.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    pub(crate) fn get(&self, key: &str) -> Option<StoredResource> {
        self.data.get(key).map(|entry| entry.value().clone())
    }

    /// Build the next stored version of `resource`.
    ///
    /// `current` is the version the write replaces, if any.
    pub(crate) fn stamp(
        &self,
        resource_type: &str,
        id: &str,
        resource: &Value,
        current: Option<&StoredResource>,
    ) -> Result<StoredResource, StorageError> {
        let version_id = self.next_version();
        let now = OffsetDateTime::now_utc();
        let last_updated = now
            .format(&Rfc3339)
            .map_err(|e| StorageError::internal(e.to_string()))?;

        let mut body = resource.clone();
        let obj = body
            .as_object_mut()
            .ok_or_else(|| StorageError::invalid_resource("resource must be a JSON object"))?;
        obj.insert("id".into(), Value::String(id.to_string()));
        obj.insert(
            "meta".into(),
            serde_json::json!({ "versionId": version_id, "lastUpdated": last_updated }),
        );

        Ok(match current {
            Some(current) => current.new_version(version_id, body),
            None => StoredResource::new(id, version_id, resource_type, body),
        })
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored resources of all types.
    pub fn len(&self) -> usize {
        self.shared.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.data.is_empty()
    }
}

#[async_trait]
impl FhirStorage for InMemoryStorage {
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError> {
        let resource_type = resource_type_of(resource)?;
        let id = resource_id_of(resource)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let key = make_storage_key(resource_type, &id);

        let _guard = self.shared.commit_lock.write().await;
        if self.shared.data.contains_key(&key) {
            return Err(StorageError::already_exists(resource_type, &id));
        }
        let stored = self.shared.stamp(resource_type, &id, resource, None)?;
        self.shared.data.insert(key, stored.clone());
        Ok(stored)
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        let _guard = self.shared.commit_lock.read().await;
        Ok(self.shared.get(&make_storage_key(resource_type, id)))
    }

    async fn update(&self, resource: &Value) -> Result<StoredResource, StorageError> {
        let resource_type = resource_type_of(resource)?;
        let id = resource_id_of(resource)
            .ok_or_else(|| StorageError::invalid_resource("Missing id field for update"))?;
        let key = make_storage_key(resource_type, id);

        let _guard = self.shared.commit_lock.write().await;
        let current = self.shared.get(&key);
        let stored = self
            .shared
            .stamp(resource_type, id, resource, current.as_ref())?;
        self.shared.data.insert(key, stored.clone());
        Ok(stored)
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError> {
        Ok(Box::new(InMemoryTransaction::new(self.shared.clone())))
    }

    async fn count(&self, resource_type: &str) -> Result<usize, StorageError> {
        let _guard = self.shared.commit_lock.read().await;
        Ok(self
            .shared
            .data
            .iter()
            .filter(|entry| entry.value().resource_type == resource_type)
            .count())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
