//! Storage types for the FHIR storage abstraction layer.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::StorageError;

/// A FHIR resource as stored in the storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredResource {
    /// The resource ID.
    pub id: String,
    /// The version ID of this specific version.
    pub version_id: String,
    /// The FHIR resource type (e.g., "Location").
    pub resource_type: String,
    /// The full resource content as JSON, including `meta.versionId`.
    pub resource: Value,
    /// When this version was written.
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
    /// When the resource was originally created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl StoredResource {
    /// Creates the first version of a resource.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        version_id: impl Into<String>,
        resource_type: impl Into<String>,
        resource: Value,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            version_id: version_id.into(),
            resource_type: resource_type.into(),
            resource,
            last_updated: now,
            created_at: now,
        }
    }

    /// Creates a new version of this resource with updated content.
    #[must_use]
    pub fn new_version(&self, version_id: impl Into<String>, resource: Value) -> Self {
        Self {
            id: self.id.clone(),
            version_id: version_id.into(),
            resource_type: self.resource_type.clone(),
            resource,
            last_updated: OffsetDateTime::now_utc(),
            created_at: self.created_at,
        }
    }

    /// Relative reference to this version (`Type/id/_history/v`).
    #[must_use]
    pub fn versioned_location(&self) -> String {
        format!("{}/{}/_history/{}", self.resource_type, self.id, self.version_id)
    }
}

/// Extract the `resourceType` of a resource.
pub fn resource_type_of(resource: &Value) -> Result<&str, StorageError> {
    resource
        .get("resourceType")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| StorageError::invalid_resource("resource is missing resourceType"))
}

/// Extract the `id` of a resource, if present and non-empty.
pub fn resource_id_of(resource: &Value) -> Option<&str> {
    resource
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}
