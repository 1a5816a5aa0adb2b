//! Resource lifecycle event types.
//!
//! A `ResourceEvent` is produced after a resource write has been committed and
//! carries everything a hook needs to react to it: the new and previous state
//! of the resource and the principal of the request that caused the change.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::security::Principal;

/// Type of resource change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceEventType {
    /// Resource was created
    Created,
    /// Resource was updated
    Updated,
    /// Resource was deleted
    Deleted,
}

impl ResourceEventType {
    /// Returns the string representation of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceEventType::Created => "created",
            ResourceEventType::Updated => "updated",
            ResourceEventType::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for ResourceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event representing a change to a FHIR resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEvent {
    /// Type of change (created, updated, deleted)
    pub event_type: ResourceEventType,
    /// FHIR resource type (e.g., "Location")
    pub resource_type: String,
    /// Resource ID
    pub resource_id: String,
    /// Version ID assigned by the storage, if available
    pub version_id: Option<String>,
    /// The resource data after the change (None for deletions)
    pub resource: Option<Value>,
    /// The resource data before the change (None for creations)
    pub previous: Option<Value>,
    /// Principal of the request that caused the change.
    ///
    /// `None` for writes performed by the service itself outside any request.
    pub principal: Option<Principal>,
    /// Timestamp of the event
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl ResourceEvent {
    /// Create a new resource event.
    pub fn new(
        event_type: ResourceEventType,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        resource: Option<Value>,
    ) -> Self {
        Self {
            event_type,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            version_id: None,
            resource,
            previous: None,
            principal: None,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    /// Create a "created" event.
    pub fn created(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        resource: Value,
    ) -> Self {
        Self::new(
            ResourceEventType::Created,
            resource_type,
            resource_id,
            Some(resource),
        )
    }

    /// Create an "updated" event.
    pub fn updated(
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        resource: Value,
    ) -> Self {
        Self::new(
            ResourceEventType::Updated,
            resource_type,
            resource_id,
            Some(resource),
        )
    }

    /// Create a "deleted" event.
    pub fn deleted(resource_type: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self::new(ResourceEventType::Deleted, resource_type, resource_id, None)
    }

    /// Set the version ID.
    pub fn with_version(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    /// Attach the state the resource had before this change.
    pub fn with_previous(mut self, previous: Option<Value>) -> Self {
        self.previous = previous;
        self
    }

    /// Attach the principal of the originating request.
    pub fn with_principal(mut self, principal: Option<Principal>) -> Self {
        self.principal = principal;
        self
    }

    /// Returns true for created and updated events.
    pub fn is_write(&self) -> bool {
        matches!(
            self.event_type,
            ResourceEventType::Created | ResourceEventType::Updated
        )
    }
}
