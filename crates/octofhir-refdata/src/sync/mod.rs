//! Reverse synchronization: FHIR Location writes pushed back to the registry.
//!
//! A [`LocationSyncHook`] subscribes to Location create/update events and
//! runs each one through a fixed sequence of gates before handing it to its
//! [`LocationSync`] implementation:
//!
//! 1. the event must concern a `Location`;
//! 2. the request principal must be an api-key client (writes made by the
//!    registry itself use another identity and must not loop back);
//! 3. at least one physical type code must be supported by the sync.
//!
//! The rebuilt record is stamped `isManagedExternally=true` and sent with
//! `update`.
//!
//! Delivered inline, the hook runs inside the request transaction. Delivered
//! in the background through [`TransactionalHook`](octofhir_storage::TransactionalHook),
//! it first reads the Location through the delivery transaction and drops
//! the event if a later write has already replaced that version.

mod facility;
mod zone;

pub use facility::FacilitySync;
pub use zone::{GeographicZoneSync, compute_level_number};

use async_trait::async_trait;
use octofhir_core::{HookError, ResourceEvent, ResourceEventType, ResourceHook};
use octofhir_storage::{StorageError, Transaction, TransactionAwareHook};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::client::RemoteResource;
use crate::dto::{ExtraDataContainer, IS_MANAGED_EXTERNALLY, RegistryResource};
use crate::error::SyncError;
use crate::location::{Location, PhysicalType, RESOURCE_TYPE};
use crate::message::keys;

/// One registry record kind kept in sync with Locations.
#[async_trait]
pub trait LocationSync: Send + Sync + 'static {
    type Domain: RegistryResource + ExtraDataContainer;

    fn name(&self) -> &'static str;

    fn supports(&self, physical_type: PhysicalType) -> bool;

    /// Merge the Location into the existing record, or a new one with the
    /// Location id.
    async fn build_domain_object(&self, location: &Location) -> Result<Self::Domain, SyncError>;

    fn communication_service(&self) -> &dyn RemoteResource<Self::Domain>;
}

/// Why an event was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    NotLocation,
    UntrustedPrincipal,
    UnsupportedPhysicalType,
    /// A later write replaced the version the event describes.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Ignored(IgnoreReason),
    Pushed { id: Uuid },
}

pub struct LocationSyncHook<S> {
    sync: S,
    api_key_prefix: String,
}

impl<S: LocationSync> LocationSyncHook<S> {
    pub fn new(sync: S, api_key_prefix: impl Into<String>) -> Self {
        Self {
            sync,
            api_key_prefix: api_key_prefix.into(),
        }
    }

    pub async fn process(&self, event: &ResourceEvent) -> Result<SyncOutcome, SyncError> {
        if event.resource_type != RESOURCE_TYPE {
            return Ok(self.ignore(event, IgnoreReason::NotLocation));
        }

        let trusted = event
            .principal
            .as_ref()
            .is_some_and(|principal| principal.is_api_key(&self.api_key_prefix));
        if !trusted {
            return Ok(self.ignore(event, IgnoreReason::UntrustedPrincipal));
        }

        let resource = event
            .resource
            .clone()
            .ok_or_else(|| SyncError::InvalidLocation("event carries no resource".into()))?;
        let location =
            Location::from_value(resource).map_err(|e| SyncError::InvalidLocation(e.to_string()))?;

        if !self.has_supported_type(&location)? {
            return Ok(self.ignore(event, IgnoreReason::UnsupportedPhysicalType));
        }

        let mut record = self.sync.build_domain_object(&location).await?;
        record.add_extra_data_entry(IS_MANAGED_EXTERNALLY, true);

        let pushed = self.sync.communication_service().update(&record).await?;
        info!(
            hook = self.sync.name(),
            id = %pushed.id(),
            "Pushed Location to reference data service"
        );
        Ok(SyncOutcome::Pushed { id: pushed.id() })
    }

    /// Compare the event version with the one stored now.
    pub async fn check_current(
        &self,
        event: &ResourceEvent,
        tx: &dyn Transaction,
    ) -> Result<Option<SyncOutcome>, StorageError> {
        let Some(version) = event.version_id.as_deref() else {
            return Ok(None);
        };
        if event.resource_type != RESOURCE_TYPE {
            return Ok(None);
        }
        match tx.read(RESOURCE_TYPE, &event.resource_id).await? {
            Some(current) if current.version_id != version => {
                Ok(Some(self.ignore(event, IgnoreReason::Superseded)))
            }
            _ => Ok(None),
        }
    }

    /// Every code must be a known physical type; at least one must be ours.
    fn has_supported_type(&self, location: &Location) -> Result<bool, SyncError> {
        let mut supported = false;
        for code in location.physical_type_codes() {
            let kind = PhysicalType::from_code(code)
                .ok_or_else(|| SyncError::UnknownPhysicalType(code.to_string()))?;
            supported |= self.sync.supports(kind);
        }
        Ok(supported)
    }

    fn ignore(&self, event: &ResourceEvent, reason: IgnoreReason) -> SyncOutcome {
        debug!(
            hook = self.sync.name(),
            resource_type = %event.resource_type,
            id = %event.resource_id,
            ?reason,
            "Skipping reverse-sync"
        );
        SyncOutcome::Ignored(reason)
    }
}

#[async_trait]
impl<S: LocationSync> ResourceHook for LocationSyncHook<S> {
    fn name(&self) -> &str {
        self.sync.name()
    }

    fn resource_types(&self) -> &[&str] {
        &[RESOURCE_TYPE]
    }

    fn event_types(&self) -> &[ResourceEventType] {
        &[ResourceEventType::Created, ResourceEventType::Updated]
    }

    async fn handle(&self, event: &ResourceEvent) -> Result<(), HookError> {
        match self.process(event).await {
            Ok(_) => Ok(()),
            Err(err) => {
                if err.is_fatal() {
                    error!(hook = self.sync.name(), id = %event.resource_id, error = %err, "Malformed Location");
                }
                Err(HookError::other(err))
            }
        }
    }
}

#[async_trait]
impl<S: LocationSync> TransactionAwareHook for LocationSyncHook<S> {
    async fn handle_in(
        &self,
        event: &ResourceEvent,
        tx: &mut dyn Transaction,
    ) -> Result<(), HookError> {
        if self.check_current(event, &*tx).await?.is_some() {
            return Ok(());
        }
        self.handle(event).await
    }
}

/// The Location id doubles as the registry id.
pub(crate) fn location_uuid(location: &Location) -> Result<Uuid, SyncError> {
    let id = location.id.as_deref().unwrap_or_default();
    Uuid::parse_str(id).map_err(|_| SyncError::validation(keys::ERROR_LOCATION_ID_INVALID, id))
}

/// Resolve `partOf` to a registry id; `None` when the Location is a root.
pub(crate) fn parent_uuid(location: &Location) -> Result<Option<Uuid>, SyncError> {
    let Some(parsed) = location.part_of_id() else {
        return Ok(None);
    };
    let reference = location
        .part_of
        .as_ref()
        .and_then(|r| r.reference.clone())
        .unwrap_or_default();
    parsed
        .ok()
        .and_then(|id| Uuid::parse_str(&id).ok())
        .map(Some)
        .ok_or_else(|| SyncError::validation(keys::ERROR_NOT_FOUND_GEO_ZONE, reference))
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory registry collections for sync tests.

    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::Value;
    use uuid::Uuid;

    use crate::client::RemoteResource;
    use crate::dto::{Page, RegistryResource};
    use crate::error::RegistryError;
    use crate::params::RequestParameters;

    pub struct FakeCollection<T> {
        pub records: Mutex<Vec<T>>,
        pub updates: Mutex<Vec<T>>,
        pub creates: Mutex<Vec<T>>,
    }

    impl<T: RegistryResource> FakeCollection<T> {
        pub fn with(records: Vec<T>) -> Self {
            Self {
                records: Mutex::new(records),
                updates: Mutex::new(Vec::new()),
                creates: Mutex::new(Vec::new()),
            }
        }

        pub fn empty() -> Self {
            Self::with(Vec::new())
        }

        pub fn calls(&self) -> usize {
            self.updates.lock().unwrap().len() + self.creates.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl<T: RegistryResource> RemoteResource<T> for FakeCollection<T> {
        async fn find_one(&self, id: Uuid) -> Result<Option<T>, RegistryError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.id() == id)
                .cloned())
        }

        async fn find_all(&self) -> Result<Vec<T>, RegistryError> {
            Ok(self.records.lock().unwrap().clone())
        }

        async fn get_page(
            &self,
            _resource_url: &str,
            _params: &RequestParameters,
        ) -> Result<Page<T>, RegistryError> {
            Ok(Page {
                content: self.records.lock().unwrap().clone(),
                number: Some(0),
                size: None,
                total_elements: None,
                total_pages: Some(1),
                last: Some(true),
            })
        }

        async fn get_page_with_payload(
            &self,
            resource_url: &str,
            params: &RequestParameters,
            _payload: &Value,
        ) -> Result<Page<T>, RegistryError> {
            self.get_page(resource_url, params).await
        }

        async fn create(&self, resource: &T) -> Result<T, RegistryError> {
            self.creates.lock().unwrap().push(resource.clone());
            Ok(resource.clone())
        }

        async fn update(&self, resource: &T) -> Result<T, RegistryError> {
            self.updates.lock().unwrap().push(resource.clone());
            Ok(resource.clone())
        }
    }
}
