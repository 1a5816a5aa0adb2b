use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use super::{LocationSync, location_uuid, parent_uuid};
use crate::client::RemoteResource;
use crate::dto::{FacilityDto, FacilityTypeDto, GeographicZoneDto, Point};
use crate::error::SyncError;
use crate::location::{Location, LocationStatus, PhysicalType};
use crate::message::keys;

/// Site Locations to registry facilities.
pub struct FacilitySync {
    facilities: Arc<dyn RemoteResource<FacilityDto>>,
    zones: Arc<dyn RemoteResource<GeographicZoneDto>>,
    facility_types: Arc<dyn RemoteResource<FacilityTypeDto>>,
    facility_type_id: Uuid,
}

impl FacilitySync {
    pub fn new(
        facilities: Arc<dyn RemoteResource<FacilityDto>>,
        zones: Arc<dyn RemoteResource<GeographicZoneDto>>,
        facility_types: Arc<dyn RemoteResource<FacilityTypeDto>>,
        facility_type_id: Uuid,
    ) -> Self {
        Self {
            facilities,
            zones,
            facility_types,
            facility_type_id,
        }
    }
}

#[async_trait]
impl LocationSync for FacilitySync {
    type Domain = FacilityDto;

    fn name(&self) -> &'static str {
        "facility_sync"
    }

    fn supports(&self, physical_type: PhysicalType) -> bool {
        physical_type == PhysicalType::Site
    }

    async fn build_domain_object(&self, location: &Location) -> Result<FacilityDto, SyncError> {
        let id = location_uuid(location)?;
        let mut facility = self
            .facilities
            .find_one(id)
            .await?
            .unwrap_or_else(|| FacilityDto::new(id));

        if let Some(name) = &location.name {
            facility.name = Some(name.clone());
        }
        if let Some(description) = &location.description {
            facility.description = Some(description.clone());
        }
        if let Some((longitude, latitude)) = location.coordinates() {
            facility.location = Some(Point::new(longitude, latitude));
        }

        let code = location
            .code()
            .ok_or_else(|| SyncError::validation(keys::ERROR_FACILITY_CODE_REQUIRED, id))?;
        facility.code = Some(code.to_string());

        match parent_uuid(location)? {
            Some(zone_id) => {
                let zone = self
                    .zones
                    .find_one(zone_id)
                    .await?
                    .ok_or_else(|| SyncError::validation(keys::ERROR_NOT_FOUND_GEO_ZONE, zone_id))?;
                facility.geographic_zone = Some(zone);
            }
            // Without partOf the facility keeps the zone the registry has.
            None if facility.geographic_zone.is_some() => {}
            None => return Err(SyncError::validation(keys::ERROR_NOT_FOUND_GEO_ZONE, id)),
        }

        let facility_type = self
            .facility_types
            .find_one(self.facility_type_id)
            .await?
            .ok_or_else(|| {
                SyncError::validation(keys::ERROR_NOT_FOUND_FACILITY_TYPE, self.facility_type_id)
            })?;
        facility.facility_type = Some(facility_type);

        let active = location.status == Some(LocationStatus::Active);
        facility.active = Some(active);
        facility.enabled = Some(active);

        Ok(facility)
    }

    fn communication_service(&self) -> &dyn RemoteResource<FacilityDto> {
        self.facilities.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::testing::FakeCollection;
    use crate::sync::{LocationSyncHook, SyncOutcome};
    use octofhir_core::{Principal, ResourceEvent};
    use serde_json::{Value, json};

    const FACILITY: Uuid = Uuid::from_u128(0x10);
    const ZONE: Uuid = Uuid::from_u128(0x20);
    const TYPE: Uuid = Uuid::from_u128(0x30);

    struct Fixture {
        facilities: Arc<FakeCollection<FacilityDto>>,
        sync: FacilitySync,
    }

    fn fixture(existing: Vec<FacilityDto>, with_type: bool) -> Fixture {
        let facilities = Arc::new(FakeCollection::with(existing));
        let zones = Arc::new(FakeCollection::with(vec![GeographicZoneDto::new(ZONE)]));
        let types = if with_type {
            vec![FacilityTypeDto {
                id: TYPE,
                code: Some("health_center".into()),
                name: None,
                description: None,
                display_order: None,
                active: Some(true),
            }]
        } else {
            Vec::new()
        };

        Fixture {
            facilities: facilities.clone(),
            sync: FacilitySync::new(
                facilities,
                zones,
                Arc::new(FakeCollection::with(types)),
                TYPE,
            ),
        }
    }

    fn site(extra: Value) -> Location {
        let mut body = json!({
            "resourceType": "Location",
            "id": FACILITY.to_string(),
            "alias": ["HC01"],
            "name": "Comfort Health Clinic",
            "status": "active",
            "physicalType": {"coding": [{"code": "si"}]},
            "partOf": {"reference": format!("Location/{ZONE}")},
            "position": {"longitude": 35.0, "latitude": -15.0}
        });
        if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (key, value) in extra {
                body.insert(key.clone(), value.clone());
            }
        }
        Location::from_value(body).unwrap()
    }

    #[tokio::test]
    async fn test_builds_new_facility_from_site() {
        let setup = fixture(Vec::new(), true);

        let facility = setup
            .sync
            .build_domain_object(&site(json!({})))
            .await
            .unwrap();

        assert_eq!(facility.id, FACILITY);
        assert_eq!(facility.code.as_deref(), Some("HC01"));
        assert_eq!(facility.name.as_deref(), Some("Comfort Health Clinic"));
        assert_eq!(facility.location, Some(Point::new(35.0, -15.0)));
        assert_eq!(facility.geographic_zone.map(|z| z.id), Some(ZONE));
        assert_eq!(facility.facility_type.map(|t| t.id), Some(TYPE));
        assert_eq!((facility.active, facility.enabled), (Some(true), Some(true)));
    }

    #[tokio::test]
    async fn test_merges_into_existing_record() {
        let mut existing = FacilityDto::new(FACILITY);
        existing.description = Some("kept".into());
        existing.other.insert("operator".into(), json!({"code": "moh"}));
        let setup = fixture(vec![existing], true);

        let facility = setup
            .sync
            .build_domain_object(&site(json!({"status": "inactive", "position": {"latitude": 1.0}})))
            .await
            .unwrap();

        assert_eq!(facility.description.as_deref(), Some("kept"));
        assert_eq!(facility.other["operator"], json!({"code": "moh"}));
        assert!(facility.location.is_none());
        assert_eq!((facility.active, facility.enabled), (Some(false), Some(false)));
    }

    #[tokio::test]
    async fn test_missing_code_is_reported() {
        let setup = fixture(Vec::new(), true);

        let err = setup
            .sync
            .build_domain_object(&site(json!({"alias": []})))
            .await
            .unwrap_err();
        assert!(
            matches!(err, SyncError::Validation(ref m) if m.key() == keys::ERROR_FACILITY_CODE_REQUIRED)
        );
    }

    #[tokio::test]
    async fn test_unknown_zone_and_type_are_reported() {
        let unknown_zone = site(json!({
            "partOf": {"reference": "Location/9b5bc8b4-3d7c-4e0f-8a77-5e6a2f0b6a11"}
        }));
        let err = fixture(Vec::new(), true)
            .sync
            .build_domain_object(&unknown_zone)
            .await
            .unwrap_err();
        assert!(
            matches!(err, SyncError::Validation(ref m) if m.key() == keys::ERROR_NOT_FOUND_GEO_ZONE)
        );

        let err = fixture(Vec::new(), false)
            .sync
            .build_domain_object(&site(json!({})))
            .await
            .unwrap_err();
        assert!(
            matches!(err, SyncError::Validation(ref m) if m.key() == keys::ERROR_NOT_FOUND_FACILITY_TYPE)
        );
    }

    #[tokio::test]
    async fn test_root_facility_without_known_zone_is_rejected() {
        let mut location = site(json!({}));
        location.part_of = None;

        let err = fixture(Vec::new(), true)
            .sync
            .build_domain_object(&location)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(ref m) if m.key() == keys::ERROR_NOT_FOUND_GEO_ZONE));
    }

    #[tokio::test]
    async fn test_hook_updates_registry() {
        let setup = fixture(Vec::new(), true);
        let facilities = setup.facilities.clone();
        let hook = LocationSyncHook::new(setup.sync, "api-key-client-");

        let mut event = ResourceEvent::created(
            "Location",
            FACILITY.to_string(),
            site(json!({})).to_value().unwrap(),
        );
        event.principal = Some(Principal::client("api-key-client-7"));

        let outcome = hook.process(&event).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Pushed { id: FACILITY });

        let updates = facilities.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].extra_data["isManagedExternally"], "true");
        assert!(facilities.creates.lock().unwrap().is_empty());
    }
}
