//! Registry records to FHIR `Location` resources.

use tracing::warn;

use crate::dto::{FacilityDto, GeographicZoneDto};
use crate::location::{
    Identifier, Location, LocationStatus, PhysicalType, Position, Reference, URI_IDENTIFIER_SYSTEM,
};

/// Translates registry records for bulk loading.
///
/// The registry id becomes the Location id, so later writes of the same
/// record land on the same Location.
#[derive(Debug, Clone)]
pub struct LocationTranslator {
    registry_url: String,
}

impl LocationTranslator {
    pub fn new(registry_url: impl Into<String>) -> Self {
        Self {
            registry_url: registry_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_geographic_zone(&self, zone: &GeographicZoneDto) -> Location {
        let mut location = Location::new(zone.id.to_string());
        location.alias = zone.code.iter().cloned().collect();
        location.name = zone.name.clone();

        match &zone.level {
            Some(level) => location.identifier.push(Identifier::new(
                URI_IDENTIFIER_SYSTEM,
                format!("{}/api/geographicLevels/{}", self.registry_url, level.id),
            )),
            None => warn!(id = %zone.id, "Geographic zone has no level, Location gets no level identifier"),
        }
        location.identifier.push(self.registry_identifier(zone.id));

        if let (Some(longitude), Some(latitude)) = (zone.longitude, zone.latitude) {
            location.position = Some(Position::new(longitude, latitude));
        }
        location.physical_type = Some(PhysicalType::Area.concept());
        location.part_of = zone.parent.as_ref().map(|parent| Reference::location(parent.id));
        location
    }

    pub fn from_facility(&self, facility: &FacilityDto) -> Location {
        let mut location = Location::new(facility.id.to_string());
        location.alias = facility.code.iter().cloned().collect();
        location.name = facility.name.clone();
        location.description = facility.description.clone();

        match &facility.facility_type {
            Some(facility_type) => location.identifier.push(Identifier::new(
                URI_IDENTIFIER_SYSTEM,
                format!("{}/api/facilityTypes/{}", self.registry_url, facility_type.id),
            )),
            None => warn!(id = %facility.id, "Facility has no type, Location gets no type identifier"),
        }
        location.identifier.push(self.registry_identifier(facility.id));

        location.position = facility
            .location
            .map(|point| Position::new(point.longitude, point.latitude));
        location.physical_type = Some(PhysicalType::Site.concept());
        location.part_of = facility
            .geographic_zone
            .as_ref()
            .map(|zone| Reference::location(zone.id));
        location.status = Some(if facility.is_active_and_enabled() {
            LocationStatus::Active
        } else {
            LocationStatus::Inactive
        });
        location
    }

    fn registry_identifier(&self, id: uuid::Uuid) -> Identifier {
        Identifier::new(self.registry_url.clone(), id.to_string())
    }
}
