use std::sync::Arc;

use async_trait::async_trait;

use super::{LocationSync, location_uuid, parent_uuid};
use crate::client::RemoteResource;
use crate::dto::{GeographicLevelDto, GeographicZoneDto};
use crate::error::SyncError;
use crate::location::{Location, PhysicalType};
use crate::message::keys;

/// Level number of a zone, given its parent's level (`None` for a root).
///
/// Roots take `largest_level_number`. A child moves one step from its parent
/// toward the root end: down when the root end is level 1, up otherwise.
/// `None` when that step leaves the `i32` range.
pub fn compute_level_number(parent_level: Option<i32>, largest_level_number: i32) -> Option<i32> {
    match parent_level {
        None => Some(largest_level_number),
        Some(parent) if largest_level_number == 1 => parent.checked_sub(1),
        Some(parent) => parent.checked_add(1),
    }
}

/// Area Locations to registry geographic zones.
pub struct GeographicZoneSync {
    zones: Arc<dyn RemoteResource<GeographicZoneDto>>,
    levels: Arc<dyn RemoteResource<GeographicLevelDto>>,
    largest_level_number: i32,
}

impl GeographicZoneSync {
    pub fn new(
        zones: Arc<dyn RemoteResource<GeographicZoneDto>>,
        levels: Arc<dyn RemoteResource<GeographicLevelDto>>,
        largest_level_number: i32,
    ) -> Self {
        Self {
            zones,
            levels,
            largest_level_number,
        }
    }

    async fn find_level(&self, level_number: i32) -> Result<GeographicLevelDto, SyncError> {
        self.levels
            .find_all()
            .await?
            .into_iter()
            .find(|level| level.level_number == level_number)
            .ok_or_else(|| SyncError::validation(keys::ERROR_NOT_FOUND_GEO_LEVEL, level_number))
    }
}

#[async_trait]
impl LocationSync for GeographicZoneSync {
    type Domain = GeographicZoneDto;

    fn name(&self) -> &'static str {
        "geographic_zone_sync"
    }

    fn supports(&self, physical_type: PhysicalType) -> bool {
        physical_type == PhysicalType::Area
    }

    async fn build_domain_object(
        &self,
        location: &Location,
    ) -> Result<GeographicZoneDto, SyncError> {
        let id = location_uuid(location)?;
        let mut zone = self
            .zones
            .find_one(id)
            .await?
            .unwrap_or_else(|| GeographicZoneDto::new(id));

        if let Some(name) = &location.name {
            zone.name = Some(name.clone());
        }
        if let Some(position) = &location.position {
            if position.latitude.is_some() {
                zone.latitude = position.latitude;
            }
            if position.longitude.is_some() {
                zone.longitude = position.longitude;
            }
        }

        let code = location
            .code()
            .ok_or_else(|| SyncError::validation(keys::ERROR_GEO_ZONE_CODE_REQUIRED, id))?;
        zone.code = Some(code.to_string());

        let parent = match parent_uuid(location)? {
            Some(parent_id) => Some(
                self.zones
                    .find_one(parent_id)
                    .await?
                    .ok_or_else(|| SyncError::validation(keys::ERROR_NOT_FOUND_GEO_ZONE, parent_id))?,
            ),
            None => None,
        };

        let parent_level = match &parent {
            Some(parent) => Some(parent.level_number().ok_or_else(|| {
                SyncError::validation(keys::ERROR_NOT_FOUND_GEO_LEVEL, format!("parent {}", parent.id))
            })?),
            None => None,
        };
        let level_number = compute_level_number(parent_level, self.largest_level_number)
            .ok_or_else(|| {
                let step = if self.largest_level_number == 1 { "- 1" } else { "+ 1" };
                SyncError::validation(
                    keys::ERROR_NOT_FOUND_GEO_LEVEL,
                    format!("{} {step}", parent_level.unwrap_or_default()),
                )
            })?;
        zone.level = Some(self.find_level(level_number).await?);
        zone.parent = parent.map(Box::new);

        Ok(zone)
    }

    fn communication_service(&self) -> &dyn RemoteResource<GeographicZoneDto> {
        self.zones.as_ref()
    }
}
