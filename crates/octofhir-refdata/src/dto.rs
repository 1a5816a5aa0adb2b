//! Registry data transfer objects.
//!
//! Every DTO keeps the registry fields it does not model in a flattened map,
//! so that reading a record and writing it back never drops data.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Extra-data key stamped on every record produced by reverse-sync.
pub const IS_MANAGED_EXTERNALLY: &str = "isManagedExternally";

/// A registry record type together with its REST collection.
pub trait RegistryResource:
    Serialize + DeserializeOwned + Clone + Send + Sync + 'static
{
    /// Collection path relative to the registry base URL.
    const PATH: &'static str;
    /// Name used in retrieval errors.
    const RESOURCE_NAME: &'static str;

    fn id(&self) -> Uuid;
}

/// Records carrying a string-keyed `extraData` map.
pub trait ExtraDataContainer {
    fn extra_data_mut(&mut self) -> &mut BTreeMap<String, String>;

    fn add_extra_data_entry(&mut self, key: &str, value: impl ToString) {
        self.extra_data_mut().insert(key.to_string(), value.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeographicLevelDto {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub level_number: i32,
}

impl RegistryResource for GeographicLevelDto {
    const PATH: &'static str = "/api/geographicLevels";
    const RESOURCE_NAME: &'static str = "GeographicLevelDto";

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeographicZoneDto {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<GeographicLevelDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Box<GeographicZoneDto>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub extra_data: BTreeMap<String, String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl GeographicZoneDto {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            code: None,
            name: None,
            level: None,
            parent: None,
            latitude: None,
            longitude: None,
            extra_data: BTreeMap::new(),
            other: Map::new(),
        }
    }

    pub fn level_number(&self) -> Option<i32> {
        self.level.as_ref().map(|level| level.level_number)
    }
}

impl RegistryResource for GeographicZoneDto {
    const PATH: &'static str = "/api/geographicZones";
    const RESOURCE_NAME: &'static str = "GeographicZoneDto";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl ExtraDataContainer for GeographicZoneDto {
    fn extra_data_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.extra_data
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilityTypeDto {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_order: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl RegistryResource for FacilityTypeDto {
    const PATH: &'static str = "/api/facilityTypes";
    const RESOURCE_NAME: &'static str = "FacilityTypeDto";

    fn id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilityDto {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geographic_zone: Option<GeographicZoneDto>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub facility_type: Option<FacilityTypeDto>,
    #[serde(
        default,
        deserialize_with = "Point::deserialize_geojson",
        skip_serializing_if = "Option::is_none"
    )]
    pub location: Option<Point>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub extra_data: BTreeMap<String, String>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl FacilityDto {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            code: None,
            name: None,
            description: None,
            active: None,
            enabled: None,
            geographic_zone: None,
            facility_type: None,
            location: None,
            extra_data: BTreeMap::new(),
            other: Map::new(),
        }
    }

    /// Both flags set; a missing flag counts as `false`.
    pub fn is_active_and_enabled(&self) -> bool {
        self.active == Some(true) && self.enabled == Some(true)
    }
}

impl RegistryResource for FacilityDto {
    const PATH: &'static str = "/api/facilities";
    const RESOURCE_NAME: &'static str = "FacilityDto";

    fn id(&self) -> Uuid {
        self.id
    }
}

impl ExtraDataContainer for FacilityDto {
    fn extra_data_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.extra_data
    }
}

/// A facility position, carried as a GeoJSON point on the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub longitude: f64,
    pub latitude: f64,
}

#[derive(Serialize, Deserialize)]
struct GeoJsonPoint {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    coordinates: Option<Vec<f64>>,
}

impl Point {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude,
            latitude,
        }
    }

    /// Decode `{"type":"Point","coordinates":[lon, lat]}`.
    ///
    /// A null value, a missing `coordinates` array or one with fewer than two
    /// numbers decodes as no point.
    fn deserialize_geojson<'de, D>(deserializer: D) -> Result<Option<Point>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<GeoJsonPoint>::deserialize(deserializer)?;
        Ok(raw
            .and_then(|point| point.coordinates)
            .and_then(|coordinates| match coordinates.as_slice() {
                [longitude, latitude, ..] => Some(Point::new(*longitude, *latitude)),
                _ => None,
            }))
    }
}

impl Serialize for Point {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        GeoJsonPoint {
            kind: Some("Point".to_string()),
            coordinates: Some(vec![self.longitude, self.latitude]),
        }
        .serialize(serializer)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One page of a registry collection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub content: Vec<T>,
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub total_elements: Option<u64>,
    #[serde(default)]
    pub total_pages: Option<u32>,
    #[serde(default)]
    pub last: Option<bool>,
}

impl<T> Page<T> {
    /// Whether no page follows this one.
    ///
    /// Trusts the `last` flag, then `totalPages`, and otherwise treats a page
    /// shorter than `requested_size` as the final one.
    pub fn is_last(&self, requested_size: u32) -> bool {
        if let Some(last) = self.last {
            return last;
        }
        if let (Some(number), Some(total)) = (self.number, self.total_pages) {
            return number + 1 >= total;
        }
        self.content.len() < requested_size as usize
    }
}

/// Version information, as served by `GET /referencedata` and by this service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_stamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}
