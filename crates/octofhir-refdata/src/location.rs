//! Typed view of the FHIR `Location` resource.
//!
//! Only the elements the bridge reads or writes are modelled; anything else
//! (`meta`, `telecom`, extensions, ...) is carried through `extra`.

use std::fmt;

use octofhir_core::{UnresolvableReference, parse_reference};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const RESOURCE_TYPE: &str = "Location";

/// Identifier system for cross-references expressed as URIs.
pub const URI_IDENTIFIER_SYSTEM: &str = "urn:ietf:rfc:3986";

pub const PHYSICAL_TYPE_SYSTEM: &str = "http://hl7.org/fhir/location-physical-type";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<LocationStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alias: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub physical_type: Option<CodeableConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_of: Option<Reference>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Location {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            resource_type: RESOURCE_TYPE.to_string(),
            id: Some(id.into()),
            identifier: Vec::new(),
            status: None,
            name: None,
            alias: Vec::new(),
            description: None,
            physical_type: None,
            position: None,
            part_of: None,
            extra: Map::new(),
        }
    }

    /// Parse a resource body, rejecting anything that is not a Location.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let location: Location = serde_json::from_value(value)?;
        if location.resource_type != RESOURCE_TYPE {
            return Err(serde::de::Error::custom(format!(
                "expected resourceType Location, got {}",
                location.resource_type
            )));
        }
        Ok(location)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// The first alias carries the registry `code`.
    pub fn code(&self) -> Option<&str> {
        self.alias.first().map(String::as_str).filter(|c| !c.is_empty())
    }

    /// Physical type codes in document order.
    pub fn physical_type_codes(&self) -> impl Iterator<Item = &str> {
        self.physical_type
            .iter()
            .flat_map(|concept| concept.coding.iter())
            .filter_map(|coding| coding.code.as_deref())
    }

    /// Id of the parent Location, if `partOf` is set.
    pub fn part_of_id(&self) -> Option<Result<String, UnresolvableReference>> {
        let reference = self.part_of.as_ref()?.reference.as_deref()?;
        Some(parse_reference(reference, None).and_then(|parsed| {
            if parsed.resource_type == RESOURCE_TYPE {
                Ok(parsed.id)
            } else {
                Err(UnresolvableReference::Invalid(reference.to_string()))
            }
        }))
    }

    /// Longitude and latitude, only when both are present.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let position = self.position.as_ref()?;
        Some((position.longitude?, position.latitude?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationStatus {
    Active,
    Suspended,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Identifier {
    pub fn new(system: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            value: Some(value.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Reference {
    pub fn location(id: impl fmt::Display) -> Self {
        Self {
            reference: Some(format!("{RESOURCE_TYPE}/{id}")),
            display: None,
        }
    }
}

/// Position with optional halves, as clients may send partial data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

impl Position {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            longitude: Some(longitude),
            latitude: Some(latitude),
            altitude: None,
        }
    }
}

/// FHIR `location-physical-type` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhysicalType {
    Site,
    Building,
    Wing,
    Ward,
    Level,
    Corridor,
    Room,
    Bed,
    Vehicle,
    House,
    Cabinet,
    Road,
    Area,
    Jurisdiction,
}

impl PhysicalType {
    const ALL: [PhysicalType; 14] = [
        Self::Site,
        Self::Building,
        Self::Wing,
        Self::Ward,
        Self::Level,
        Self::Corridor,
        Self::Room,
        Self::Bed,
        Self::Vehicle,
        Self::House,
        Self::Cabinet,
        Self::Road,
        Self::Area,
        Self::Jurisdiction,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Self::Site => "si",
            Self::Building => "bu",
            Self::Wing => "wi",
            Self::Ward => "wa",
            Self::Level => "lvl",
            Self::Corridor => "co",
            Self::Room => "ro",
            Self::Bed => "bd",
            Self::Vehicle => "ve",
            Self::House => "ho",
            Self::Cabinet => "ca",
            Self::Road => "rd",
            Self::Area => "area",
            Self::Jurisdiction => "jdn",
        }
    }

    pub fn display(self) -> &'static str {
        match self {
            Self::Site => "Site",
            Self::Building => "Building",
            Self::Wing => "Wing",
            Self::Ward => "Ward",
            Self::Level => "Level",
            Self::Corridor => "Corridor",
            Self::Room => "Room",
            Self::Bed => "Bed",
            Self::Vehicle => "Vehicle",
            Self::House => "House",
            Self::Cabinet => "Cabinet",
            Self::Road => "Road",
            Self::Area => "Area",
            Self::Jurisdiction => "Jurisdiction",
        }
    }

    /// Case-insensitive lookup by code.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code().eq_ignore_ascii_case(code))
    }

    pub fn concept(self) -> CodeableConcept {
        CodeableConcept {
            coding: vec![Coding {
                system: Some(PHYSICAL_TYPE_SYSTEM.to_string()),
                code: Some(self.code().to_string()),
                display: Some(self.display().to_string()),
            }],
            text: None,
        }
    }
}

impl fmt::Display for PhysicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_physical_type_codes_are_case_insensitive() {
        assert_eq!(PhysicalType::from_code("SI"), Some(PhysicalType::Site));
        assert_eq!(PhysicalType::from_code("Area"), Some(PhysicalType::Area));
        assert_eq!(PhysicalType::from_code("lvl"), Some(PhysicalType::Level));
        assert_eq!(PhysicalType::from_code("xyz"), None);
    }

    #[test]
    fn test_parse_keeps_unmodelled_elements() {
        let location = Location::from_value(json!({
            "resourceType": "Location",
            "id": "0b35c0f9-9bb0-4d0e-a4b7-b2b6a3c1f001",
            "alias": ["HC01"],
            "meta": {"versionId": "3"},
            "telecom": [{"system": "phone", "value": "555"}],
            "partOf": {"reference": "Location/parent-1"},
            "position": {"latitude": -15.5}
        }))
        .unwrap();

        assert_eq!(location.code(), Some("HC01"));
        assert_eq!(location.part_of_id().unwrap().unwrap(), "parent-1");
        assert_eq!(location.coordinates(), None);
        assert_eq!(location.to_value().unwrap()["meta"]["versionId"], "3");
    }

    #[test]
    fn test_part_of_must_reference_a_location() {
        let mut location = Location::new("a");
        location.part_of = Some(Reference {
            reference: Some("Organization/x".into()),
            display: None,
        });
        assert!(location.part_of_id().unwrap().is_err());

        location.part_of = None;
        assert!(location.part_of_id().is_none());
    }

    #[test]
    fn test_rejects_other_resource_types() {
        assert!(Location::from_value(json!({"resourceType": "Patient"})).is_err());
        assert!(Location::from_value(json!({"name": "no type"})).is_err());
    }
}
