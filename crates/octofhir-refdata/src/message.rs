//! Message keys and their English catalog.
//!
//! Errors that reach API clients carry a stable message key plus positional
//! parameters. [`Message::localize`] resolves them against a fixed catalog
//! into the `{ messageKey, message }` shape the registry itself returns.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable message keys.
pub mod keys {
    pub const MISSING_AUTHORIZATION: &str = "hapifhir.error.authorization.missing";
    pub const INCORRECT_AUTHORIZATION: &str = "hapifhir.error.authorization.incorrect";

    pub const ERROR_IO: &str = "hapifhir.error.io";

    pub const ERROR_FACILITY_CODE_REQUIRED: &str = "hapifhir.error.facility.code.required";
    pub const ERROR_NOT_FOUND_FACILITY_TYPE: &str = "hapifhir.error.facility.facilityType.notFound";

    pub const ERROR_NOT_FOUND_GEO_ZONE: &str = "hapifhir.error.geographicZone.notFound";
    pub const ERROR_GEO_ZONE_CODE_REQUIRED: &str = "hapifhir.error.geographicZone.code.required";
    pub const ERROR_NOT_FOUND_GEO_LEVEL: &str = "hapifhir.error.geographicZone.level.notFound";

    pub const ERROR_LOCATION_ID_INVALID: &str = "hapifhir.error.location.id.invalid";
}

fn template(key: &str) -> Option<&'static str> {
    let template = match key {
        keys::MISSING_AUTHORIZATION => "Authorization is required to access this resource",
        keys::INCORRECT_AUTHORIZATION => "Authorization is incorrect: {0}",
        keys::ERROR_IO => "Unable to read the reference data service response: {0}",
        keys::ERROR_FACILITY_CODE_REQUIRED => {
            "Facility code is required, set it as the first alias of Location {0}"
        }
        keys::ERROR_NOT_FOUND_FACILITY_TYPE => "Facility type {0} was not found",
        keys::ERROR_NOT_FOUND_GEO_ZONE => "Geographic zone {0} was not found",
        keys::ERROR_GEO_ZONE_CODE_REQUIRED => {
            "Geographic zone code is required, set it as the first alias of Location {0}"
        }
        keys::ERROR_NOT_FOUND_GEO_LEVEL => "Geographic level with level number {0} was not found",
        keys::ERROR_LOCATION_ID_INVALID => "Location id {0} is not a valid UUID",
        _ => return None,
    };
    Some(template)
}

/// A message key with its positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    key: String,
    params: Vec<String>,
}

impl Message {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            params: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_param(mut self, param: impl fmt::Display) -> Self {
        self.params.push(param.to_string());
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Resolve against the catalog.
    ///
    /// Unknown keys fall back to the key itself so nothing is lost.
    pub fn localize(&self) -> LocalizedMessage {
        let message = match template(&self.key) {
            Some(template) => self.format(template),
            None => self.to_string(),
        };
        LocalizedMessage {
            message_key: self.key.clone(),
            message,
        }
    }

    fn format(&self, template: &str) -> String {
        self.params
            .iter()
            .enumerate()
            .fold(template.to_string(), |text, (index, param)| {
                text.replace(&format!("{{{index}}}"), param)
            })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.params.is_empty() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}: {}", self.key, self.params.join(", "))
        }
    }
}

/// A resolved message, as returned to clients and by the registry on `400`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedMessage {
    pub message_key: String,
    pub message: String,
}

impl fmt::Display for LocalizedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
