//! FHIR reference parsing.
//!
//! Supports relative (`Location/123`), versioned (`Location/123/_history/2`)
//! and absolute references whose base matches the local server. Contained,
//! URN and foreign absolute references cannot be followed locally.

use std::fmt;

/// A successfully parsed local FHIR reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FhirReference {
    pub resource_type: String,
    pub id: String,
    pub version: Option<String>,
}

impl FhirReference {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version: None,
        }
    }

    /// Returns the reference as a relative string (Type/id).
    pub fn to_relative(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

impl fmt::Display for FhirReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_relative())
    }
}

/// A reference that cannot be resolved against the local store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnresolvableReference {
    #[error("contained reference: #{0}")]
    Contained(String),
    #[error("URN reference: {0}")]
    Urn(String),
    #[error("external reference: {0}")]
    External(String),
    #[error("invalid reference: {0}")]
    Invalid(String),
}

/// Parse a FHIR reference string into its components.
///
/// Absolute URLs are accepted only when they start with `base_url`.
///
/// ```
/// use octofhir_core::fhir_reference::parse_reference;
///
/// let r = parse_reference("Location/123", None).unwrap();
/// assert_eq!(r.resource_type, "Location");
/// assert_eq!(r.id, "123");
/// ```
pub fn parse_reference(
    reference: &str,
    base_url: Option<&str>,
) -> Result<FhirReference, UnresolvableReference> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(UnresolvableReference::Invalid("empty reference".into()));
    }
    if let Some(contained_id) = reference.strip_prefix('#') {
        return Err(UnresolvableReference::Contained(contained_id.to_string()));
    }
    if reference.starts_with("urn:") {
        return Err(UnresolvableReference::Urn(reference.to_string()));
    }

    let path = if reference.contains("://") {
        let local = base_url
            .map(|base| base.trim_end_matches('/'))
            .and_then(|base| reference.strip_prefix(base));
        match local {
            Some(suffix) => suffix.trim_start_matches('/'),
            None => return Err(UnresolvableReference::External(reference.to_string())),
        }
    } else {
        reference
    };

    let mut parts = path.split('/');
    let (Some(resource_type), Some(id)) = (parts.next(), parts.next()) else {
        return Err(UnresolvableReference::Invalid(format!(
            "reference must contain at least Type/id: {reference}"
        )));
    };

    if !resource_type.starts_with(|c: char| c.is_ascii_uppercase()) {
        return Err(UnresolvableReference::Invalid(format!(
            "resource type must start with uppercase letter: {resource_type}"
        )));
    }
    if id.is_empty() {
        return Err(UnresolvableReference::Invalid(
            "resource id cannot be empty".into(),
        ));
    }

    let version = match (parts.next(), parts.next()) {
        (Some("_history"), Some(v)) if !v.is_empty() => Some(v.to_string()),
        _ => None,
    };

    Ok(FhirReference {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
        version,
    })
}
