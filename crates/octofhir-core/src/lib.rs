//! Core building blocks shared by the OctoFHIR bridge crates.

pub mod events;
pub mod fhir_reference;
pub mod security;

pub use events::{HookError, HookRegistry, ResourceEvent, ResourceEventType, ResourceHook};
pub use fhir_reference::{FhirReference, UnresolvableReference, parse_reference};
pub use security::{AuthError, Principal, TokenIntrospector, TrustPolicy};
