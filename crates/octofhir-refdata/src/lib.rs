//! # octofhir-refdata
//!
//! Keeps FHIR `Location` resources and the reference data registry in step.
//!
//! - [`client`]: authenticated access to registry collections
//! - [`translator`]: registry records to Locations
//! - [`loader`]: startup bulk load into FHIR storage
//! - [`sync`]: Location writes pushed back to the registry

pub mod auth;
pub mod client;
pub mod dto;
pub mod error;
pub mod loader;
pub mod location;
pub mod message;
pub mod params;
pub mod sync;
pub mod translator;

pub use auth::{
    ClientCredentials, ClientCredentialsTokenProvider, RemoteTokenIntrospector,
    StaticTokenProvider, TokenProvider,
};
pub use client::{
    AvailabilityProbe, ReferenceDataVersionClient, RemoteResource, RemoteResourceClient,
};
pub use dto::{
    FacilityDto, FacilityTypeDto, GeographicLevelDto, GeographicZoneDto, Page, Point,
    RegistryResource, VersionInfo,
};
pub use error::{RegistryError, SyncError};
pub use loader::{BulkLoader, BundleSink, LoadError, LoadSummary, LoaderState, LocationSink, StorageSink};
pub use location::{Location, PhysicalType};
pub use message::{LocalizedMessage, Message, keys};
pub use params::RequestParameters;
pub use sync::{FacilitySync, GeographicZoneSync, LocationSync, LocationSyncHook, SyncOutcome};
pub use translator::LocationTranslator;
