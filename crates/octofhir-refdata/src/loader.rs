//! Startup bulk load of registry zones and facilities into FHIR storage.
//!
//! The loader waits until the registry answers its version probe, then loads
//! geographic zones (parents first) and facilities. Every record is written
//! as an upsert keyed by the registry id, so running the load again only
//! produces updates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use octofhir_storage::{Bundle, FhirStorage, StorageError, in_transaction};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::auth::TokenProvider;
use crate::client::{AvailabilityProbe, RemoteResource};
use crate::dto::{FacilityDto, GeographicZoneDto};
use crate::error::RegistryError;
use crate::location::Location;
use crate::params::RequestParameters;
use crate::translator::LocationTranslator;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    WaitingForRegistry,
    LoadingZones,
    LoadingFacilities,
    Done,
}

impl LoaderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WaitingForRegistry => "waiting-for-registry",
            Self::LoadingZones => "loading-zones",
            Self::LoadingFacilities => "loading-facilities",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("unable to serialize Location: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("transaction endpoint answered HTTP {status}: {body}")]
    Submit { status: u16, body: String },

    #[error("bulk load was cancelled")]
    Cancelled,
}

/// Where translated Locations are written.
#[async_trait]
pub trait LocationSink: Send + Sync {
    /// Persist `locations` in order; returns how many were written.
    async fn persist(&self, locations: Vec<Location>) -> Result<usize, LoadError>;
}

/// Upserts through the storage, one transaction per batch.
pub struct StorageSink {
    storage: Arc<dyn FhirStorage>,
}

impl StorageSink {
    pub fn new(storage: Arc<dyn FhirStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl LocationSink for StorageSink {
    async fn persist(&self, locations: Vec<Location>) -> Result<usize, LoadError> {
        let resources = locations
            .iter()
            .map(Location::to_value)
            .collect::<Result<Vec<Value>, _>>()?;

        in_transaction(self.storage.as_ref(), move |tx| {
            Box::pin(async move {
                for resource in &resources {
                    tx.update(resource).await?;
                }
                Ok::<_, LoadError>(resources.len())
            })
        })
        .await
    }
}

/// Posts chunked transaction bundles to a FHIR transaction endpoint.
pub struct BundleSink {
    http: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn TokenProvider>,
    chunk_size: usize,
}

impl BundleSink {
    /// `service_url` is the FHIR base; bundles go to `{service_url}/fhir`.
    pub fn new(
        http: reqwest::Client,
        service_url: &str,
        tokens: Arc<dyn TokenProvider>,
        chunk_size: usize,
    ) -> Self {
        Self {
            http,
            endpoint: format!("{}/fhir", service_url.trim_end_matches('/')),
            tokens,
            chunk_size: chunk_size.max(1),
        }
    }

    async fn submit(&self, bundle: &Bundle) -> Result<(), LoadError> {
        let token = self.tokens.access_token().await?;
        let mut request = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/fhir+json");
        if !token.trim().is_empty() {
            request = request.bearer_auth(token);
        }

        let response = request
            .body(serde_json::to_vec(bundle)?)
            .send()
            .await
            .map_err(|e| RegistryError::transport(&self.endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Submit {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LocationSink for BundleSink {
    async fn persist(&self, locations: Vec<Location>) -> Result<usize, LoadError> {
        let resources = locations
            .iter()
            .map(Location::to_value)
            .collect::<Result<Vec<Value>, _>>()?;

        for chunk in resources.chunks(self.chunk_size) {
            self.submit(&Bundle::transaction_upsert(chunk.iter().cloned()))
                .await?;
            debug!(entries = chunk.len(), "Submitted Location bundle");
        }
        Ok(resources.len())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub zones: usize,
    pub facilities: usize,
}

pub struct BulkLoader {
    probe: Arc<dyn AvailabilityProbe>,
    zones: Arc<dyn RemoteResource<GeographicZoneDto>>,
    facilities: Arc<dyn RemoteResource<FacilityDto>>,
    translator: LocationTranslator,
    sink: Arc<dyn LocationSink>,
    poll_interval: Duration,
    page_size: u32,
    state: watch::Sender<LoaderState>,
}

impl BulkLoader {
    pub fn new(
        probe: Arc<dyn AvailabilityProbe>,
        zones: Arc<dyn RemoteResource<GeographicZoneDto>>,
        facilities: Arc<dyn RemoteResource<FacilityDto>>,
        translator: LocationTranslator,
        sink: Arc<dyn LocationSink>,
    ) -> Self {
        let (state, _) = watch::channel(LoaderState::WaitingForRegistry);
        Self {
            probe,
            zones,
            facilities,
            translator,
            sink,
            poll_interval: DEFAULT_POLL_INTERVAL,
            page_size: DEFAULT_PAGE_SIZE,
            state,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size.max(1);
        self
    }

    pub fn state(&self) -> LoaderState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoaderState> {
        self.state.subscribe()
    }

    fn enter(&self, state: LoaderState) {
        info!(?state, "Bulk loader state changed");
        self.state.send_replace(state);
    }

    /// Run the whole load. Only `cancel` stops the wait for the registry.
    pub async fn run(&self, cancel: CancellationToken) -> Result<LoadSummary, LoadError> {
        self.enter(LoaderState::WaitingForRegistry);
        if !self.wait_for_registry(&cancel).await {
            return Err(LoadError::Cancelled);
        }

        self.enter(LoaderState::LoadingZones);
        let zones = self.load_geographic_zones().await?;

        self.enter(LoaderState::LoadingFacilities);
        let facilities = self.load_facilities().await?;

        self.enter(LoaderState::Done);
        info!(zones, facilities, "Bulk load finished");
        Ok(LoadSummary { zones, facilities })
    }

    /// Poll the version endpoint until it answers. Returns `false` if
    /// cancelled first.
    pub async fn wait_for_registry(&self, cancel: &CancellationToken) -> bool {
        loop {
            let probe = tokio::select! {
                _ = cancel.cancelled() => return false,
                result = self.probe.version() => result,
            };
            match probe {
                Ok(version) => {
                    info!(version = ?version.version, "Reference data service is available");
                    return true;
                }
                Err(e) => debug!(error = %e, "Reference data service is not available yet"),
            }

            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    pub async fn load_geographic_zones(&self) -> Result<usize, LoadError> {
        let mut zones = self.fetch_all_zones().await?;
        zones.sort_by_key(GeographicZoneDto::level_number);

        let locations = zones
            .iter()
            .map(|zone| self.translator.from_geographic_zone(zone))
            .collect();
        self.sink.persist(locations).await
    }

    pub async fn load_facilities(&self) -> Result<usize, LoadError> {
        let facilities = self.facilities.find_all().await?;
        let locations = facilities
            .iter()
            .map(|facility| self.translator.from_facility(facility))
            .collect();
        self.sink.persist(locations).await
    }

    async fn fetch_all_zones(&self) -> Result<Vec<GeographicZoneDto>, RegistryError> {
        let mut zones = Vec::new();
        let mut page = 0u32;
        loop {
            let params = RequestParameters::new()
                .set("page", page)
                .set("size", self.page_size);
            let result = self.zones.get_page("", &params).await?;
            let last = result.is_last(self.page_size) || result.content.is_empty();
            debug!(page, records = result.content.len(), "Fetched geographic zones page");
            zones.extend(result.content);
            if last {
                return Ok(zones);
            }
            page += 1;
        }
    }
}
