use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use octofhir_core::{HookRegistry, TokenIntrospector, TrustPolicy};
use octofhir_db_memory::InMemoryStorage;
use octofhir_refdata::{
    BulkLoader, BundleSink, ClientCredentials, ClientCredentialsTokenProvider, FacilityDto,
    FacilitySync, FacilityTypeDto, GeographicLevelDto, GeographicZoneDto, GeographicZoneSync,
    LoadError, LoaderState, LocationSink, LocationSync, LocationSyncHook, LocationTranslator,
    ReferenceDataVersionClient, RemoteResourceClient, RemoteTokenIntrospector, StorageSink,
    TokenProvider,
};
use octofhir_storage::{FhirStorage, TransactionalHook};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::{AppConfig, LoadStrategy, ServerConfig};
use crate::{handlers, middleware as app_middleware};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn FhirStorage>,
    pub hooks: Arc<HookRegistry>,
    pub introspector: Arc<dyn TokenIntrospector>,
    pub policy: Arc<TrustPolicy>,
    /// Run hooks inside the request transaction instead of after it.
    pub blocking_hooks: bool,
    pub loader_state: Option<watch::Receiver<LoaderState>>,
}

pub fn build_app(state: AppState, cfg: &ServerConfig) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/fhir", get(handlers::version).post(handlers::transaction))
        .route("/fhir/Location", post(handlers::create_location))
        .route(
            "/fhir/Location/{id}",
            get(handlers::read_location).put(handlers::update_location),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::authorization,
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = tracing::field::Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(TimeoutLayer::new(std::time::Duration::from_millis(
            cfg.request_timeout_ms,
        )))
        .layer(DefaultBodyLimit::max(cfg.body_limit_bytes))
        .with_state(state)
}

pub struct ServerBuilder {
    config: AppConfig,
    storage: Option<Arc<dyn FhirStorage>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            storage: None,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    /// Use `storage` instead of a fresh in-memory store.
    pub fn with_storage(mut self, storage: Arc<dyn FhirStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Wire registry clients, hooks and the bulk loader.
    pub async fn build(self) -> anyhow::Result<BridgeServer> {
        let cfg = self.config;
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()));

        let http = reqwest::Client::builder()
            .timeout(cfg.registry_timeout())
            .build()
            .context("building HTTP client")?;

        let credentials = ClientCredentials {
            client_id: cfg.auth.client_id.clone(),
            client_secret: cfg.auth.client_secret.clone(),
        };
        let tokens: Arc<dyn TokenProvider> = Arc::new(ClientCredentialsTokenProvider::new(
            http.clone(),
            cfg.token_url(),
            credentials.clone(),
        ));

        let registry_url = cfg.referencedata.url.as_str();
        let facilities = Arc::new(RemoteResourceClient::<FacilityDto>::new(
            http.clone(),
            registry_url,
            tokens.clone(),
        ));
        let zones = Arc::new(RemoteResourceClient::<GeographicZoneDto>::new(
            http.clone(),
            registry_url,
            tokens.clone(),
        ));
        let levels = Arc::new(RemoteResourceClient::<GeographicLevelDto>::new(
            http.clone(),
            registry_url,
            tokens.clone(),
        ));
        let facility_types = Arc::new(RemoteResourceClient::<FacilityTypeDto>::new(
            http.clone(),
            registry_url,
            tokens.clone(),
        ));

        let hooks = Arc::new(HookRegistry::with_timeout(cfg.hooks.timeout()));
        let facility_sync = LocationSyncHook::new(
            FacilitySync::new(
                facilities.clone(),
                zones.clone(),
                facility_types,
                cfg.referencedata.facility_type_id,
            ),
            cfg.auth.api_key_prefix.clone(),
        );
        let zone_sync = LocationSyncHook::new(
            GeographicZoneSync::new(
                zones.clone(),
                levels,
                cfg.referencedata.largest_level_number,
            ),
            cfg.auth.api_key_prefix.clone(),
        );
        register_sync_hook(&hooks, facility_sync, &storage, cfg.hooks.blocking).await;
        register_sync_hook(&hooks, zone_sync, &storage, cfg.hooks.blocking).await;

        let loader = if cfg.loader.enabled {
            let sink: Arc<dyn LocationSink> = match cfg.loader.strategy {
                LoadStrategy::Storage => Arc::new(StorageSink::new(storage.clone())),
                LoadStrategy::Bundle => Arc::new(BundleSink::new(
                    http.clone(),
                    &cfg.service.url,
                    tokens.clone(),
                    cfg.loader.chunk_size,
                )),
            };
            Some(
                BulkLoader::new(
                    Arc::new(ReferenceDataVersionClient::new(http.clone(), registry_url)),
                    zones,
                    facilities,
                    LocationTranslator::new(registry_url),
                    sink,
                )
                .with_poll_interval(cfg.loader.poll_interval())
                .with_page_size(cfg.loader.page_size),
            )
        } else {
            None
        };

        let state = AppState {
            storage,
            hooks,
            introspector: Arc::new(RemoteTokenIntrospector::new(
                http,
                cfg.check_token_url(),
                credentials,
            )),
            policy: Arc::new(TrustPolicy::new(
                cfg.auth.client_id.clone(),
                cfg.auth.api_key_prefix.clone(),
            )),
            blocking_hooks: cfg.hooks.blocking,
            loader_state: loader.as_ref().map(BulkLoader::subscribe),
        };

        tracing::info!(
            registry = %cfg.referencedata.url,
            loader = cfg.loader.enabled,
            strategy = ?cfg.loader.strategy,
            blocking_hooks = cfg.hooks.blocking,
            "Bridge initialized"
        );

        Ok(BridgeServer {
            addr: cfg.addr(),
            app: build_app(state.clone(), &cfg.server),
            state,
            loader,
            cancel: CancellationToken::new(),
        })
    }
}

/// Blocking hooks run inside the request transaction and are registered
/// as is. Background hooks get a transaction of their own per delivery.
async fn register_sync_hook<S: LocationSync>(
    hooks: &HookRegistry,
    hook: LocationSyncHook<S>,
    storage: &Arc<dyn FhirStorage>,
    blocking: bool,
) {
    let hook = Arc::new(hook);
    if blocking {
        hooks.register(hook).await;
    } else {
        hooks
            .register(Arc::new(TransactionalHook::new(hook, storage.clone())))
            .await;
    }
}

pub struct BridgeServer {
    addr: SocketAddr,
    app: Router,
    state: AppState,
    loader: Option<BulkLoader>,
    cancel: CancellationToken,
}

impl BridgeServer {
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Cancelling stops the bulk loader and the HTTP server.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("binding {}", self.addr))?;
        tracing::info!("listening on {}", self.addr);

        let loader_task = self
            .loader
            .map(|loader| tokio::spawn(run_loader(loader, self.cancel.clone())));

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await?;

        self.cancel.cancel();
        if let Some(task) = loader_task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Bulk load task did not finish cleanly");
            }
        }
        Ok(())
    }
}

async fn run_loader(loader: BulkLoader, cancel: CancellationToken) {
    match loader.run(cancel).await {
        Ok(summary) => tracing::info!(
            zones = summary.zones,
            facilities = summary.facilities,
            "Locations loaded from reference data service"
        ),
        Err(LoadError::Cancelled) => tracing::info!("Bulk load cancelled"),
        Err(e) => tracing::error!(error = %e, "Bulk load failed"),
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();
}
