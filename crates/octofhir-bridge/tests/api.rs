//! Router-level tests against a mocked registry and auth server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use octofhir_bridge::{AppConfig, ServerBuilder};
use octofhir_db_memory::InMemoryStorage;
use octofhir_refdata::keys;
use octofhir_storage::{FhirStorage, StorageError, StoredResource, Transaction};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FACILITY: &str = "7c4a2f4e-0f53-4b8b-9a3e-2d1b6c5e8f01";
const ZONE: &str = "1f0d8c55-6a7e-4e44-9b0f-3c2d1e0a9b02";
const FACILITY_TYPE: &str = "00000000-0000-0000-0000-000000000007";

const API_KEY_TOKEN: &str = "api-key-token";
const SERVICE_TOKEN: &str = "service-token";
const USER_TOKEN: &str = "user-token";

async fn check_token(server: &MockServer, token: &str, claims: Value) {
    Mock::given(method("POST"))
        .and(path("/api/oauth/check_token"))
        .and(query_param("token", token))
        .respond_with(ResponseTemplate::new(200).set_body_json(claims))
        .mount(server)
        .await;
}

/// Auth endpoints plus the registry records a site Location resolves to.
async fn mock_registry() -> MockServer {
    let server = MockServer::start().await;

    check_token(
        &server,
        API_KEY_TOKEN,
        json!({"client_id": "api-key-client-20240101"}),
    )
    .await;
    check_token(&server, SERVICE_TOKEN, json!({"client_id": "trusted-client"})).await;
    check_token(
        &server,
        USER_TOKEN,
        json!({"client_id": "user-client", "user_name": "administrator"}),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/api/oauth/token"))
        .and(query_param("grant_type", "client_credentials"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": SERVICE_TOKEN})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/api/facilities/{FACILITY}")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/geographicZones/{ZONE}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": ZONE, "code": "MW-S"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/api/facilityTypes/{FACILITY_TYPE}")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": FACILITY_TYPE, "code": "health_center"})),
        )
        .mount(&server)
        .await;

    server
}

fn config(registry: &MockServer) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.referencedata.url = registry.uri();
    cfg.referencedata.facility_type_id = Uuid::parse_str(FACILITY_TYPE).unwrap();
    cfg.loader.enabled = false;
    cfg.hooks.blocking = true;
    cfg.validate().unwrap();
    cfg
}

async fn bridge_with(registry: &MockServer, storage: Arc<dyn FhirStorage>) -> Router {
    ServerBuilder::new()
        .with_config(config(registry))
        .with_storage(storage)
        .build()
        .await
        .unwrap()
        .router()
}

async fn bridge(registry: &MockServer) -> (Router, InMemoryStorage) {
    let storage = InMemoryStorage::new();
    let app = bridge_with(registry, Arc::new(storage.clone())).await;
    (app, storage)
}

fn site(extra: Value) -> Value {
    let mut location = json!({
        "resourceType": "Location",
        "id": FACILITY,
        "alias": ["HC01"],
        "name": "Comfort Health Clinic",
        "status": "active",
        "physicalType": {"coding": [{
            "system": "http://terminology.hl7.org/CodeSystem/location-physical-type",
            "code": "si"
        }]},
        "partOf": {"reference": format!("Location/{ZONE}")},
        "position": {"longitude": 35.0, "latitude": -15.0}
    });
    if let (Some(location), Some(extra)) = (location.as_object_mut(), extra.as_object()) {
        for (key, value) in extra {
            location.insert(key.clone(), value.clone());
        }
    }
    location
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<&Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/fhir+json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn message_key(outcome: &Value) -> &str {
    outcome["issue"][0]["details"]["coding"][0]["code"]
        .as_str()
        .unwrap_or_default()
}

#[tokio::test]
async fn test_version_and_health_are_public() {
    let registry = mock_registry().await;
    let (app, _) = bridge(&registry).await;

    let (status, body) = send(&app, request("GET", "/fhir", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "octofhir-bridge");
    assert!(body["version"].is_string());

    let (status, body) = send(&app, request("GET", "/healthz", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["loader"], Value::Null);
}

#[tokio::test]
async fn test_requests_without_trusted_token_are_refused() {
    let registry = mock_registry().await;
    let (app, _) = bridge(&registry).await;

    let (status, body) = send(
        &app,
        request("GET", &format!("/fhir/Location/{FACILITY}"), None, None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(message_key(&body), keys::MISSING_AUTHORIZATION);

    let (status, body) = send(
        &app,
        request("GET", &format!("/fhir/Location/{FACILITY}"), Some(USER_TOKEN), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(message_key(&body), keys::INCORRECT_AUTHORIZATION);
}

#[tokio::test]
async fn test_api_key_write_is_pushed_to_registry() {
    let registry = mock_registry().await;
    Mock::given(method("PUT"))
        .and(path(format!("/api/facilities/{FACILITY}")))
        .respond_with(|req: &wiremock::Request| {
            ResponseTemplate::new(200).set_body_bytes(req.body.clone())
        })
        .expect(1)
        .mount(&registry)
        .await;
    let (app, storage) = bridge(&registry).await;

    let (status, body) = send(
        &app,
        request("POST", "/fhir/Location", Some(API_KEY_TOKEN), Some(&site(json!({})))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["id"], FACILITY);
    assert_eq!(storage.count("Location").await.unwrap(), 1);

    let pushed: Vec<Value> = registry
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "PUT")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0]["code"], "HC01");
    assert_eq!(pushed[0]["geographicZone"]["id"], ZONE);
    assert_eq!(pushed[0]["type"]["id"], FACILITY_TYPE);
    assert_eq!(pushed[0]["extraData"]["isManagedExternally"], "true");
}

#[tokio::test]
async fn test_service_writes_do_not_loop_back() {
    let registry = mock_registry().await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/api/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&registry)
        .await;
    let (app, storage) = bridge(&registry).await;

    let (status, _) = send(
        &app,
        request(
            "PUT",
            &format!("/fhir/Location/{FACILITY}"),
            Some(SERVICE_TOKEN),
            Some(&site(json!({}))),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(
        &app,
        request(
            "PUT",
            &format!("/fhir/Location/{FACILITY}"),
            Some(SERVICE_TOKEN),
            Some(&site(json!({"name": "Renamed Clinic"}))),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let stored = storage.read("Location", FACILITY).await.unwrap().unwrap();
    assert_eq!(stored.resource["name"], "Renamed Clinic");
}

#[tokio::test]
async fn test_validation_failure_rolls_back_the_write() {
    let registry = mock_registry().await;
    let (app, storage) = bridge(&registry).await;

    let (status, body) = send(
        &app,
        request(
            "PUT",
            &format!("/fhir/Location/{FACILITY}"),
            Some(API_KEY_TOKEN),
            Some(&site(json!({"alias": []}))),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(message_key(&body), keys::ERROR_FACILITY_CODE_REQUIRED);
    assert!(storage.read("Location", FACILITY).await.unwrap().is_none());
}

#[tokio::test]
async fn test_registry_rejection_carries_its_message() {
    let registry = mock_registry().await;
    Mock::given(method("PUT"))
        .and(path(format!("/api/facilities/{FACILITY}")))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "messageKey": "referenceData.error.facility.code.duplicated",
            "message": "Facility code HC01 is already used"
        })))
        .mount(&registry)
        .await;
    let (app, _) = bridge(&registry).await;

    let (status, body) = send(
        &app,
        request("POST", "/fhir/Location", Some(API_KEY_TOKEN), Some(&site(json!({})))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        message_key(&body),
        "referenceData.error.facility.code.duplicated"
    );
    assert_eq!(
        body["issue"][0]["details"]["text"],
        "Facility code HC01 is already used"
    );
}

#[tokio::test]
async fn test_unknown_physical_type_is_a_server_error() {
    let registry = mock_registry().await;
    let (app, storage) = bridge(&registry).await;

    let location = site(json!({"physicalType": {"coding": [{"code": "spaceship"}]}}));
    let (status, _) = send(
        &app,
        request("POST", "/fhir/Location", Some(API_KEY_TOKEN), Some(&location)),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(storage.count("Location").await.unwrap(), 0);
}

#[tokio::test]
async fn test_transaction_bundle_is_applied_without_reverse_sync() {
    let registry = mock_registry().await;
    Mock::given(method("PUT"))
        .and(path_regex(r"^/api/"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&registry)
        .await;
    let (app, storage) = bridge(&registry).await;

    let zone = json!({
        "resourceType": "Location",
        "id": ZONE,
        "alias": ["MW-S"],
        "physicalType": {"coding": [{"code": "area"}]}
    });
    let bundle = json!({
        "resourceType": "Bundle",
        "type": "transaction",
        "entry": [
            {"resource": zone, "request": {"method": "PUT", "url": format!("Location/{ZONE}")}},
            {"resource": site(json!({})), "request": {"method": "PUT", "url": format!("Location/{FACILITY}")}}
        ]
    });

    let (status, body) = send(&app, request("POST", "/fhir", Some(API_KEY_TOKEN), Some(&bundle))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "transaction-response");
    assert_eq!(body["entry"].as_array().map(Vec::len), Some(2));
    assert_eq!(storage.count("Location").await.unwrap(), 2);

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/fhir",
            Some(SERVICE_TOKEN),
            Some(&json!({"resourceType": "Bundle", "type": "batch"})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_read_returns_stored_location() {
    let registry = mock_registry().await;
    let (app, storage) = bridge(&registry).await;
    storage.update(&site(json!({}))).await.unwrap();

    let (status, body) = send(
        &app,
        request("GET", &format!("/fhir/Location/{FACILITY}"), Some(SERVICE_TOKEN), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Comfort Health Clinic");

    let (status, body) = send(
        &app,
        request(
            "GET",
            "/fhir/Location/00000000-0000-0000-0000-0000000000ff",
            Some(SERVICE_TOKEN),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["resourceType"], "OperationOutcome");
}

#[tokio::test]
async fn test_health_reports_loader_state() {
    let registry = mock_registry().await;
    let mut cfg = AppConfig::default();
    cfg.referencedata.url = registry.uri();
    cfg.referencedata.facility_type_id = Uuid::parse_str(FACILITY_TYPE).unwrap();
    cfg.loader.strategy = octofhir_bridge::LoadStrategy::Bundle;

    let server = ServerBuilder::new().with_config(cfg).build().await.unwrap();
    assert!(server.state().loader_state.is_some());

    let (status, body) = send(&server.router(), request("GET", "/healthz", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["loader"], "waiting-for-registry");
    assert_eq!(body["storage"], "memory");
}

#[derive(Default)]
struct TransactionCounter {
    begun: AtomicUsize,
    open: AtomicUsize,
    max_open: AtomicUsize,
}

/// Decrements the open count however the transaction ends.
struct OpenGuard(Arc<TransactionCounter>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.open.fetch_sub(1, Ordering::SeqCst);
    }
}

struct CountingStorage {
    inner: InMemoryStorage,
    counter: Arc<TransactionCounter>,
}

struct CountingTransaction {
    inner: Box<dyn Transaction>,
    _guard: OpenGuard,
}

#[async_trait]
impl FhirStorage for CountingStorage {
    async fn create(&self, resource: &Value) -> Result<StoredResource, StorageError> {
        self.inner.create(resource).await
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        self.inner.read(resource_type, id).await
    }

    async fn update(&self, resource: &Value) -> Result<StoredResource, StorageError> {
        self.inner.update(resource).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>, StorageError> {
        let inner = self.inner.begin_transaction().await?;
        self.counter.begun.fetch_add(1, Ordering::SeqCst);
        let open = self.counter.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.counter.max_open.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(CountingTransaction {
            inner,
            _guard: OpenGuard(self.counter.clone()),
        }))
    }

    async fn count(&self, resource_type: &str) -> Result<usize, StorageError> {
        self.inner.count(resource_type).await
    }

    fn backend_name(&self) -> &'static str {
        "counting"
    }
}

#[async_trait]
impl Transaction for CountingTransaction {
    async fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let CountingTransaction { inner, _guard } = *self;
        inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), StorageError> {
        let CountingTransaction { inner, _guard } = *self;
        inner.rollback().await
    }

    async fn create(&mut self, resource: &Value) -> Result<StoredResource, StorageError> {
        self.inner.create(resource).await
    }

    async fn update(&mut self, resource: &Value) -> Result<StoredResource, StorageError> {
        self.inner.update(resource).await
    }

    async fn read(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Option<StoredResource>, StorageError> {
        self.inner.read(resource_type, id).await
    }

    fn is_completed(&self) -> bool {
        self.inner.is_completed()
    }

    fn is_rollback_only(&self) -> bool {
        self.inner.is_rollback_only()
    }

    fn set_rollback_only(&mut self) {
        self.inner.set_rollback_only()
    }
}

#[tokio::test]
async fn test_blocking_hooks_share_the_request_transaction() {
    let registry = mock_registry().await;
    Mock::given(method("PUT"))
        .and(path(format!("/api/facilities/{FACILITY}")))
        .respond_with(|req: &wiremock::Request| {
            ResponseTemplate::new(200).set_body_bytes(req.body.clone())
        })
        .expect(2)
        .mount(&registry)
        .await;
    let counter = Arc::new(TransactionCounter::default());
    let storage = Arc::new(CountingStorage {
        inner: InMemoryStorage::new(),
        counter: counter.clone(),
    });
    let app = bridge_with(&registry, storage).await;

    let (status, _) = send(
        &app,
        request("POST", "/fhir/Location", Some(API_KEY_TOKEN), Some(&site(json!({})))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(counter.begun.load(Ordering::SeqCst), 1);

    let (status, _) = send(
        &app,
        request(
            "PUT",
            &format!("/fhir/Location/{FACILITY}"),
            Some(API_KEY_TOKEN),
            Some(&site(json!({"name": "Renamed Clinic"}))),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(counter.begun.load(Ordering::SeqCst), 2);
    assert_eq!(counter.max_open.load(Ordering::SeqCst), 1);
    assert_eq!(counter.open.load(Ordering::SeqCst), 0);
}
