use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use octofhir_core::{Principal, ResourceEvent, ResourceEventType};
use octofhir_refdata::location::{Location, RESOURCE_TYPE};
use octofhir_refdata::VersionInfo;
use octofhir_storage::{
    Bundle, StoredResource, execute_transaction_bundle, in_transaction, is_transaction_bundle,
};
use serde::Serialize;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::server::AppState;

const FHIR_JSON: &str = "application/fhir+json";

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let loader = state
        .loader_state
        .as_ref()
        .map(|rx| rx.borrow().as_str());
    Json(json!({
        "status": "ok",
        "storage": state.storage.backend_name(),
        "loader": loader,
    }))
}

/// `GET /fhir`: service name and build information.
pub async fn version() -> Json<VersionInfo> {
    Json(VersionInfo {
        service: Some(env!("CARGO_PKG_NAME").to_string()),
        build: option_env!("BUILD_NUMBER").map(str::to_string),
        branch: option_env!("GIT_BRANCH").map(str::to_string),
        time_stamp: option_env!("BUILD_TIMESTAMP").map(str::to_string),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    })
}

/// `POST /fhir`: apply a transaction Bundle atomically.
///
/// Bundle writes come from the bulk loader and do not emit resource events.
pub async fn transaction(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    if !is_transaction_bundle(&body) {
        return Err(ApiError::bad_request(
            "only Bundles of type 'transaction' are accepted at the base endpoint",
        ));
    }
    let bundle: Bundle = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("invalid Bundle: {e}")))?;

    let response = execute_transaction_bundle(state.storage.as_ref(), &bundle).await?;
    tracing::debug!(entries = response.entry.len(), "Transaction bundle applied");
    Ok(fhir_json(StatusCode::OK, &response))
}

pub async fn read_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let stored = state
        .storage
        .read(RESOURCE_TYPE, &id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("{RESOURCE_TYPE}/{id}")))?;
    Ok(resource_response(StatusCode::OK, &stored))
}

pub async fn create_location(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    check_location(&body)?;
    let (stored, _) = write_location(&state, principal, body, None).await?;
    Ok(resource_response(StatusCode::CREATED, &stored))
}

pub async fn update_location(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(principal): Extension<Principal>,
    Json(mut body): Json<Value>,
) -> Result<Response, ApiError> {
    check_location(&body)?;
    match body.get("id").and_then(Value::as_str) {
        Some(body_id) if body_id != id => {
            return Err(ApiError::bad_request(format!(
                "resource id '{body_id}' does not match URL id '{id}'"
            )));
        }
        Some(_) => {}
        None => {
            if let Some(object) = body.as_object_mut() {
                object.insert("id".into(), Value::String(id.clone()));
            }
        }
    }

    let (stored, created) = write_location(&state, principal, body, Some(id)).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok(resource_response(status, &stored))
}

fn check_location(body: &Value) -> Result<(), ApiError> {
    Location::from_value(body.clone())
        .map(|_| ())
        .map_err(|e| ApiError::bad_request(format!("invalid Location: {e}")))
}

/// Write a Location in its own transaction and announce it to the hooks.
///
/// Blocking hooks run before commit, so a failed reverse-sync rolls the
/// write back and its error is the response. Background hooks are handed
/// the event only after commit. Returns whether the Location was new.
async fn write_location(
    state: &AppState,
    principal: Principal,
    resource: Value,
    id: Option<String>,
) -> Result<(StoredResource, bool), ApiError> {
    let hooks = state.hooks.clone();
    let blocking = state.blocking_hooks;

    let (stored, event) = in_transaction(state.storage.as_ref(), move |tx| {
        Box::pin(async move {
            let previous = match &id {
                Some(id) => tx.read(RESOURCE_TYPE, id).await?,
                None => None,
            };
            let stored = match id {
                Some(_) => tx.update(&resource).await?,
                None => tx.create(&resource).await?,
            };

            let event = match previous {
                Some(previous) => {
                    ResourceEvent::updated(RESOURCE_TYPE, &stored.id, stored.resource.clone())
                        .with_previous(Some(previous.resource))
                }
                None => ResourceEvent::created(RESOURCE_TYPE, &stored.id, stored.resource.clone()),
            }
            .with_version(stored.version_id.clone())
            .with_principal(Some(principal));

            if blocking {
                hooks.dispatch_and_wait(&event).await?;
            }
            Ok::<_, ApiError>((stored, event))
        })
    })
    .await?;

    tracing::info!(
        id = %stored.id,
        version = %stored.version_id,
        event = %event.event_type,
        "Location written"
    );
    if !blocking {
        state.hooks.dispatch(&event).await;
    }
    Ok((stored, event.event_type == ResourceEventType::Created))
}

fn resource_response(status: StatusCode, stored: &StoredResource) -> Response {
    let mut response = fhir_json(status, &stored.resource);
    if let Ok(etag) = HeaderValue::from_str(&format!("W/\"{}\"", stored.version_id)) {
        response.headers_mut().insert(header::ETAG, etag);
    }
    if status == StatusCode::CREATED {
        if let Ok(location) = HeaderValue::from_str(&stored.versioned_location()) {
            response.headers_mut().insert(header::LOCATION, location);
        }
    }
    response
}

fn fhir_json<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(bytes) => (
            status,
            [(header::CONTENT_TYPE, HeaderValue::from_static(FHIR_JSON))],
            bytes,
        )
            .into_response(),
        Err(e) => ApiError::internal(format!("unable to serialize response: {e}")).into_response(),
    }
}
