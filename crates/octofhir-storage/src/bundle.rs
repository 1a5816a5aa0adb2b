//! FHIR transaction bundles.
//!
//! [`execute_transaction_bundle`] applies every entry of a `transaction`
//! bundle inside one storage transaction: either all entries are written or
//! none are.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::StorageError;
use crate::traits::{FhirStorage, Transaction};
use crate::types::{StoredResource, resource_id_of, resource_type_of};

pub const BUNDLE_TYPE_TRANSACTION: &str = "transaction";
pub const BUNDLE_TYPE_TRANSACTION_RESPONSE: &str = "transaction-response";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bundle {
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    #[serde(rename = "type")]
    pub bundle_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub entry: Vec<BundleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleEntry {
    #[serde(rename = "fullUrl", skip_serializing_if = "Option::is_none")]
    pub full_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<BundleEntryRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<BundleEntryResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleEntryRequest {
    pub method: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleEntryResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl Bundle {
    /// A transaction bundle that upserts each resource with `PUT Type/id`.
    ///
    /// Resources without an id are sent as `POST Type`.
    pub fn transaction_upsert(resources: impl IntoIterator<Item = Value>) -> Self {
        let entry = resources
            .into_iter()
            .map(|resource| {
                let resource_type = resource
                    .get("resourceType")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let request = match resource_id_of(&resource) {
                    Some(id) => BundleEntryRequest {
                        method: "PUT".into(),
                        url: format!("{resource_type}/{id}"),
                    },
                    None => BundleEntryRequest {
                        method: "POST".into(),
                        url: resource_type,
                    },
                };
                BundleEntry {
                    full_url: None,
                    resource: Some(resource),
                    request: Some(request),
                    response: None,
                }
            })
            .collect();

        Self {
            resource_type: "Bundle".into(),
            bundle_type: BUNDLE_TYPE_TRANSACTION.into(),
            entry,
        }
    }

    pub fn is_transaction(&self) -> bool {
        self.resource_type == "Bundle" && self.bundle_type == BUNDLE_TYPE_TRANSACTION
    }
}

/// True if `body` is a FHIR `Bundle` of type `transaction`.
pub fn is_transaction_bundle(body: &Value) -> bool {
    body.get("resourceType").and_then(Value::as_str) == Some("Bundle")
        && body.get("type").and_then(Value::as_str) == Some(BUNDLE_TYPE_TRANSACTION)
}

/// Apply a transaction bundle atomically and build the `transaction-response`.
pub async fn execute_transaction_bundle(
    storage: &dyn FhirStorage,
    bundle: &Bundle,
) -> Result<Bundle, StorageError> {
    if !bundle.is_transaction() {
        return Err(StorageError::invalid_resource(format!(
            "expected a transaction Bundle, got type '{}'",
            bundle.bundle_type
        )));
    }

    let mut tx = storage.begin_transaction().await?;
    let mut responses = Vec::with_capacity(bundle.entry.len());

    for (index, entry) in bundle.entry.iter().enumerate() {
        match apply_entry(tx.as_mut(), entry).await {
            Ok(response) => responses.push(response),
            Err(e) => {
                tx.rollback().await?;
                return Err(match e {
                    StorageError::InvalidResource { message } => {
                        StorageError::invalid_resource(format!("entry {index}: {message}"))
                    }
                    other => other,
                });
            }
        }
    }

    tx.commit().await?;
    debug!(entries = responses.len(), "Transaction bundle committed");

    Ok(Bundle {
        resource_type: "Bundle".into(),
        bundle_type: BUNDLE_TYPE_TRANSACTION_RESPONSE.into(),
        entry: responses,
    })
}

async fn apply_entry(
    tx: &mut dyn Transaction,
    entry: &BundleEntry,
) -> Result<BundleEntry, StorageError> {
    let request = entry
        .request
        .as_ref()
        .ok_or_else(|| StorageError::invalid_resource("entry has no request"))?;
    let resource = entry
        .resource
        .as_ref()
        .ok_or_else(|| StorageError::invalid_resource("entry has no resource"))?;
    let resource_type = resource_type_of(resource)?;

    let (stored, status) = match request.method.to_ascii_uppercase().as_str() {
        "PUT" => {
            let url = request.url.trim_start_matches('/');
            let (url_type, url_id) = url
                .split_once('/')
                .ok_or_else(|| StorageError::invalid_resource(format!("bad PUT url '{url}'")))?;
            if url_type != resource_type {
                return Err(StorageError::invalid_resource(format!(
                    "PUT url '{url}' does not match resourceType {resource_type}"
                )));
            }
            if let Some(id) = resource_id_of(resource)
                && id != url_id
            {
                return Err(StorageError::invalid_resource(format!(
                    "resource id '{id}' does not match PUT url '{url}'"
                )));
            }

            let mut body = resource.clone();
            body["id"] = Value::String(url_id.to_string());
            let existed = tx.read(resource_type, url_id).await?.is_some();
            let stored = tx.update(&body).await?;
            (stored, if existed { "200 OK" } else { "201 Created" })
        }
        "POST" => (tx.create(resource).await?, "201 Created"),
        other => {
            return Err(StorageError::invalid_resource(format!(
                "unsupported transaction method {other}"
            )));
        }
    };

    Ok(response_entry(&stored, status))
}

fn response_entry(stored: &StoredResource, status: &str) -> BundleEntry {
    BundleEntry {
        full_url: None,
        resource: None,
        request: None,
        response: Some(BundleEntryResponse {
            status: status.to_string(),
            location: Some(stored.versioned_location()),
            etag: Some(format!("W/\"{}\"", stored.version_id)),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transaction_upsert_builds_put_entries() {
        let bundle = Bundle::transaction_upsert(vec![
            json!({"resourceType": "Location", "id": "a"}),
            json!({"resourceType": "Location"}),
        ]);

        assert!(bundle.is_transaction());
        let requests: Vec<_> = bundle
            .entry
            .iter()
            .map(|e| e.request.clone().unwrap())
            .collect();
        assert_eq!(requests[0].method, "PUT");
        assert_eq!(requests[0].url, "Location/a");
        assert_eq!(requests[1].method, "POST");
        assert_eq!(requests[1].url, "Location");
    }

    #[test]
    fn test_is_transaction_bundle() {
        assert!(is_transaction_bundle(
            &json!({"resourceType": "Bundle", "type": "transaction"})
        ));
        assert!(!is_transaction_bundle(
            &json!({"resourceType": "Bundle", "type": "batch"})
        ));
        assert!(!is_transaction_bundle(&json!({"resourceType": "Location"})));
    }
}
