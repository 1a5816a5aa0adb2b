use octofhir_db_memory::InMemoryStorage;
use octofhir_storage::{
    Bundle, BundleEntry, BundleEntryRequest, FhirStorage, StorageError,
    execute_transaction_bundle,
};
use serde_json::json;

fn zone(id: &str, name: &str) -> serde_json::Value {
    json!({"resourceType": "Location", "id": id, "name": name})
}

#[tokio::test]
async fn bundle_upserts_every_entry() {
    let storage = InMemoryStorage::new();
    let bundle = Bundle::transaction_upsert(vec![zone("a", "Malawi"), zone("b", "Southern")]);

    let response = execute_transaction_bundle(&storage, &bundle).await.unwrap();

    assert_eq!(response.bundle_type, "transaction-response");
    let statuses: Vec<_> = response
        .entry
        .iter()
        .map(|e| e.response.as_ref().unwrap().status.clone())
        .collect();
    assert_eq!(statuses, vec!["201 Created", "201 Created"]);
    assert_eq!(storage.count("Location").await.unwrap(), 2);
}

#[tokio::test]
async fn replaying_a_bundle_updates_instead_of_duplicating() {
    let storage = InMemoryStorage::new();
    let bundle = Bundle::transaction_upsert(vec![zone("a", "Malawi")]);

    execute_transaction_bundle(&storage, &bundle).await.unwrap();
    let response = execute_transaction_bundle(&storage, &bundle).await.unwrap();

    assert_eq!(
        response.entry[0].response.as_ref().unwrap().status,
        "200 OK"
    );
    assert_eq!(storage.count("Location").await.unwrap(), 1);
}

#[tokio::test]
async fn failing_entry_rolls_back_the_whole_bundle() {
    let storage = InMemoryStorage::new();
    let mut bundle = Bundle::transaction_upsert(vec![zone("a", "Malawi")]);
    bundle.entry.push(BundleEntry {
        full_url: None,
        resource: Some(zone("c", "Central")),
        request: Some(BundleEntryRequest {
            method: "PUT".into(),
            url: "Location/not-c".into(),
        }),
        response: None,
    });

    let err = execute_transaction_bundle(&storage, &bundle)
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::InvalidResource { .. }));
    assert!(storage.is_empty());
}

#[tokio::test]
async fn non_transaction_bundles_are_rejected() {
    let storage = InMemoryStorage::new();
    let mut bundle = Bundle::transaction_upsert(vec![zone("a", "Malawi")]);
    bundle.bundle_type = "batch".into();

    assert!(execute_transaction_bundle(&storage, &bundle).await.is_err());
}
