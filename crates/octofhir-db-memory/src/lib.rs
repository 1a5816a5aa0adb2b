//! In-memory FHIR storage backend for the OctoFHIR bridge.
//!
//! Implements `FhirStorage` from `octofhir-storage` on top of a `DashMap`,
//! with transactions that stage writes and apply them atomically on commit.
//!
//! # Example
//!
//! ```ignore
//! use octofhir_db_memory::InMemoryStorage;
//! use octofhir_storage::FhirStorage;
//!
//! let storage = InMemoryStorage::new();
//! let location = serde_json::json!({
//!     "resourceType": "Location",
//!     "id": "0b2a5d6e-4f7a-4c1e-9e61-1f4d3c2b1a00",
//!     "name": "Balaka District Hospital"
//! });
//! storage.update(&location).await?;
//! ```

mod storage;
mod transaction;

pub use octofhir_storage::{FhirStorage, StorageError, StoredResource};
pub use storage::{InMemoryStorage, StorageKey};
pub use transaction::InMemoryTransaction;
