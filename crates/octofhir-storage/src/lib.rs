//! # octofhir-storage
//!
//! Storage abstraction layer for the OctoFHIR bridge.
//!
//! This crate defines the traits that storage backends implement, plus the
//! pieces built purely on top of them:
//!
//! - [`FhirStorage`] / [`Transaction`]: read, create, update-as-create and
//!   explicit transactions
//! - [`execute_transaction_bundle`]: atomic application of a FHIR
//!   `transaction` Bundle
//! - [`in_transaction`] / [`TransactionalHook`]: scoped transaction boundaries
//!   for request handling and hook delivery
//!
//! ## Example
//!
//! ```ignore
//! use octofhir_storage::{FhirStorage, in_transaction};
//!
//! async fn upsert(storage: &dyn FhirStorage, location: Value) -> Result<StoredResource, StorageError> {
//!     in_transaction(storage, |tx| Box::pin(async move { tx.update(&location).await })).await
//! }
//! ```

mod bundle;
mod error;
mod scope;
mod traits;
mod types;

pub use bundle::{
    BUNDLE_TYPE_TRANSACTION, BUNDLE_TYPE_TRANSACTION_RESPONSE, Bundle, BundleEntry,
    BundleEntryRequest, BundleEntryResponse, execute_transaction_bundle, is_transaction_bundle,
};
pub use error::StorageError;
pub use scope::{TransactionAwareHook, TransactionalHook, in_transaction};
pub use traits::{FhirStorage, Transaction};
pub use types::{StoredResource, resource_id_of, resource_type_of};
