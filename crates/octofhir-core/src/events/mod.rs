//! Resource lifecycle events and the hooks that consume them.
//!
//! ```text
//!   storage write ──► ResourceEvent ──► HookRegistry
//!                                           │
//!                       ┌───────────────────┼───────────────────┐
//!                       ▼                   ▼                   ▼
//!                 ┌──────────┐        ┌──────────┐        ┌──────────┐
//!                 │  Hook 1  │        │  Hook 2  │        │  Hook 3  │
//!                 └──────────┘        └──────────┘        └──────────┘
//! ```
//!
//! Events carry the principal of the request that produced them, so hooks
//! never have to look up an ambient security context.
//!
//! - [`types`]: `ResourceEvent` and `ResourceEventType`
//! - [`hooks`]: `ResourceHook` trait and `HookError`
//! - [`registry`]: hook registration and dispatch

pub mod hooks;
pub mod registry;
pub mod types;

pub use hooks::{HookError, ResourceHook};
pub use registry::HookRegistry;
pub use types::{ResourceEvent, ResourceEventType};
