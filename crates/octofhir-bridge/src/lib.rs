pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::{AppConfig, LoadStrategy, ServerConfig};
pub use error::{ApiError, OperationOutcome};
pub use observability::init_tracing;
pub use server::{AppState, BridgeServer, ServerBuilder, build_app};
