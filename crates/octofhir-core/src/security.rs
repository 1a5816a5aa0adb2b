//! Request principals and the trust rules applied to them.
//!
//! Principals are resolved once per request from the bearer token and then
//! passed explicitly to whatever needs them (handlers, lifecycle events).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The authenticated identity behind a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Principal {
    /// A service authenticated with client credentials only.
    Client { client_id: String },
    /// An end user acting through a client application.
    User { user_name: String, client_id: String },
}

impl Principal {
    pub fn client(client_id: impl Into<String>) -> Self {
        Self::Client {
            client_id: client_id.into(),
        }
    }

    pub fn user(user_name: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self::User {
            user_name: user_name.into(),
            client_id: client_id.into(),
        }
    }

    /// OAuth client id the token was issued to.
    pub fn client_id(&self) -> &str {
        match self {
            Self::Client { client_id } | Self::User { client_id, .. } => client_id,
        }
    }

    /// True when no user is attached to the token.
    pub fn is_client_only(&self) -> bool {
        matches!(self, Self::Client { .. })
    }

    /// True for client-only principals whose client id carries `prefix`.
    ///
    /// An empty prefix never matches.
    pub fn is_api_key(&self, prefix: &str) -> bool {
        !prefix.is_empty() && self.is_client_only() && self.client_id().starts_with(prefix)
    }
}

/// Why an inbound request was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// No bearer token was presented.
    #[error("authorization is missing")]
    Missing,
    /// A token was presented but its principal is not trusted.
    #[error("authorization is incorrect: {0}")]
    Incorrect(String),
    /// The token could not be checked against the auth server.
    #[error("token introspection failed: {0}")]
    Introspection(String),
}

/// Resolves a bearer token into a principal.
#[async_trait]
pub trait TokenIntrospector: Send + Sync {
    async fn introspect(&self, token: &str) -> Result<Principal, AuthError>;
}

/// Trust rules for inbound requests.
///
/// Only service principals are accepted: either this service's own client
/// or an api-key client.
#[derive(Debug, Clone)]
pub struct TrustPolicy {
    service_client_id: String,
    api_key_prefix: String,
}

impl TrustPolicy {
    pub fn new(service_client_id: impl Into<String>, api_key_prefix: impl Into<String>) -> Self {
        Self {
            service_client_id: service_client_id.into(),
            api_key_prefix: api_key_prefix.into(),
        }
    }

    pub fn api_key_prefix(&self) -> &str {
        &self.api_key_prefix
    }

    /// Check a resolved principal against the policy.
    pub fn authorize(&self, principal: Option<&Principal>) -> Result<(), AuthError> {
        let principal = principal.ok_or(AuthError::Missing)?;

        if !principal.is_client_only() {
            return Err(AuthError::Incorrect(format!(
                "user tokens are not accepted (client {})",
                principal.client_id()
            )));
        }

        let client_id = principal.client_id();
        if client_id == self.service_client_id || principal.is_api_key(&self.api_key_prefix) {
            Ok(())
        } else {
            Err(AuthError::Incorrect(format!("untrusted client {client_id}")))
        }
    }
}
