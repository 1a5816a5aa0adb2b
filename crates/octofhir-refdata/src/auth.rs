//! OAuth2 plumbing towards the auth server.
//!
//! - [`ClientCredentialsTokenProvider`] obtains the service token attached to
//!   every registry call.
//! - [`RemoteTokenIntrospector`] resolves inbound bearer tokens into a
//!   [`Principal`] through the check-token endpoint.

use async_trait::async_trait;
use octofhir_core::{AuthError, Principal, TokenIntrospector};
use serde::Deserialize;
use tracing::debug;

use crate::error::RegistryError;
use crate::params::RequestParameters;

/// Supplies the bearer token for outbound registry calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A blank token means "send the request unauthenticated".
    async fn access_token(&self) -> Result<String, RegistryError>;
}

/// OAuth2 client credentials shared by the token provider and introspector.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Client-credentials grant against `token_url`.
///
/// A token is requested per call; caching is left to the auth server.
pub struct ClientCredentialsTokenProvider {
    http: reqwest::Client,
    token_url: String,
    credentials: ClientCredentials,
}

impl ClientCredentialsTokenProvider {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        credentials: ClientCredentials,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            credentials,
        }
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsTokenProvider {
    async fn access_token(&self) -> Result<String, RegistryError> {
        let url = RequestParameters::new()
            .set("grant_type", "client_credentials")
            .append_to(&self.token_url);

        let response = self
            .http
            .post(&url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .send()
            .await
            .map_err(|e| RegistryError::Token(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::Token(format!("HTTP {status}: {body}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::Token(e.to_string()))?;
        debug!("Obtained service access token");
        Ok(token.access_token)
    }
}

/// Fixed token, for registries that accept a pre-issued key.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider(String);

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, RegistryError> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct CheckTokenResponse {
    #[serde(default)]
    client_id: Option<String>,
    #[serde(default)]
    user_name: Option<String>,
}

/// Resolves inbound tokens via `POST check_token_url?token=..`.
pub struct RemoteTokenIntrospector {
    http: reqwest::Client,
    check_token_url: String,
    credentials: ClientCredentials,
}

impl RemoteTokenIntrospector {
    pub fn new(
        http: reqwest::Client,
        check_token_url: impl Into<String>,
        credentials: ClientCredentials,
    ) -> Self {
        Self {
            http,
            check_token_url: check_token_url.into(),
            credentials,
        }
    }
}

#[async_trait]
impl TokenIntrospector for RemoteTokenIntrospector {
    async fn introspect(&self, token: &str) -> Result<Principal, AuthError> {
        let url = RequestParameters::new()
            .set("token", token)
            .append_to(&self.check_token_url);

        let response = self
            .http
            .post(&url)
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .send()
            .await
            .map_err(|e| AuthError::Introspection(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(AuthError::Incorrect("token was rejected".into()));
        }
        if !status.is_success() {
            return Err(AuthError::Introspection(format!(
                "check token endpoint answered HTTP {status}"
            )));
        }

        let claims: CheckTokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Introspection(e.to_string()))?;

        match (claims.client_id, claims.user_name) {
            (Some(client_id), Some(user_name)) => Ok(Principal::user(user_name, client_id)),
            (Some(client_id), None) => Ok(Principal::client(client_id)),
            (None, _) => Err(AuthError::Incorrect("token carries no client id".into())),
        }
    }
}
