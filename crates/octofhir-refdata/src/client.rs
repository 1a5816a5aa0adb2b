//! Authenticated REST access to registry collections.
//!
//! [`RemoteResourceClient`] speaks to one collection (`/api/facilities`,
//! `/api/geographicZones`, ...) and translates non-2xx answers:
//!
//! | Answer                         | Result                            |
//! |--------------------------------|-----------------------------------|
//! | `404` on `find_one`            | `Ok(None)`                        |
//! | `400` with a message body      | [`RegistryError::ExternalApi`]    |
//! | `400` with any other body      | [`RegistryError::Io`]             |
//! | anything else                  | [`RegistryError::DataRetrieval`]  |

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::auth::TokenProvider;
use crate::dto::{Page, RegistryResource, VersionInfo};
use crate::error::RegistryError;
use crate::message::LocalizedMessage;
use crate::params::RequestParameters;

/// Operations on one registry collection.
#[async_trait]
pub trait RemoteResource<T>: Send + Sync {
    async fn find_one(&self, id: Uuid) -> Result<Option<T>, RegistryError>;

    async fn find_all(&self) -> Result<Vec<T>, RegistryError>;

    /// `GET {collection}{resource_url}` with paging parameters.
    async fn get_page(
        &self,
        resource_url: &str,
        params: &RequestParameters,
    ) -> Result<Page<T>, RegistryError>;

    /// `POST {collection}{resource_url}` with a search payload.
    async fn get_page_with_payload(
        &self,
        resource_url: &str,
        params: &RequestParameters,
        payload: &Value,
    ) -> Result<Page<T>, RegistryError>;

    async fn create(&self, resource: &T) -> Result<T, RegistryError>;

    async fn update(&self, resource: &T) -> Result<T, RegistryError>;
}

pub struct RemoteResourceClient<T> {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
    _resource: PhantomData<fn() -> T>,
}

impl<T: RegistryResource> RemoteResourceClient<T> {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            _resource: PhantomData,
        }
    }

    pub fn service_url(&self) -> String {
        format!("{}{}", self.base_url, T::PATH)
    }

    async fn send<B: Serialize + ?Sized + Sync>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<Response, RegistryError> {
        let token = self.tokens.access_token().await?;
        trace!(%method, url, "Calling reference data service");

        let mut request = self
            .http
            .request(method, url)
            .header(ACCEPT, "application/json");
        if !token.trim().is_empty() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        request
            .send()
            .await
            .map_err(|e| RegistryError::transport(url, e))
    }

    async fn read_body<R: DeserializeOwned>(
        &self,
        url: &str,
        response: Response,
    ) -> Result<R, RegistryError> {
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RegistryError::transport(url, e))?;

        if status.is_success() {
            return serde_json::from_slice(&body).map_err(RegistryError::Io);
        }

        let body = String::from_utf8_lossy(&body).into_owned();
        debug!(url, status = status.as_u16(), "Reference data service returned an error");
        Err(Self::translate_error(status, body))
    }

    fn translate_error(status: StatusCode, body: String) -> RegistryError {
        if status == StatusCode::BAD_REQUEST {
            return match serde_json::from_str::<LocalizedMessage>(&body) {
                Ok(message) => RegistryError::ExternalApi(message),
                Err(e) => RegistryError::Io(e),
            };
        }
        RegistryError::DataRetrieval {
            resource: T::RESOURCE_NAME.to_string(),
            status: status.as_u16(),
            body,
        }
    }
}

#[async_trait]
impl<T: RegistryResource> RemoteResource<T> for RemoteResourceClient<T> {
    async fn find_one(&self, id: Uuid) -> Result<Option<T>, RegistryError> {
        let url = format!("{}/{id}", self.service_url());
        let response = self.send::<()>(Method::GET, &url, None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.read_body(&url, response).await.map(Some)
    }

    async fn find_all(&self) -> Result<Vec<T>, RegistryError> {
        let url = self.service_url();
        let response = self.send::<()>(Method::GET, &url, None).await?;
        self.read_body(&url, response).await
    }

    async fn get_page(
        &self,
        resource_url: &str,
        params: &RequestParameters,
    ) -> Result<Page<T>, RegistryError> {
        let url = params.append_to(&format!("{}{resource_url}", self.service_url()));
        let response = self.send::<()>(Method::GET, &url, None).await?;
        self.read_body(&url, response).await
    }

    async fn get_page_with_payload(
        &self,
        resource_url: &str,
        params: &RequestParameters,
        payload: &Value,
    ) -> Result<Page<T>, RegistryError> {
        let url = params.append_to(&format!("{}{resource_url}", self.service_url()));
        let response = self.send(Method::POST, &url, Some(payload)).await?;
        self.read_body(&url, response).await
    }

    async fn create(&self, resource: &T) -> Result<T, RegistryError> {
        let url = self.service_url();
        let response = self.send(Method::POST, &url, Some(resource)).await?;
        self.read_body(&url, response).await
    }

    async fn update(&self, resource: &T) -> Result<T, RegistryError> {
        let url = format!("{}/{}", self.service_url(), resource.id());
        let response = self.send(Method::PUT, &url, Some(resource)).await?;
        self.read_body(&url, response).await
    }
}

/// Availability probe used while waiting for the registry to come up.
#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    async fn version(&self) -> Result<VersionInfo, RegistryError>;
}

/// `GET {registry}/referencedata`; unauthenticated.
pub struct ReferenceDataVersionClient {
    http: reqwest::Client,
    url: String,
}

impl ReferenceDataVersionClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            url: format!("{}/referencedata", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl AvailabilityProbe for ReferenceDataVersionClient {
    async fn version(&self) -> Result<VersionInfo, RegistryError> {
        let response = self
            .http
            .get(&self.url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| RegistryError::transport(&self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::DataRetrieval {
                resource: "VersionInfo".into(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| RegistryError::transport(&self.url, e))?;
        serde_json::from_slice(&body).map_err(RegistryError::Io)
    }
}
