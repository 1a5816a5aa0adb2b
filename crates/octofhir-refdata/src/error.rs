//! Error types for registry access and reverse synchronization.

use crate::message::{LocalizedMessage, Message, keys};

/// Failures talking to the reference data registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The registry rejected the request with a structured `400` body.
    #[error("reference data service rejected the request: {0}")]
    ExternalApi(LocalizedMessage),

    /// A registry body could not be decoded.
    #[error("unable to parse reference data service response: {0}")]
    Io(#[source] serde_json::Error),

    /// Any other non-2xx answer.
    #[error("Unable to retrieve {resource}. Error code: {status}, response message: {body}")]
    DataRetrieval {
        resource: String,
        status: u16,
        body: String,
    },

    /// The request never produced a response (connection, timeout).
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// No access token could be obtained for the call.
    #[error("unable to obtain access token: {0}")]
    Token(String),
}

impl RegistryError {
    pub(crate) fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            url: url.into(),
            source,
        }
    }

    /// Message shown to API clients, if this error is client-facing.
    pub fn localized(&self) -> Option<LocalizedMessage> {
        match self {
            Self::ExternalApi(message) => Some(message.clone()),
            Self::Io(err) => Some(Message::new(keys::ERROR_IO).with_param(err).localize()),
            _ => None,
        }
    }
}

/// Failures while pushing a Location back into the registry.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A mandatory datum is missing or does not resolve.
    #[error("validation failed: {0}")]
    Validation(Message),

    /// The Location carries a physical type code outside the FHIR code set.
    ///
    /// Treated as malformed data, never retried.
    #[error("unknown location physical type code '{0}'")]
    UnknownPhysicalType(String),

    /// The event payload is not a Location.
    #[error("invalid Location payload: {0}")]
    InvalidLocation(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl SyncError {
    pub(crate) fn validation(key: &str, param: impl std::fmt::Display) -> Self {
        Self::Validation(Message::new(key).with_param(param))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnknownPhysicalType(_))
    }
}
