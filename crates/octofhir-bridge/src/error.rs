//! HTTP error mapping.
//!
//! Every failure leaves the bridge as a FHIR `OperationOutcome`. Errors that
//! carry a message key (validation, registry rejections, authorization) put
//! the key in `issue.details.coding` and the resolved text in
//! `issue.details.text`.

use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use octofhir_core::{AuthError, HookError};
use octofhir_refdata::{LocalizedMessage, Message, RegistryError, SyncError, keys};
use octofhir_storage::StorageError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome {
    pub resource_type: &'static str,
    pub issue: Vec<OperationOutcomeIssue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationOutcomeIssue {
    pub severity: &'static str,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<IssueDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueDetails {
    pub coding: Vec<IssueCoding>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssueCoding {
    pub code: String,
}

impl OperationOutcome {
    pub fn single(severity: &'static str, code: &'static str, diagnostics: impl Into<String>) -> Self {
        Self {
            resource_type: "OperationOutcome",
            issue: vec![OperationOutcomeIssue {
                severity,
                code,
                details: None,
                diagnostics: Some(diagnostics.into()),
            }],
        }
    }

    pub fn localized(severity: &'static str, code: &'static str, message: &LocalizedMessage) -> Self {
        Self {
            resource_type: "OperationOutcome",
            issue: vec![OperationOutcomeIssue {
                severity,
                code,
                details: Some(IssueDetails {
                    coding: vec![IssueCoding {
                        code: message.message_key.clone(),
                    }],
                    text: message.message.clone(),
                }),
                diagnostics: Some(message.message.clone()),
            }],
        }
    }
}

/// API errors mapped to HTTP responses and FHIR OperationOutcome
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Upstream failure: {0}")]
    BadGateway(String),
    #[error("Internal server error: {0}")]
    Internal(String),
    /// A keyed message for the client, already resolved.
    #[error("{message}")]
    Localized {
        status: StatusCode,
        message: LocalizedMessage,
    },
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn localized(status: StatusCode, message: Message) -> Self {
        Self::Localized {
            status,
            message: message.localize(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Localized { status, .. } => *status,
        }
    }

    pub fn to_operation_outcome(&self) -> OperationOutcome {
        match self {
            ApiError::BadRequest(msg) => OperationOutcome::single("error", "invalid", msg),
            ApiError::NotFound(msg) => OperationOutcome::single("error", "not-found", msg),
            ApiError::Conflict(msg) => OperationOutcome::single("error", "conflict", msg),
            ApiError::BadGateway(msg) => OperationOutcome::single("error", "transient", msg),
            ApiError::Internal(msg) => OperationOutcome::single("fatal", "exception", msg),
            ApiError::Localized { status, message } => {
                let code = match *status {
                    StatusCode::UNAUTHORIZED => "login",
                    StatusCode::FORBIDDEN => "forbidden",
                    s if s.is_server_error() => "exception",
                    _ => "invalid",
                };
                OperationOutcome::localized("error", code, message)
            }
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Missing => Self::localized(
                StatusCode::UNAUTHORIZED,
                Message::new(keys::MISSING_AUTHORIZATION),
            ),
            AuthError::Incorrect(reason) => Self::localized(
                StatusCode::FORBIDDEN,
                Message::new(keys::INCORRECT_AUTHORIZATION).with_param(reason),
            ),
            AuthError::Introspection(reason) => Self::BadGateway(reason),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match &err {
            RegistryError::ExternalApi(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        match err.localized() {
            Some(message) => Self::Localized { status, message },
            None => Self::BadGateway(err.to_string()),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Validation(message) => Self::localized(StatusCode::BAD_REQUEST, message),
            SyncError::InvalidLocation(reason) => Self::BadRequest(reason),
            SyncError::UnknownPhysicalType(_) => {
                tracing::error!(error = %err, "Rejecting Location with malformed physical type");
                Self::Internal(err.to_string())
            }
            SyncError::Registry(inner) => inner.into(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => Self::NotFound(err.to_string()),
            StorageError::AlreadyExists { .. } => Self::Conflict(err.to_string()),
            StorageError::InvalidResource { message } => Self::BadRequest(message),
            StorageError::TransactionError { .. } => Self::Conflict(err.to_string()),
            StorageError::Internal { .. } => Self::Internal(err.to_string()),
        }
    }
}

impl From<HookError> for ApiError {
    fn from(err: HookError) -> Self {
        match err {
            HookError::Other(inner) => match inner.downcast::<SyncError>() {
                Ok(sync) => sync.into(),
                Err(inner) => match inner.downcast::<StorageError>() {
                    Ok(storage) => storage.into(),
                    Err(inner) => Self::Internal(inner.to_string()),
                },
            },
            HookError::Timeout { .. } => Self::BadGateway(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(status = %status.as_u16(), error = %self, "Request failed");
        }

        let outcome = self.to_operation_outcome();
        let body = serde_json::to_vec(&outcome).unwrap_or_else(|_| b"{}".to_vec());

        let mut response = (status, body).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/fhir+json"),
        );
        response
    }
}
