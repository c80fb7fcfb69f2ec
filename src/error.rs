//! Error types for the OPC provider.
//!
//! Two layers of errors exist: [`ApiError`] describes failures talking to the
//! OPC compute and storage APIs, and [`ProviderError`] is what lifecycle
//! operations surface to the host.

use thiserror::Error;

use crate::schema::Diagnostic;

/// Errors returned by the OPC compute and storage API clients.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The API answered with a non-success HTTP status.
    #[error("{status}: {message}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The response body or reason phrase.
        message: String,
    },

    /// The API rejected the credentials or returned no session.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body could not be decoded.
    #[error("Invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// A request URL could not be built from the endpoint.
    #[error("Invalid request URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// Whether the API reported that the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    /// Whether another attempt of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status >= 500,
            Self::Transport(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            _ => false,
        }
    }
}

/// Errors that can occur while serving a provider operation.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The supplied state or configuration is invalid.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provider is misconfigured or not configured yet.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An API call failed. `context` names the operation.
    #[error("{context}: {source}")]
    Api {
        /// Operation-specific message, e.g. `Error creating Security Rule`.
        context: String,
        /// The underlying API failure.
        #[source]
        source: ApiError,
    },
}

impl ProviderError {
    /// Wrap an API failure with an operation-specific message.
    pub fn api(context: impl Into<String>, source: ApiError) -> Self {
        Self::Api {
            context: context.into(),
            source,
        }
    }

    /// Get the error message without the variant prefix.
    pub fn message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg) => msg.clone(),
            Self::Serialization(err) => err.to_string(),
            Self::Api { context, .. } => context.clone(),
        }
    }

    /// The wrapped API error, if this is an API failure.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Api { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ProviderError> for Diagnostic {
    fn from(err: ProviderError) -> Self {
        match &err {
            ProviderError::Api { context, source } => {
                Diagnostic::error(context.clone()).with_detail(source.to_string())
            },
            _ => Diagnostic::error(err.to_string()),
        }
    }
}
