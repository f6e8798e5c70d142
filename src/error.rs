use std::sync::Arc;

/// Result type for fallible OFREP operations.
///
/// Flag resolution itself never returns this type: it always produces a
/// [`FlagResolution`](crate::FlagResolution). `Result` is used for configuration and for the raw
/// protocol calls on [`OfrepClient`](crate::OfrepClient).
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur before a resolution is produced.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// The base URL cannot carry a path (e.g., `mailto:` or `data:` URLs).
    #[error("base_url cannot be used as a base for OFREP paths")]
    BaseUrlCannotBeABase,

    /// The flag key cannot be sent as a single URL path segment (`""`, `"."` or `".."`).
    #[error("flag key {0:?} cannot be used as a path segment")]
    InvalidFlagKey(String),

    /// The request could not be assembled (e.g., an invalid header value).
    #[error("invalid request: {0}")]
    // http::Error is not clonable, so we're wrapping it in an Arc.
    InvalidRequest(Arc<http::Error>),

    /// The request body could not be encoded.
    #[error("failed to encode request body: {0}")]
    Encode(Arc<serde_json::Error>),

    /// A documented response carried a body that does not match the OFREP schema.
    #[error("failed to decode {operation_id} response: {source}")]
    Decode {
        /// Operation that received the response.
        operation_id: &'static str,
        /// Underlying JSON error.
        #[source]
        source: Arc<serde_json::Error>,
    },

    /// The transport failed to deliver the request or receive a response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Waiting for the shutdown signal failed.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<http::Error> for Error {
    fn from(value: http::Error) -> Self {
        Self::InvalidRequest(Arc::new(value))
    }
}

/// Errors reported by a [`Transport`](crate::Transport).
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Network error from the HTTP client.
    #[error(transparent)]
    Http(Arc<reqwest::Error>),

    /// The transport has been shut down and no longer accepts requests.
    #[error("transport has been shut down")]
    ShutDown,

    /// Any other failure raised by a custom transport.
    #[error("{0}")]
    Other(Arc<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// Wrap an arbitrary error raised by a custom transport.
    pub fn other(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Other(Arc::from(error.into()))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(value: reqwest::Error) -> Self {
        Self::Http(Arc::new(value.without_url()))
    }
}
