//! Error types for the log shipper

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShipperError>;

/// Top-level error for the lifecycle API and the binary
#[derive(Debug, Error)]
pub enum ShipperError {
    /// Configuration could not be loaded or is unusable
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Engine was started outside a tokio runtime
    #[error("no tokio runtime available: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

/// A point could not be rendered into the wire format
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodingError {
    #[error("field name {0:?} cannot be encoded")]
    InvalidFieldName(String),
}

/// A payload could not be delivered to the remote endpoint
#[derive(Debug, Error)]
pub enum TransportError {
    /// Network or protocol failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The request did not complete within the configured timeout
    #[error("request timed out")]
    Timeout,

    /// The endpoint answered with a non-success status
    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Whether a retry has a chance of succeeding
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Http(_) | TransportError::Timeout => true,
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            TransportError::Other(_) => false,
        }
    }
}

/// One-time remote resource creation failed
#[derive(Debug, Error)]
#[error("provisioning step `{step}` failed: {source}")]
pub struct ProvisioningError {
    pub step: &'static str,
    #[source]
    pub source: TransportError,
}

/// Invalid or missing configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Access key or secret key missing
    #[error("credentials are required: {0} is empty")]
    MissingCredentials(&'static str),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}
