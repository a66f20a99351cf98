//! Error types for Queuecast

use thiserror::Error;

use crate::types::FailureKind;

pub type Result<T> = std::result::Result<T, QueuecastError>;

#[derive(Error, Debug)]
pub enum QueuecastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl QueuecastError {
    /// Returns the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            QueuecastError::Config(_) => 2,
            QueuecastError::Platform(PlatformError::Configuration(_)) => 2,
            QueuecastError::InvalidInput(_) => 3,
            QueuecastError::Queue(_) => 1,
            QueuecastError::Platform(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue storage I/O failed for {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid queue key: {0}")]
    InvalidKey(String),

    #[error("Object store request failed for {key}: {source}")]
    Store {
        key: String,
        #[source]
        source: object_store::Error,
    },

    /// The copy into the posted location succeeded but removing the pending
    /// original did not, so the item now exists in both places.
    #[error("Item {key} was copied to {posted_key} but could not be removed from pending: {message}")]
    PartialMove {
        key: String,
        posted_key: String,
        message: String,
    },
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Missing configuration: {0}")]
    Configuration(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("API error (HTTP {status}{}): {message}", .code.map(|c| format!(", code {}", c)).unwrap_or_default())]
    Api {
        status: u16,
        code: Option<i64>,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Media processing failed: {0}")]
    Processing(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl PlatformError {
    /// Platform-defined numeric error code carried by an API failure
    pub fn graph_code(&self) -> Option<i64> {
        match self {
            PlatformError::Api { code, .. } => *code,
            _ => None,
        }
    }

    /// Classify this error for the per-platform result
    pub fn kind(&self) -> FailureKind {
        match self {
            PlatformError::Configuration(_) => FailureKind::Configuration,
            PlatformError::Authentication(_) => FailureKind::AuthExpired,
            PlatformError::Api {
                code: Some(crate::platforms::graph::TOKEN_EXPIRED_CODE),
                ..
            } => FailureKind::AuthExpired,
            PlatformError::Api { .. } | PlatformError::Network(_) | PlatformError::Posting(_) => {
                FailureKind::Transient
            }
            PlatformError::Validation(_) => FailureKind::Invalid,
            PlatformError::Processing(_) => FailureKind::Processing,
            PlatformError::Timeout(_) => FailureKind::Timeout,
            PlatformError::Cancelled(_) => FailureKind::Cancelled,
        }
    }
}

impl QueuecastError {
    /// Failure classification when this error came out of a platform adapter
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            QueuecastError::Platform(e) => e.kind(),
            QueuecastError::Config(_) => FailureKind::Configuration,
            QueuecastError::Queue(_) | QueuecastError::InvalidInput(_) => FailureKind::Transient,
        }
    }
}
