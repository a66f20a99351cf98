//! Queuecast - publish a media queue to social platforms
//!
//! This library provides the pieces the `qcast-*` binaries are built from:
//! the queue abstraction, one adapter per platform, the token refresh and
//! polling helpers they share, and the orchestrator that ties a pass
//! together.

pub mod auth_retry;
pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod poll;
pub mod poster;
pub mod queue;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use credentials::{CredentialSource, Credentials, EnvCredentialSource};
pub use error::{QueuecastError, Result};
pub use poster::{create_platforms, PassOutcome, PassReport, QueuePoster};
pub use types::{MediaKind, PublishRequest, PublishResult, QueuedItem};
