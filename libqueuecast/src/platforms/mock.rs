//! Mock platform implementation for testing
//!
//! A configurable stand-in for a publish adapter. It can succeed, fail with
//! any [`PlatformError`], or be slow, and it records every request it was
//! asked to publish. Used by the orchestrator's integration tests to check
//! aggregation without network access.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{PlatformError, Result};
use crate::platforms::Platform;
use crate::types::PublishRequest;

/// Configuration for mock platform behavior
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Platform name (e.g., "facebook", "mock-x")
    pub name: String,

    /// Error to return from publish; `None` means success
    pub error: Option<PlatformError>,

    /// Delay before completing (simulates network latency)
    pub delay: Duration,

    pub caption_limit: Option<usize>,

    pub is_configured: bool,

    /// Number of times publish has been called
    pub publish_call_count: Arc<Mutex<usize>>,

    /// Requests that have been published (for verification)
    pub published: Arc<Mutex<Vec<PublishRequest>>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            name: "mock".to_string(),
            error: None,
            delay: Duration::from_millis(0),
            caption_limit: None,
            is_configured: true,
            publish_call_count: Arc::new(Mutex::new(0)),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

/// Mock platform for testing
#[derive(Debug, Clone)]
pub struct MockPlatform {
    config: MockConfig,
}

impl MockPlatform {
    pub fn new(config: MockConfig) -> Self {
        Self { config }
    }

    /// A mock platform that always succeeds
    pub fn success(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            ..Default::default()
        })
    }

    /// A mock platform whose publish fails with `error`
    pub fn failure(name: &str, error: PlatformError) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            error: Some(error),
            ..Default::default()
        })
    }

    /// A mock platform that fails publishing with a generic posting error
    pub fn post_failure(name: &str, message: &str) -> Self {
        Self::failure(name, PlatformError::Posting(message.to_string()))
    }

    pub fn with_delay(name: &str, delay: Duration) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            delay,
            ..Default::default()
        })
    }

    pub fn not_configured(name: &str) -> Self {
        Self::new(MockConfig {
            name: name.to_string(),
            is_configured: false,
            ..Default::default()
        })
    }

    /// Number of times publish was called
    pub fn publish_call_count(&self) -> usize {
        *self.config.publish_call_count.lock().unwrap()
    }

    /// Every request that was published
    pub fn published(&self) -> Vec<PublishRequest> {
        self.config.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Platform for MockPlatform {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn caption_limit(&self) -> Option<usize> {
        self.config.caption_limit
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured
    }

    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        *self.config.publish_call_count.lock().unwrap() += 1;

        if !self.config.delay.is_zero() {
            sleep(self.config.delay).await;
        }

        if !self.config.is_configured {
            return Err(PlatformError::Configuration(format!(
                "{} is not configured",
                self.config.name
            ))
            .into());
        }

        if let Some(error) = &self.config.error {
            return Err(error.clone().into());
        }

        self.config
            .published
            .lock()
            .unwrap()
            .push(request.clone());

        Ok(format!("{}:mock-{}", self.config.name, uuid::Uuid::new_v4()))
    }
}
