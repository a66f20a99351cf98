//! Platform abstraction and the publish adapters
//!
//! Each adapter turns one [`PublishRequest`] into the platform's own publish
//! protocol and reports the platform-native id of the created post.
//!
//! | Adapter | Protocol shape |
//! |---|---|
//! | [`facebook::FacebookPlatform`] | single feed/photo/video call, auth-retry |
//! | [`instagram::InstagramPlatform`] | container, status poll, publish, auth-retry |
//! | [`x::XPlatform`] | media upload (chunked for large video), then post |
//! | [`linkedin::LinkedInRelay`] | JSON hand-off to a webhook relay |
//!
//! # Examples
//!
//! ```no_run
//! use libqueuecast::platforms::{Platform, mock::MockPlatform};
//! use libqueuecast::types::PublishRequest;
//!
//! # async fn example() -> libqueuecast::error::Result<()> {
//! let platform = MockPlatform::success("facebook");
//! let request = PublishRequest::text("Hello");
//! let id = platform.publish(&request).await?;
//! println!("{} -> {}", platform.name(), id);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use crate::error::Result;
use crate::types::PublishRequest;

pub mod facebook;
pub mod graph;
pub mod instagram;
pub mod linkedin;
pub mod oauth1;
pub mod x;

// Mock platform is available for all builds (not just tests) to support integration tests
pub mod mock;

/// Publish capability shared by every platform adapter
#[async_trait]
pub trait Platform: Send + Sync {
    /// Lowercase identifier (e.g., "facebook", "instagram")
    fn name(&self) -> &str;

    /// Maximum caption length in characters, or `None` if unlimited.
    ///
    /// Adapters clip the caption themselves; this is informational.
    fn caption_limit(&self) -> Option<usize>;

    /// Whether every credential and identifier the adapter needs is present
    fn is_configured(&self) -> bool;

    /// Publish the request and return the platform's post or media id.
    ///
    /// # Errors
    ///
    /// Returns a `PlatformError` classified by [`crate::error::PlatformError::kind`];
    /// the orchestrator turns it into a failed `PublishResult`.
    async fn publish(&self, request: &PublishRequest) -> Result<String>;
}
