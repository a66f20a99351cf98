//! Publish orchestration: one queued item per pass
//!
//! [`QueuePoster::run_once`] picks the next pending item, builds a single
//! [`PublishRequest`], hands it to every configured platform concurrently and
//! advances the item to posted only when all of them succeeded. A failed
//! platform never stops the others; the item simply stays pending for the
//! next pass.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::auth_retry::TokenRefresher;
use crate::config::Config;
use crate::credentials::{copy_secret, Credentials, SharedToken};
use crate::error::{ConfigError, PlatformError, Result};
use crate::platforms::facebook::FacebookPlatform;
use crate::platforms::graph::{GraphClient, PageTokenRefresher};
use crate::platforms::instagram::InstagramPlatform;
use crate::platforms::linkedin::LinkedInRelay;
use crate::platforms::x::XPlatform;
use crate::platforms::Platform;
use crate::poll::CancelFlag;
use crate::queue::{select_next, MediaUrlResolver, QueueSource};
use crate::transport::Transport;
use crate::types::{
    ItemState, MediaKind, PublishRequest, PublishResult, QueuedItem, DEFAULT_CAPTION,
};

/// How a pass ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PassOutcome {
    /// Nothing with a recognized media extension is pending
    NoPendingItem,
    /// Dry run: the item was selected but nothing was published or moved
    DryRun { key: String },
    /// Every platform succeeded and the item was moved
    Posted { key: String, posted_key: String },
    /// At least one platform failed; the item stays pending
    Failed { key: String },
    /// Every platform succeeded but the move did not complete
    MoveFailed { key: String, error: String },
}

/// Everything a pass did, for the summary
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    #[serde(flatten)]
    pub outcome: PassOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// The selected item; its state is `posted` only once the move completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<QueuedItem>,
    pub results: Vec<PublishResult>,
}

impl PassReport {
    fn new(outcome: PassOutcome) -> Self {
        Self {
            outcome,
            media_url: None,
            item: None,
            results: Vec::new(),
        }
    }

    /// Whether the pass counts as successful for the exit status
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            PassOutcome::NoPendingItem | PassOutcome::DryRun { .. } | PassOutcome::Posted { .. }
        )
    }
}

/// Publishes the next queued item to every configured platform
pub struct QueuePoster {
    queue: Arc<dyn QueueSource>,
    resolver: Arc<dyn MediaUrlResolver>,
    platforms: Vec<Box<dyn Platform>>,
    default_caption: String,
    dry_run: bool,
}

impl QueuePoster {
    pub fn new(
        queue: Arc<dyn QueueSource>,
        resolver: Arc<dyn MediaUrlResolver>,
        platforms: Vec<Box<dyn Platform>>,
    ) -> Self {
        Self {
            queue,
            resolver,
            platforms,
            default_caption: DEFAULT_CAPTION.to_string(),
            dry_run: false,
        }
    }

    pub fn with_default_caption(mut self, caption: impl Into<String>) -> Self {
        self.default_caption = caption.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn platform_names(&self) -> Vec<&str> {
        self.platforms.iter().map(|p| p.name()).collect()
    }

    /// The item the next pass would publish, with its caption resolved
    pub async fn next_item(&self) -> Result<Option<QueuedItem>> {
        let pending = self.queue.list_pending().await?;
        let Some(key) = select_next(&pending) else {
            return Ok(None);
        };
        let Some(media_kind) = MediaKind::from_name(key) else {
            return Ok(None);
        };

        let mut item = QueuedItem {
            key: key.clone(),
            media_kind,
            caption: self.default_caption.clone(),
            state: ItemState::Pending,
        };
        let caption_key = item.caption_key();
        match self.queue.read_caption(&caption_key).await {
            Ok(Some(caption)) => item.caption = caption,
            Ok(None) => {}
            Err(e) => warn!("Could not read caption {}: {}; using default", caption_key, e),
        }
        Ok(Some(item))
    }

    /// Publish `request` to every platform concurrently, waiting for all
    pub async fn publish_to_all(&self, request: &PublishRequest) -> Vec<PublishResult> {
        let futures = self.platforms.iter().map(|platform| async move {
            let name = platform.name().to_string();
            info!("Publishing to {}", name);
            match platform.publish(request).await {
                Ok(id) => {
                    info!("Published to {}: {}", name, id);
                    PublishResult::success(&name, id)
                }
                Err(e) => {
                    warn!("Failed to publish to {}: {}", name, e);
                    PublishResult::failure(&name, e.failure_kind(), e.to_string())
                }
            }
        });
        join_all(futures).await
    }

    /// Run one orchestration pass
    pub async fn run_once(&self) -> Result<PassReport> {
        if self.platforms.is_empty() {
            return Err(ConfigError::MissingField("platforms.enabled (no platform configured)".to_string()).into());
        }

        let Some(mut item) = self.next_item().await? else {
            info!("No pending media to publish");
            return Ok(PassReport::new(PassOutcome::NoPendingItem));
        };

        let media_url = self.resolver.public_url(&item.key).await?;
        info!(
            "Selected {} ({}) -> {}",
            item.key, item.media_kind, media_url
        );
        let request = PublishRequest::for_item(&item, media_url.clone());

        let mut report = PassReport::new(PassOutcome::DryRun {
            key: item.key.clone(),
        });
        report.media_url = Some(media_url);

        if self.dry_run {
            info!(
                "Dry run: would publish {} to {}",
                item.key,
                self.platform_names().join(", ")
            );
            report.item = Some(item);
            return Ok(report);
        }

        report.results = self.publish_to_all(&request).await;

        if !report.results.iter().all(|r| r.success) {
            let failed: Vec<&str> = report
                .results
                .iter()
                .filter(|r| !r.success)
                .map(|r| r.platform.as_str())
                .collect();
            warn!("{} stays pending; failed on {}", item.key, failed.join(", "));
            report.outcome = PassOutcome::Failed {
                key: item.key.clone(),
            };
            report.item = Some(item);
            return Ok(report);
        }

        report.outcome = match self.queue.advance_to_posted(&item.key).await {
            Ok(posted_key) => {
                info!("{} published everywhere, moved to {}", item.key, posted_key);
                item.state = ItemState::Posted;
                PassOutcome::Posted {
                    key: item.key.clone(),
                    posted_key,
                }
            }
            Err(e) => {
                warn!("{} published everywhere but could not be moved: {}", item.key, e);
                PassOutcome::MoveFailed {
                    key: item.key.clone(),
                    error: e.to_string(),
                }
            }
        };
        report.item = Some(item);
        Ok(report)
    }
}

/// Build the enabled platform adapters from configuration and credentials.
///
/// Every enabled platform must be fully configured; the first missing
/// identifier or secret is returned as a configuration error before any
/// network call is made.
pub fn create_platforms(
    config: &Config,
    credentials: &Credentials,
    transport: Arc<dyn Transport>,
    cancel: &CancelFlag,
) -> Result<Vec<Box<dyn Platform>>> {
    let enabled = config.enabled_platforms();
    if enabled.is_empty() {
        return Err(ConfigError::MissingField("platforms.enabled".to_string()).into());
    }

    let graph = GraphClient::new(
        Arc::clone(&transport),
        config.facebook.graph_base_url.clone(),
        credentials.fb_app_secret.as_ref().map(copy_secret),
    );
    let page_id = config.facebook.page_id.clone().filter(|p| !p.is_empty());
    let page_token = credentials
        .fb_page_token
        .as_ref()
        .map(|t| Arc::new(SharedToken::new(copy_secret(t))));

    let refresher: Option<Arc<dyn TokenRefresher>> = match (&credentials.fb_user_token, &page_id) {
        (Some(user_token), Some(page_id)) => Some(Arc::new(PageTokenRefresher::new(
            graph.clone(),
            copy_secret(user_token),
            page_id.clone(),
        ))),
        _ => None,
    };
    if refresher.is_none() && (enabled.contains(&"facebook") || enabled.contains(&"instagram")) {
        warn!("FB_LONG_LIVED_USER_TOKEN not set; expired page tokens cannot be refreshed");
    }

    let mut platforms: Vec<Box<dyn Platform>> = Vec::new();
    for name in enabled {
        match name {
            "facebook" => {
                if page_id.is_none() {
                    return Err(missing("Facebook", "FB_PAGE_ID"));
                }
                if page_token.is_none() {
                    return Err(missing("Facebook", "FB_PAGE_TOKEN"));
                }
                let mut platform = FacebookPlatform::new(graph.clone(), page_id.clone(), page_token.clone());
                if let Some(refresher) = &refresher {
                    platform = platform.with_refresher(Arc::clone(refresher));
                }
                platforms.push(Box::new(platform));
            }
            "instagram" => {
                let user_id = config.instagram.user_id.clone().filter(|id| !id.is_empty());
                if user_id.is_none() {
                    return Err(missing("Instagram", "IG_USER_ID"));
                }
                // Without a dedicated token Instagram shares the page token cell
                let token = match &credentials.ig_page_token {
                    Some(token) => Some(Arc::new(SharedToken::new(copy_secret(token)))),
                    None => page_token.clone(),
                };
                if token.is_none() {
                    return Err(missing("Instagram", "IG_PAGE_TOKEN or FB_PAGE_TOKEN"));
                }
                let mut platform = InstagramPlatform::new(graph.clone(), user_id, token)
                    .with_poll_policy(config.polling.policy())
                    .with_video_polling(config.instagram.poll_video)
                    .with_cancel_flag(cancel.clone());
                if let Some(refresher) = &refresher {
                    platform = platform.with_refresher(Arc::clone(refresher));
                }
                platforms.push(Box::new(platform));
            }
            "x" => {
                let x_credentials = credentials.x()?;
                let platform = XPlatform::new(Arc::clone(&transport), Some(x_credentials))
                    .with_endpoints(config.x.upload_url.clone(), config.x.api_base_url.clone())
                    .with_poll_policy(config.polling.policy())
                    .with_cancel_flag(cancel.clone());
                platforms.push(Box::new(platform));
            }
            "linkedin" => {
                let webhook = config.linkedin.webhook_url.clone().filter(|u| !u.is_empty());
                if webhook.is_none() {
                    return Err(missing("LinkedIn", "MAKE_WEBHOOK_URL"));
                }
                platforms.push(Box::new(LinkedInRelay::new(Arc::clone(&transport), webhook)));
            }
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "platforms.enabled".to_string(),
                    message: format!("unknown platform '{}'", other),
                }
                .into())
            }
        }
    }

    info!(
        "Configured platforms: {}",
        platforms.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
    );
    Ok(platforms)
}

fn missing(platform: &str, what: &str) -> crate::error::QueuecastError {
    PlatformError::Configuration(format!("{} is enabled but {} is not set", platform, what)).into()
}
