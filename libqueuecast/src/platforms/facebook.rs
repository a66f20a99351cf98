//! Facebook Page publishing (feed post adapter)
//!
//! One Graph call per publish: `/{page}/videos` for video, `/{page}/photos`
//! for images and `/{page}/feed` for text. An expired page token (code 190)
//! is refreshed from the long-lived user token and the call retried once.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::auth_retry::{AuthRetryPolicy, TokenRefresher};
use crate::credentials::SharedToken;
use crate::error::{PlatformError, Result};
use crate::platforms::graph::GraphClient;
use crate::platforms::Platform;
use crate::types::PublishRequest;

pub const FACEBOOK_CAPTION_LIMIT: usize = 2000;

pub struct FacebookPlatform {
    graph: GraphClient,
    page_id: Option<String>,
    token: Option<Arc<SharedToken>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    retry: AuthRetryPolicy,
}

impl FacebookPlatform {
    pub fn new(graph: GraphClient, page_id: Option<String>, token: Option<Arc<SharedToken>>) -> Self {
        Self {
            graph,
            page_id: page_id.filter(|p| !p.is_empty()),
            token,
            refresher: None,
            retry: AuthRetryPolicy::default(),
        }
    }

    /// Enable page-token refresh on auth expiry
    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_retry_policy(mut self, retry: AuthRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Endpoint path and form fields for a request (without the token)
    fn build_call(&self, page_id: &str, request: &PublishRequest) -> (String, Vec<(String, String)>) {
        let caption = request.caption_within(FACEBOOK_CAPTION_LIMIT);
        match &request.media_url {
            Some(url) if request.is_video() => (
                format!("{}/videos", page_id),
                vec![
                    ("description".to_string(), caption),
                    ("file_url".to_string(), url.clone()),
                ],
            ),
            Some(url) => (
                format!("{}/photos", page_id),
                vec![
                    ("caption".to_string(), caption),
                    ("url".to_string(), url.clone()),
                ],
            ),
            None => (
                format!("{}/feed", page_id),
                vec![("message".to_string(), caption)],
            ),
        }
    }
}

/// Post id from a Graph publish response (`post_id` for photos, else `id`)
fn extract_post_id(value: &serde_json::Value) -> Option<String> {
    ["post_id", "id"]
        .iter()
        .filter_map(|field| value.get(*field))
        .find_map(|v| match v {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

#[async_trait]
impl Platform for FacebookPlatform {
    fn name(&self) -> &str {
        "facebook"
    }

    fn caption_limit(&self) -> Option<usize> {
        Some(FACEBOOK_CAPTION_LIMIT)
    }

    fn is_configured(&self) -> bool {
        self.page_id.is_some() && self.token.is_some()
    }

    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        let (page_id, token) = match (&self.page_id, &self.token) {
            (Some(page_id), Some(token)) => (page_id, token),
            _ => {
                return Err(PlatformError::Configuration(
                    "Facebook needs FB_PAGE_ID and FB_PAGE_TOKEN".to_string(),
                )
                .into())
            }
        };

        let (path, fields) = self.build_call(page_id, request);
        info!("Facebook: posting to /{}", path);

        let graph = &self.graph;
        let path = path.as_str();
        let value = self
            .retry
            .run("facebook", token, self.refresher.as_deref(), |snapshot| {
                let fields = fields.clone();
                async move { graph.post_form(path, fields, snapshot.expose()).await }
            })
            .await?;

        let id = extract_post_id(&value).ok_or_else(|| {
            PlatformError::Posting(format!("Facebook response has no post id: {}", value))
        })?;
        info!("Facebook: published {}", id);
        Ok(id)
    }
}
