//! Instagram business account publishing (container, poll, publish)
//!
//! Publishing is a three-step protocol:
//!
//! 1. `POST /{ig_user}/media` creates a media container from the public URL.
//! 2. `GET /{container}?fields=status_code` is polled until the container is
//!    `FINISHED` (or `PUBLISHED`), `ERROR`/`FAILED`, or the budget runs out.
//! 3. `POST /{ig_user}/media_publish` with `creation_id` makes it visible.
//!
//! Reels skip step 2 unless `poll_video` is enabled; the platform finishes
//! processing video on its own schedule. Container creation is wrapped in the
//! auth-retry policy.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::auth_retry::{AuthRetryPolicy, TokenRefresher};
use crate::credentials::SharedToken;
use crate::error::{PlatformError, Result};
use crate::platforms::graph::GraphClient;
use crate::platforms::Platform;
use crate::poll::{poll_until, CancelFlag, PollPolicy, PollStatus};
use crate::types::PublishRequest;

pub const INSTAGRAM_CAPTION_LIMIT: usize = 2200;

pub struct InstagramPlatform {
    graph: GraphClient,
    ig_user_id: Option<String>,
    token: Option<Arc<SharedToken>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    retry: AuthRetryPolicy,
    poll: PollPolicy,
    poll_video: bool,
    cancel: CancelFlag,
}

impl InstagramPlatform {
    pub fn new(
        graph: GraphClient,
        ig_user_id: Option<String>,
        token: Option<Arc<SharedToken>>,
    ) -> Self {
        Self {
            graph,
            ig_user_id: ig_user_id.filter(|id| !id.is_empty()),
            token,
            refresher: None,
            retry: AuthRetryPolicy::default(),
            poll: PollPolicy::default(),
            poll_video: false,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Also wait for reels containers to finish processing
    pub fn with_video_polling(mut self, enabled: bool) -> Self {
        self.poll_video = enabled;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    async fn create_container(
        &self,
        ig_user_id: &str,
        token: &SharedToken,
        request: &PublishRequest,
        media_url: &str,
    ) -> Result<String> {
        let mut fields = vec![(
            "caption".to_string(),
            request.caption_within(INSTAGRAM_CAPTION_LIMIT),
        )];
        if request.is_video() {
            fields.push(("video_url".to_string(), media_url.to_string()));
            fields.push(("media_type".to_string(), "REELS".to_string()));
            fields.push(("share_to_feed".to_string(), "true".to_string()));
        } else {
            fields.push(("image_url".to_string(), media_url.to_string()));
        }

        let graph = &self.graph;
        let path = format!("{}/media", ig_user_id);
        let path = path.as_str();
        let value = self
            .retry
            .run("instagram", token, self.refresher.as_deref(), |snapshot| {
                let fields = fields.clone();
                async move { graph.post_form(path, fields, snapshot.expose()).await }
            })
            .await?;

        value
            .get("id")
            .and_then(|id| id.as_str())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                PlatformError::Posting(format!("Instagram container creation returned no id: {}", value))
                    .into()
            })
    }

    async fn container_status(&self, container_id: &str, token: &SharedToken) -> Result<PollStatus> {
        let snapshot = token.snapshot().await;
        let value = self
            .graph
            .get(container_id, &[("fields", "status_code")], snapshot.expose())
            .await?;
        Ok(classify_status(&value))
    }

    async fn wait_until_ready(&self, container_id: &str, token: &SharedToken) -> Result<()> {
        let what = format!("Instagram container {}", container_id);
        poll_until(&what, self.poll, &self.cancel, |_| {
            self.container_status(container_id, token)
        })
        .await
        .into_result(&what)
    }

    async fn publish_container(
        &self,
        ig_user_id: &str,
        token: &SharedToken,
        container_id: &str,
    ) -> Result<String> {
        let snapshot = token.snapshot().await;
        let value = self
            .graph
            .post_form(
                &format!("{}/media_publish", ig_user_id),
                vec![("creation_id".to_string(), container_id.to_string())],
                snapshot.expose(),
            )
            .await?;
        Ok(value
            .get("id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| container_id.to_string()))
    }
}

/// Map a container `status_code` to a poll status
pub fn classify_status(value: &serde_json::Value) -> PollStatus {
    match value.get("status_code").and_then(|s| s.as_str()) {
        Some("FINISHED") | Some("PUBLISHED") => PollStatus::Ready,
        Some(status @ ("ERROR" | "FAILED")) => PollStatus::Failed(status.to_string()),
        Some(other) => PollStatus::Pending(other.to_string()),
        None => PollStatus::Pending("unknown".to_string()),
    }
}

#[async_trait]
impl Platform for InstagramPlatform {
    fn name(&self) -> &str {
        "instagram"
    }

    fn caption_limit(&self) -> Option<usize> {
        Some(INSTAGRAM_CAPTION_LIMIT)
    }

    fn is_configured(&self) -> bool {
        self.ig_user_id.is_some() && self.token.is_some()
    }

    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        let (ig_user_id, token) = match (&self.ig_user_id, &self.token) {
            (Some(id), Some(token)) => (id.as_str(), token.as_ref()),
            _ => {
                return Err(PlatformError::Configuration(
                    "Instagram needs IG_USER_ID and a page token".to_string(),
                )
                .into())
            }
        };
        let media_url = request.media_url.as_deref().ok_or_else(|| {
            PlatformError::Validation("Instagram posts require an image or video".to_string())
        })?;

        let container_id = self
            .create_container(ig_user_id, token, request, media_url)
            .await?;
        info!("Instagram: created container {}", container_id);

        if request.is_video() && !self.poll_video {
            warn!(
                "Instagram: publishing reel container {} without waiting for processing",
                container_id
            );
        } else {
            self.wait_until_ready(&container_id, token).await?;
        }

        let media_id = self
            .publish_container(ig_user_id, token, &container_id)
            .await?;
        info!("Instagram: published {}", media_id);
        Ok(media_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::graph::PageTokenRefresher;
    use crate::transport::mock::MockTransport;
    use crate::transport::Method;
    use crate::types::{FailureKind, MediaKind};
    use secrecy::SecretString;
    use serde_json::json;
    use std::time::Duration;

    const CONTAINER: &str = "/17841/media ";
    const PUBLISH: &str = "/17841/media_publish";
    const STATUS: &str = "fields=status_code";

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    fn platform(mock: &MockTransport, token: &Arc<SharedToken>) -> InstagramPlatform {
        let graph = GraphClient::new(
            Arc::new(mock.clone()),
            "https://graph.test/v21.0",
            Some(secret("app-secret")),
        );
        let refresher = PageTokenRefresher::new(graph.clone(), secret("user-token"), "123");
        InstagramPlatform::new(graph, Some("17841".to_string()), Some(Arc::clone(token)))
            .with_refresher(Arc::new(refresher))
            .with_poll_policy(PollPolicy::new(10, Duration::from_millis(1)))
    }

    fn request(kind: MediaKind) -> PublishRequest {
        PublishRequest {
            source_key: "post/a.jpg".to_string(),
            caption: "Caption".to_string(),
            media_url: Some("https://m/media/post/a.jpg".to_string()),
            media_kind: Some(kind),
            file_name: Some("a.jpg".to_string()),
        }
    }

    fn token() -> Arc<SharedToken> {
        Arc::new(SharedToken::new(secret("page-token")))
    }

    #[tokio::test]
    async fn test_image_container_poll_publish() {
        let mock = MockTransport::new();
        mock.respond_json(Method::Post, CONTAINER, 200, json!({"id": "c-1"}));
        mock.respond_json(Method::Get, STATUS, 200, json!({"status_code": "IN_PROGRESS", "id": "c-1"}))
            .respond_json(Method::Get, STATUS, 200, json!({"status_code": "FINISHED", "id": "c-1"}));
        mock.respond_json(Method::Post, PUBLISH, 200, json!({"id": "media-9"}));

        let id = platform(&mock, &token())
            .publish(&request(MediaKind::Image))
            .await
            .unwrap();
        assert_eq!(id, "media-9");

        let create = &mock.requests_matching(CONTAINER)[0];
        assert_eq!(create.param("image_url"), Some("https://m/media/post/a.jpg"));
        assert_eq!(create.param("caption"), Some("Caption"));
        assert_eq!(create.param("media_type"), None);

        assert_eq!(mock.count(STATUS), 2);
        let publish = &mock.requests_matching(PUBLISH)[0];
        assert_eq!(publish.param("creation_id"), Some("c-1"));
    }

    #[tokio::test]
    async fn test_never_ready_times_out_without_publishing() {
        let mock = MockTransport::new();
        mock.respond_json(Method::Post, CONTAINER, 200, json!({"id": "c-1"}));
        mock.respond_json(Method::Get, STATUS, 200, json!({"status_code": "IN_PROGRESS"}));
        mock.respond_json(Method::Post, PUBLISH, 200, json!({"id": "never"}));

        let err = platform(&mock, &token())
            .publish(&request(MediaKind::Image))
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Timeout);
        assert_eq!(mock.count(STATUS), 10);
        assert_eq!(mock.count(PUBLISH), 0);
    }

    #[tokio::test]
    async fn test_error_status_is_processing_failure() {
        let mock = MockTransport::new();
        mock.respond_json(Method::Post, CONTAINER, 200, json!({"id": "c-1"}));
        mock.respond_json(Method::Get, STATUS, 200, json!({"status_code": "ERROR"}));

        let err = platform(&mock, &token())
            .publish(&request(MediaKind::Image))
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Processing);
        assert_eq!(mock.count(STATUS), 1);
        assert_eq!(mock.count(PUBLISH), 0);
    }

    #[tokio::test]
    async fn test_poll_request_failures_keep_polling() {
        let mock = MockTransport::new();
        mock.respond_json(Method::Post, CONTAINER, 200, json!({"id": "c-1"}));
        mock.respond_json(Method::Get, STATUS, 500, json!({"error": {"message": "oops", "code": 2}}))
            .respond_json(Method::Get, STATUS, 200, json!({"status_code": "PUBLISHED"}));
        mock.respond_json(Method::Post, PUBLISH, 200, json!({"id": "media-9"}));

        let id = platform(&mock, &token())
            .publish(&request(MediaKind::Image))
            .await
            .unwrap();
        assert_eq!(id, "media-9");
        assert_eq!(mock.count(STATUS), 2);
    }

    #[tokio::test]
    async fn test_reel_skips_polling_by_default() {
        let mock = MockTransport::new();
        mock.respond_json(Method::Post, CONTAINER, 200, json!({"id": "c-2"}));
        mock.respond_json(Method::Post, PUBLISH, 200, json!({"id": "reel-1"}));

        let id = platform(&mock, &token())
            .publish(&request(MediaKind::Video))
            .await
            .unwrap();
        assert_eq!(id, "reel-1");

        let create = &mock.requests_matching(CONTAINER)[0];
        assert_eq!(create.param("video_url"), Some("https://m/media/post/a.jpg"));
        assert_eq!(create.param("media_type"), Some("REELS"));
        assert_eq!(create.param("share_to_feed"), Some("true"));
        assert_eq!(mock.count(STATUS), 0);
    }

    #[tokio::test]
    async fn test_reel_polling_when_enabled() {
        let mock = MockTransport::new();
        mock.respond_json(Method::Post, CONTAINER, 200, json!({"id": "c-2"}));
        mock.respond_json(Method::Get, STATUS, 200, json!({"status_code": "FINISHED"}));
        mock.respond_json(Method::Post, PUBLISH, 200, json!({"id": "reel-1"}));

        platform(&mock, &token())
            .with_video_polling(true)
            .publish(&request(MediaKind::Video))
            .await
            .unwrap();
        assert_eq!(mock.count(STATUS), 1);
    }

    #[tokio::test]
    async fn test_container_without_id_is_terminal() {
        let mock = MockTransport::new();
        mock.respond_json(Method::Post, CONTAINER, 200, json!({"success": true}));

        let err = platform(&mock, &token())
            .publish(&request(MediaKind::Image))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no id"));
        assert_eq!(mock.count(STATUS), 0);
        assert_eq!(mock.count(PUBLISH), 0);
    }

    #[tokio::test]
    async fn test_container_auth_expiry_refreshes_once() {
        let mock = MockTransport::new();
        mock.respond_json(
            Method::Post,
            CONTAINER,
            400,
            json!({"error": {"message": "Session has expired", "code": 190}}),
        )
        .respond_json(Method::Post, CONTAINER, 200, json!({"id": "c-1"}));
        mock.respond_json(
            Method::Get,
            "/me/accounts",
            200,
            json!({"data": [{"id": "123", "access_token": "fresh"}]}),
        );
        mock.respond_json(Method::Get, STATUS, 200, json!({"status_code": "FINISHED"}));
        mock.respond_json(Method::Post, PUBLISH, 200, json!({"id": "media-9"}));

        let shared = Arc::new(SharedToken::new(secret("stale")));
        platform(&mock, &shared)
            .publish(&request(MediaKind::Image))
            .await
            .unwrap();

        assert_eq!(mock.count("/me/accounts"), 1);
        assert_eq!(mock.count(CONTAINER), 2);
        // later steps use the refreshed token
        let publish = &mock.requests_matching(PUBLISH)[0];
        assert_eq!(publish.param("access_token"), Some("fresh"));
    }

    #[tokio::test]
    async fn test_cancel_stops_polling() {
        let mock = MockTransport::new();
        mock.respond_json(Method::Post, CONTAINER, 200, json!({"id": "c-1"}));
        mock.respond_json(Method::Get, STATUS, 200, json!({"status_code": "IN_PROGRESS"}));

        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = platform(&mock, &token())
            .with_cancel_flag(cancel)
            .publish(&request(MediaKind::Image))
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Cancelled);
        assert_eq!(mock.count(STATUS), 0);
        assert_eq!(mock.count(PUBLISH), 0);
    }

    #[tokio::test]
    async fn test_text_only_request_is_invalid() {
        let mock = MockTransport::new();
        let err = platform(&mock, &token())
            .publish(&PublishRequest::text("hi"))
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Invalid);
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(&json!({"status_code": "FINISHED"})), PollStatus::Ready);
        assert_eq!(classify_status(&json!({"status_code": "PUBLISHED"})), PollStatus::Ready);
        assert_eq!(
            classify_status(&json!({"status_code": "FAILED"})),
            PollStatus::Failed("FAILED".to_string())
        );
        assert_eq!(
            classify_status(&json!({"status_code": "IN_PROGRESS"})),
            PollStatus::Pending("IN_PROGRESS".to_string())
        );
        assert!(matches!(classify_status(&json!({})), PollStatus::Pending(_)));
    }
}
