//! LinkedIn publishing through a webhook relay
//!
//! Queuecast does not talk to LinkedIn directly. It hands the post to an
//! automation webhook as JSON and reports whatever the relay answers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::error::{PlatformError, Result};
use crate::platforms::Platform;
use crate::transport::{HttpRequest, Transport};
use crate::types::PublishRequest;

const RELAY_TIMEOUT: Duration = Duration::from_secs(120);

/// Payload accepted by the relay
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RelayPayload {
    pub message: String,
    pub media_url: Option<String>,
    pub media_type: String,
    pub filename: String,
}

impl RelayPayload {
    pub fn from_request(request: &PublishRequest) -> Self {
        Self {
            message: request.caption.clone(),
            media_url: request.media_url.clone(),
            media_type: if request.is_video() { "video" } else { "image" }.to_string(),
            filename: request
                .media_url
                .as_deref()
                .map(filename_from_url)
                .unwrap_or_default(),
        }
    }
}

/// Last path segment of `url`, ignoring any query string
pub fn filename_from_url(url: &str) -> String {
    let path = url.split('?').next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path).to_string()
}

pub struct LinkedInRelay {
    transport: Arc<dyn Transport>,
    webhook_url: Option<String>,
}

impl LinkedInRelay {
    pub fn new(transport: Arc<dyn Transport>, webhook_url: Option<String>) -> Self {
        Self {
            transport,
            webhook_url: webhook_url.filter(|u| !u.is_empty()),
        }
    }
}

#[async_trait]
impl Platform for LinkedInRelay {
    fn name(&self) -> &str {
        "linkedin"
    }

    fn caption_limit(&self) -> Option<usize> {
        None
    }

    fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }

    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        let url = self
            .webhook_url
            .as_deref()
            .ok_or_else(|| PlatformError::Configuration("MAKE_WEBHOOK_URL is not set".to_string()))?;

        let payload = RelayPayload::from_request(request);
        let body = serde_json::to_value(&payload)
            .map_err(|e| PlatformError::Posting(format!("Failed to encode relay payload: {}", e)))?;

        let response = self
            .transport
            .send(HttpRequest::post(url).json(body).timeout(RELAY_TIMEOUT))
            .await?;

        info!("LinkedIn relay answered HTTP {}", response.status);
        if !response.is_success() {
            return Err(PlatformError::Api {
                status: response.status,
                code: None,
                message: response.text(),
            }
            .into());
        }
        Ok(response.text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use crate::transport::{Body, HttpResponse, Method};
    use crate::types::{FailureKind, MediaKind};
    use serde_json::json;

    const HOOK: &str = "https://hook.test/abc";

    fn relay(mock: &MockTransport) -> LinkedInRelay {
        LinkedInRelay::new(Arc::new(mock.clone()), Some(HOOK.to_string()))
    }

    fn request(url: &str, kind: MediaKind) -> PublishRequest {
        PublishRequest {
            source_key: "post/clip.mp4".to_string(),
            caption: "Caption".to_string(),
            media_url: Some(url.to_string()),
            media_kind: Some(kind),
            file_name: Some("clip.mp4".to_string()),
        }
    }

    #[test]
    fn test_filename_strips_query() {
        assert_eq!(filename_from_url("https://m/media/post/clip.mp4?sig=1"), "clip.mp4");
        assert_eq!(filename_from_url("https://m/media/post/a.jpg"), "a.jpg");
        assert_eq!(filename_from_url("a.jpg"), "a.jpg");
    }

    #[tokio::test]
    async fn test_relay_payload_and_verbatim_response() {
        let mock = MockTransport::new();
        mock.respond(Method::Post, "hook.test", HttpResponse::new(200, "Accepted"));

        let result = relay(&mock)
            .publish(&request("https://m/media/post/clip.mp4?v=2", MediaKind::Video))
            .await
            .unwrap();
        assert_eq!(result, "Accepted");

        match &mock.requests()[0].body {
            Body::Json(value) => assert_eq!(
                value,
                &json!({
                    "message": "Caption",
                    "media_url": "https://m/media/post/clip.mp4?v=2",
                    "media_type": "video",
                    "filename": "clip.mp4"
                })
            ),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_text_only_payload() {
        let mock = MockTransport::new();
        mock.respond(Method::Post, "hook.test", HttpResponse::new(200, "ok"));

        relay(&mock).publish(&PublishRequest::text("hello")).await.unwrap();
        match &mock.requests()[0].body {
            Body::Json(value) => {
                assert_eq!(value["media_url"], serde_json::Value::Null);
                assert_eq!(value["media_type"], "image");
                assert_eq!(value["filename"], "");
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_success_status_fails() {
        let mock = MockTransport::new();
        mock.respond(Method::Post, "hook.test", HttpResponse::new(410, "There is no scenario listening"));

        let err = relay(&mock)
            .publish(&request("https://m/a.jpg", MediaKind::Image))
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Transient);
        assert!(err.to_string().contains("HTTP 410"));
    }

    #[tokio::test]
    async fn test_missing_webhook_is_configuration_error() {
        let mock = MockTransport::new();
        let relay = LinkedInRelay::new(Arc::new(mock.clone()), Some(String::new()));
        assert!(!relay.is_configured());
        let err = relay
            .publish(&PublishRequest::text("x"))
            .await
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Configuration);
        assert!(mock.requests().is_empty());
    }
}
