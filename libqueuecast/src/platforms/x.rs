//! X (Twitter) publishing: media upload followed by post creation
//!
//! The media bytes are fetched from the public URL and uploaded through the
//! v1.1 media endpoint. Files up to [`SIMPLE_UPLOAD_LIMIT`] go up in one
//! multipart request; larger videos use the chunked `INIT` / `APPEND` /
//! `FINALIZE` sequence and, when the platform reports asynchronous
//! processing, `STATUS` is polled until it settles. The post itself is
//! created through the v2 API. Every call is OAuth 1.0a signed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::credentials::XCredentials;
use crate::error::{PlatformError, Result};
use crate::platforms::oauth1::OAuth1Signer;
use crate::platforms::Platform;
use crate::poll::{poll_until_after, CancelFlag, PollPolicy, PollStatus};
use crate::transport::{HttpRequest, HttpResponse, Part, Transport};
use crate::types::{mime_type_for, PublishRequest};

pub const X_CAPTION_LIMIT: usize = 280;

/// Largest file sent as a single upload request (5 MiB)
pub const SIMPLE_UPLOAD_LIMIT: usize = 5 * 1024 * 1024;

/// Size of each `APPEND` segment (5 MiB)
pub const CHUNK_SIZE: usize = 5 * 1024 * 1024;

pub const DEFAULT_UPLOAD_URL: &str = "https://upload.twitter.com/1.1/media/upload.json";
pub const DEFAULT_API_BASE_URL: &str = "https://api.twitter.com";

const MEDIA_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct UploadResponse {
    media_id_string: String,
    #[serde(default)]
    processing_info: Option<ProcessingInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct ProcessingInfo {
    state: String,
    #[serde(default)]
    check_after_secs: Option<u64>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl ProcessingInfo {
    fn status(&self) -> PollStatus {
        match self.state.as_str() {
            "succeeded" => PollStatus::Ready,
            "failed" => PollStatus::Failed(
                self.error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "failed".to_string()),
            ),
            other => match self.check_after_secs {
                Some(secs) => PollStatus::Retry {
                    status: other.to_string(),
                    after: Duration::from_secs(secs),
                },
                None => PollStatus::Pending(other.to_string()),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    processing_info: Option<ProcessingInfo>,
}

pub struct XPlatform {
    transport: Arc<dyn Transport>,
    signer: Option<OAuth1Signer>,
    upload_url: String,
    api_base_url: String,
    poll: PollPolicy,
    cancel: CancelFlag,
}

impl XPlatform {
    pub fn new(transport: Arc<dyn Transport>, credentials: Option<XCredentials>) -> Self {
        Self {
            transport,
            signer: credentials.map(OAuth1Signer::new),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            poll: PollPolicy::default(),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_endpoints(mut self, upload_url: impl Into<String>, api_base_url: impl Into<String>) -> Self {
        self.upload_url = upload_url.into();
        self.api_base_url = api_base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    async fn send_signed(&self, signer: &OAuth1Signer, request: HttpRequest) -> Result<HttpResponse> {
        let response = self.transport.send(signer.sign(request)?).await?;
        if !response.is_success() {
            return Err(x_api_error(&response).into());
        }
        Ok(response)
    }

    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .transport
            .send(HttpRequest::get(url).timeout(MEDIA_FETCH_TIMEOUT))
            .await?;
        if !response.is_success() {
            return Err(PlatformError::Network(format!(
                "Fetching media from {} returned HTTP {}",
                url, response.status
            ))
            .into());
        }
        Ok(response.body)
    }

    async fn upload(&self, signer: &OAuth1Signer, request: &PublishRequest, bytes: Vec<u8>) -> Result<String> {
        let file_name = request.file_name.as_deref().unwrap_or("media");
        let mime = mime_type_for(file_name);

        if bytes.len() <= SIMPLE_UPLOAD_LIMIT {
            debug!("X: simple upload of {} bytes", bytes.len());
            let response = self
                .send_signed(
                    signer,
                    HttpRequest::post(&self.upload_url)
                        .multipart(vec![Part::bytes("media", bytes, file_name, mime)]),
                )
                .await?;
            let uploaded: UploadResponse = response.json()?;
            return Ok(uploaded.media_id_string);
        }

        if !request.is_video() {
            return Err(PlatformError::Validation(format!(
                "Image is {} bytes; X accepts at most {} bytes for images",
                bytes.len(),
                SIMPLE_UPLOAD_LIMIT
            ))
            .into());
        }

        self.chunked_upload(signer, bytes, file_name, mime).await
    }

    async fn chunked_upload(
        &self,
        signer: &OAuth1Signer,
        bytes: Vec<u8>,
        file_name: &str,
        mime: &str,
    ) -> Result<String> {
        let form = |fields: &[(&str, String)]| {
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<Vec<_>>()
        };

        let init: UploadResponse = self
            .send_signed(
                signer,
                HttpRequest::post(&self.upload_url).form(form(&[
                    ("command", "INIT".to_string()),
                    ("total_bytes", bytes.len().to_string()),
                    ("media_type", mime.to_string()),
                    ("media_category", "tweet_video".to_string()),
                ])),
            )
            .await?
            .json()?;
        let media_id = init.media_id_string;
        info!("X: chunked upload {} started ({} bytes)", media_id, bytes.len());

        for (index, chunk) in bytes.chunks(CHUNK_SIZE).enumerate() {
            debug!("X: APPEND segment {} ({} bytes)", index, chunk.len());
            self.send_signed(
                signer,
                HttpRequest::post(&self.upload_url).multipart(vec![
                    Part::text("command", "APPEND"),
                    Part::text("media_id", media_id.clone()),
                    Part::text("segment_index", index.to_string()),
                    Part::bytes("media", chunk.to_vec(), file_name, mime),
                ]),
            )
            .await?;
        }

        let finalize: UploadResponse = self
            .send_signed(
                signer,
                HttpRequest::post(&self.upload_url).form(form(&[
                    ("command", "FINALIZE".to_string()),
                    ("media_id", media_id.clone()),
                ])),
            )
            .await?
            .json()?;

        match finalize.processing_info.map(|p| p.status()) {
            None | Some(PollStatus::Ready) => {}
            Some(PollStatus::Failed(detail)) => {
                return Err(PlatformError::Processing(format!(
                    "X media {} failed: {}",
                    media_id, detail
                ))
                .into())
            }
            Some(PollStatus::Pending(_)) => {
                self.wait_for_processing(signer, &media_id, self.poll.interval).await?
            }
            Some(PollStatus::Retry { after, .. }) => {
                self.wait_for_processing(signer, &media_id, after).await?
            }
        }

        Ok(media_id)
    }

    async fn processing_status(&self, signer: &OAuth1Signer, media_id: &str) -> Result<PollStatus> {
        let status: StatusResponse = self
            .send_signed(
                signer,
                HttpRequest::get(&self.upload_url)
                    .query("command", "STATUS")
                    .query("media_id", media_id),
            )
            .await?
            .json()?;
        Ok(status
            .processing_info
            .map(|p| p.status())
            .unwrap_or(PollStatus::Ready))
    }

    async fn wait_for_processing(
        &self,
        signer: &OAuth1Signer,
        media_id: &str,
        first_delay: Duration,
    ) -> Result<()> {
        let what = format!("X media {}", media_id);
        poll_until_after(&what, self.poll, first_delay, &self.cancel, |_| {
            self.processing_status(signer, media_id)
        })
        .await
        .into_result(&what)
    }

    async fn create_post(&self, signer: &OAuth1Signer, text: String, media_id: Option<String>) -> Result<String> {
        let mut body = json!({ "text": text });
        if let Some(id) = media_id {
            body["media"] = json!({ "media_ids": [id] });
        }
        let response = self
            .send_signed(
                signer,
                HttpRequest::post(format!("{}/2/tweets", self.api_base_url)).json(body),
            )
            .await?;
        let value: serde_json::Value = response.json()?;
        value
            .pointer("/data/id")
            .and_then(|id| id.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                PlatformError::Posting(format!("X response has no post id: {}", value)).into()
            })
    }
}

/// Error from an X API response: first entry of `errors`, else `detail`
fn x_api_error(response: &HttpResponse) -> PlatformError {
    let value: Option<serde_json::Value> = serde_json::from_slice(&response.body).ok();
    let first = value
        .as_ref()
        .and_then(|v| v.get("errors"))
        .and_then(|e| e.get(0));
    let code = first.and_then(|e| e.get("code")).and_then(|c| c.as_i64());
    let message = first
        .and_then(|e| e.get("message"))
        .or_else(|| value.as_ref().and_then(|v| v.get("detail")))
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| response.text());
    PlatformError::Api {
        status: response.status,
        code,
        message,
    }
}

#[async_trait]
impl Platform for XPlatform {
    fn name(&self) -> &str {
        "x"
    }

    fn caption_limit(&self) -> Option<usize> {
        Some(X_CAPTION_LIMIT)
    }

    fn is_configured(&self) -> bool {
        self.signer.is_some()
    }

    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            PlatformError::Configuration(
                "X needs X_API_KEY, X_API_SECRET, X_ACCESS_TOKEN and X_ACCESS_TOKEN_SECRET".to_string(),
            )
        })?;

        let media_id = match &request.media_url {
            Some(url) => {
                let bytes = self.fetch_media(url).await?;
                let id = self.upload(signer, request, bytes).await?;
                info!("X: uploaded media {}", id);
                Some(id)
            }
            None => None,
        };

        let id = self
            .create_post(signer, request.caption_within(X_CAPTION_LIMIT), media_id)
            .await?;
        info!("X: published {}", id);
        Ok(id)
    }
}
