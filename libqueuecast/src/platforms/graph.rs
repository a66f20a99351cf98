//! Shared plumbing for the Graph-style platform family (Facebook, Instagram)
//!
//! Every Graph call carries the token as `access_token` and, when an app
//! secret is configured, an `appsecret_proof`: HMAC-SHA256 of the token keyed
//! by the app secret, hex encoded. Failures come back as
//! `{"error": {"code": 190, "message": "..."}}`; the numeric code is what the
//! auth-retry policy keys on.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;

use crate::auth_retry::TokenRefresher;
use crate::error::{PlatformError, Result};
use crate::transport::{HttpRequest, HttpResponse, Transport};

type HmacSha256 = Hmac<Sha256>;

/// Graph error code meaning "the access token is no longer valid"
pub const TOKEN_EXPIRED_CODE: i64 = 190;

pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com/v21.0";

/// Timeout for publish calls, which may make the platform fetch media
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(90);

/// Timeout for status and account lookups
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Possession proof for `token`: hex HMAC-SHA256 keyed by `app_secret`.
///
/// Returns `None` when either input is absent or empty.
pub fn appsecret_proof(token: Option<&str>, app_secret: Option<&str>) -> Option<String> {
    let token = token.filter(|t| !t.is_empty())?;
    let secret = app_secret.filter(|s| !s.is_empty())?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(token.as_bytes());
    Some(hex::encode(mac.finalize().into_bytes()))
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<i64>,
    message: Option<String>,
}

/// Convert a non-success Graph response into an `Api` error, keeping the
/// platform error code when the body carries one
pub fn api_error(response: &HttpResponse) -> PlatformError {
    let parsed = serde_json::from_slice::<ErrorEnvelope>(&response.body)
        .ok()
        .and_then(|e| e.error);
    match parsed {
        Some(body) => PlatformError::Api {
            status: response.status,
            code: body.code,
            message: body.message.unwrap_or_else(|| response.text()),
        },
        None => PlatformError::Api {
            status: response.status,
            code: None,
            message: response.text(),
        },
    }
}

/// Thin Graph client: base URL, app secret and transport
#[derive(Clone)]
pub struct GraphClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    app_secret: Option<Arc<SecretString>>,
}

impl GraphClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        base_url: impl Into<String>,
        app_secret: Option<SecretString>,
    ) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            app_secret: app_secret.map(Arc::new),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub fn proof(&self, token: &str) -> Option<String> {
        appsecret_proof(
            Some(token),
            self.app_secret.as_deref().map(|s| s.expose_secret()),
        )
    }

    fn with_proof(&self, request: HttpRequest, token: &str) -> HttpRequest {
        match self.proof(token) {
            Some(proof) => request.query("appsecret_proof", proof),
            None => request,
        }
    }

    /// POST a form-encoded body with `access_token` appended
    pub async fn post_form(
        &self,
        path: &str,
        mut fields: Vec<(String, String)>,
        token: &str,
    ) -> Result<serde_json::Value> {
        fields.push(("access_token".to_string(), token.to_string()));
        let request = HttpRequest::post(self.url(path))
            .form(fields)
            .timeout(PUBLISH_TIMEOUT);
        let request = self.with_proof(request, token);
        self.execute(request).await
    }

    /// GET with query parameters and `access_token`
    pub async fn get(
        &self,
        path: &str,
        params: &[(&str, &str)],
        token: &str,
    ) -> Result<serde_json::Value> {
        let mut request = HttpRequest::get(self.url(path)).timeout(LOOKUP_TIMEOUT);
        for (key, value) in params {
            request = request.query(key, *value);
        }
        request = request.query("access_token", token);
        let request = self.with_proof(request, token);
        self.execute(request).await
    }

    async fn execute(&self, request: HttpRequest) -> Result<serde_json::Value> {
        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(api_error(&response).into());
        }
        response.json()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PageAccount {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageList {
    #[serde(default)]
    data: Vec<PageAccount>,
}

/// Pages the user token can manage (`/me/accounts`)
pub async fn list_pages(client: &GraphClient, user_token: &str) -> Result<Vec<PageAccount>> {
    let value = client.get("me/accounts", &[], user_token).await?;
    let pages: PageList = serde_json::from_value(value)
        .map_err(|e| PlatformError::Posting(format!("Unexpected /me/accounts body: {}", e)))?;
    Ok(pages.data)
}

/// Swap a short-lived user token for a long-lived one
pub async fn exchange_user_token(
    client: &GraphClient,
    app_id: &str,
    app_secret: &str,
    short_lived_token: &str,
) -> Result<String> {
    let request = HttpRequest::get(client.url("oauth/access_token"))
        .query("grant_type", "fb_exchange_token")
        .query("client_id", app_id)
        .query("client_secret", app_secret)
        .query("fb_exchange_token", short_lived_token)
        .timeout(LOOKUP_TIMEOUT);
    let value = client.execute(request).await?;
    value
        .get("access_token")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            PlatformError::Posting("Token exchange response has no access_token".to_string())
                .into()
        })
}

/// Instagram business account linked to a page, if any
pub async fn instagram_account_for_page(
    client: &GraphClient,
    page_id: &str,
    page_token: &str,
) -> Result<Option<String>> {
    let value = client
        .get(page_id, &[("fields", "instagram_business_account")], page_token)
        .await?;
    Ok(value
        .get("instagram_business_account")
        .and_then(|a| a.get("id"))
        .and_then(|id| id.as_str())
        .map(str::to_string))
}

/// Refreshes a page token by looking it up with the long-lived user token
pub struct PageTokenRefresher {
    client: GraphClient,
    user_token: SecretString,
    page_id: String,
}

impl PageTokenRefresher {
    pub fn new(client: GraphClient, user_token: SecretString, page_id: impl Into<String>) -> Self {
        Self {
            client,
            user_token,
            page_id: page_id.into(),
        }
    }
}

#[async_trait]
impl TokenRefresher for PageTokenRefresher {
    async fn refresh(&self) -> Result<SecretString> {
        let pages = list_pages(&self.client, self.user_token.expose_secret())
            .await
            .map_err(|e| {
                PlatformError::Authentication(format!("Page token refresh failed: {}", e))
            })?;

        let token = pages
            .into_iter()
            .find(|p| p.id == self.page_id)
            .and_then(|p| p.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                PlatformError::Authentication(format!(
                    "No page token for page {} in /me/accounts",
                    self.page_id
                ))
            })?;

        tracing::info!("Refreshed page token for page {}", self.page_id);
        Ok(SecretString::from(token))
    }
}
