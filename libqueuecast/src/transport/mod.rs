//! HTTP transport used by every platform adapter
//!
//! Adapters describe each exchange as an [`HttpRequest`] and hand it to a
//! [`Transport`]. Production code uses [`ReqwestTransport`]; tests script
//! responses with [`mock::MockTransport`].

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{PlatformError, Result};

// Mock transport is available for all builds (not just tests) to support integration tests
pub mod mock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Empty,
    Form(Vec<(String, String)>),
    Json(serde_json::Value),
    Multipart(Vec<Part>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    pub content: PartContent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartContent {
    Text(String),
    Bytes {
        data: Vec<u8>,
        file_name: String,
        mime: String,
    },
}

impl Part {
    pub fn text(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            content: PartContent::Text(value.into()),
        }
    }

    pub fn bytes(name: &str, data: Vec<u8>, file_name: &str, mime: &str) -> Self {
        Self {
            name: name.to_string(),
            content: PartContent::Bytes {
                data,
                file_name: file_name.to_string(),
                mime: mime.to_string(),
            },
        }
    }
}

/// One outbound HTTP exchange
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: Body::Empty,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.push((key.to_string(), value.into()));
        self
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Body::Form(fields);
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    pub fn multipart(mut self, parts: Vec<Part>) -> Self {
        self.body = Body::Multipart(parts);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Value of a query parameter or form/multipart text field
    pub fn param(&self, name: &str) -> Option<&str> {
        let from_query = self
            .query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str());
        if from_query.is_some() {
            return from_query;
        }
        match &self.body {
            Body::Form(fields) => fields
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            Body::Multipart(parts) => parts.iter().find_map(|p| match &p.content {
                PartContent::Text(v) if p.name == name => Some(v.as_str()),
                _ => None,
            }),
            _ => None,
        }
    }

    /// One-line description used for logging and mock routing:
    /// method, URL, then every query and text body field as `k=v`.
    /// Values of `access_token` and `appsecret_proof` are masked.
    pub fn describe(&self) -> String {
        let mut line = format!("{} {}", self.method, self.url);
        let mut push = |k: &str, v: &str| {
            let shown = match k {
                "access_token" | "appsecret_proof" | "fb_exchange_token" | "client_secret" => {
                    "*****"
                }
                _ => v,
            };
            line.push(' ');
            line.push_str(k);
            line.push('=');
            line.push_str(shown);
        };
        for (k, v) in &self.query {
            push(k, v);
        }
        match &self.body {
            Body::Form(fields) => {
                for (k, v) in fields {
                    push(k, v);
                }
            }
            Body::Multipart(parts) => {
                for part in parts {
                    if let PartContent::Text(v) = &part.content {
                        push(&part.name, v);
                    }
                }
            }
            Body::Json(_) | Body::Empty => {}
        }
        line
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json_value(status: u16, value: serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            PlatformError::Posting(format!(
                "Unexpected response body ({}): {}",
                e,
                self.text()
            ))
            .into()
        })
    }
}

/// Sends HTTP requests on behalf of the platform adapters
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request and return the response whatever its status.
    ///
    /// # Errors
    ///
    /// Returns `PlatformError::Network` only when no response was received.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`Transport`] backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(default_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(default_timeout)
            .build()
            .map_err(|e| PlatformError::Network(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        tracing::debug!("HTTP {}", request.describe());

        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        builder = match request.body {
            Body::Empty => builder,
            Body::Form(fields) => builder.form(&fields),
            Body::Json(value) => builder.json(&value),
            Body::Multipart(parts) => {
                let mut form = reqwest::multipart::Form::new();
                for part in parts {
                    form = match part.content {
                        PartContent::Text(value) => form.text(part.name, value),
                        PartContent::Bytes {
                            data,
                            file_name,
                            mime,
                        } => {
                            let file_part = reqwest::multipart::Part::bytes(data)
                                .file_name(file_name)
                                .mime_str(&mime)
                                .map_err(|e| {
                                    PlatformError::Posting(format!("Invalid MIME type {}: {}", mime, e))
                                })?;
                            form.part(part.name, file_part)
                        }
                    };
                }
                builder.multipart(form)
            }
        };

        let response = builder
            .send()
            .await
            .map_err(|e| PlatformError::Network(format!("{} {}: {}", request.method, request.url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| PlatformError::Network(format!("Failed to read response body: {}", e)))?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_masks_tokens() {
        let request = HttpRequest::post("https://graph.example.com/v21.0/123/photos")
            .query("appsecret_proof", "deadbeef")
            .form(vec![
                ("caption".to_string(), "hi".to_string()),
                ("access_token".to_string(), "secret-token".to_string()),
            ]);
        let line = request.describe();
        assert!(line.starts_with("POST https://graph.example.com/v21.0/123/photos"));
        assert!(line.contains("caption=hi"));
        assert!(!line.contains("secret-token"));
        assert!(!line.contains("deadbeef"));
    }

    #[test]
    fn test_param_looks_in_query_then_body() {
        let request = HttpRequest::post("https://upload.example.com/media/upload.json")
            .query("command", "STATUS")
            .multipart(vec![Part::text("media_id", "42")]);
        assert_eq!(request.param("command"), Some("STATUS"));
        assert_eq!(request.param("media_id"), Some("42"));
        assert_eq!(request.param("missing"), None);
    }

    #[test]
    fn test_response_json_error_is_posting_error() {
        let response = HttpResponse::new(200, "not json");
        let parsed: Result<serde_json::Value> = response.json();
        let err = parsed.unwrap_err();
        assert!(err.to_string().contains("Unexpected response body"));
    }

    #[test]
    fn test_response_success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(400, "").is_success());
        assert!(!HttpResponse::new(500, "").is_success());
    }
}
