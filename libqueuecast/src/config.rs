//! Configuration management for Queuecast
//!
//! Non-secret settings come from a TOML file and can be overridden by
//! environment variables. Secrets never live here; see
//! [`crate::credentials`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::platforms::graph::DEFAULT_GRAPH_BASE_URL;
use crate::platforms::x::{DEFAULT_API_BASE_URL, DEFAULT_UPLOAD_URL};
use crate::poll::PollPolicy;
use crate::types::DEFAULT_CAPTION;

/// Every platform Queuecast can publish to, in publish order
pub const KNOWN_PLATFORMS: [&str; 4] = ["facebook", "instagram", "x", "linkedin"];

pub const CONFIG_PATH_ENV: &str = "QUEUECAST_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub queue: QueueConfig,
    pub platforms: PlatformsConfig,
    pub facebook: FacebookConfig,
    pub instagram: InstagramConfig,
    pub x: XConfig,
    pub linkedin: LinkedInConfig,
    pub polling: PollingConfig,
    pub defaults: DefaultsConfig,
}

/// Where the queue objects are stored
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Local,
    S3,
}

impl std::str::FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(QueueBackend::Local),
            "s3" => Ok(QueueBackend::S3),
            other => Err(format!("unknown queue backend '{}' (expected local or s3)", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    /// Directory holding `post/` and `posted/` (local backend)
    pub root: String,
    /// Public base URL the media service serves `/media/{key}` from
    pub media_base_url: Option<String>,
    /// Bucket holding `post/` and `posted/` (s3 backend)
    pub bucket: Option<String>,
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services
    pub endpoint: Option<String>,
    /// Lifetime of presigned media URLs when no `media_base_url` is set
    #[serde(with = "humantime_serde_str")]
    pub url_expiry: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Local,
            root: "~/.local/share/queuecast/queue".to_string(),
            media_base_url: None,
            bucket: None,
            region: None,
            endpoint: None,
            url_expiry: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlatformsConfig {
    pub enabled: Vec<String>,
}

impl Default for PlatformsConfig {
    fn default() -> Self {
        Self {
            enabled: KNOWN_PLATFORMS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FacebookConfig {
    pub page_id: Option<String>,
    pub graph_base_url: String,
}

impl Default for FacebookConfig {
    fn default() -> Self {
        Self {
            page_id: None,
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InstagramConfig {
    pub user_id: Option<String>,
    /// Wait for reels containers to finish processing before publishing
    pub poll_video: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct XConfig {
    pub upload_url: String,
    pub api_base_url: String,
}

impl Default for XConfig {
    fn default() -> Self {
        Self {
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkedInConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingConfig {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde_str")]
    pub interval: Duration,
    /// Default timeout for HTTP requests that do not set their own
    #[serde(with = "humantime_serde_str")]
    pub http_timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        let policy = PollPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            interval: policy.interval,
            http_timeout: Duration::from_secs(90),
        }
    }
}

impl PollingConfig {
    pub fn policy(&self) -> PollPolicy {
        PollPolicy::new(self.max_attempts, self.interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DefaultsConfig {
    pub caption: String,
    pub dry_run: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            caption: DEFAULT_CAPTION.to_string(),
            dry_run: false,
        }
    }
}

/// Durations written as human strings (`"5s"`, `"1m 30s"`)
mod humantime_serde_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

impl Config {
    /// Load from the default location (or `QUEUECAST_CONFIG`), then apply
    /// environment overrides. A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = resolve_config_path()?;
        if path.exists() {
            return Self::load_explicit(&path);
        }
        tracing::debug!("No config file at {}, using defaults", path.display());
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load a file that must exist, then apply environment overrides
    pub fn load_explicit(path: &Path) -> Result<Self> {
        let mut config = Self::load_from_path(path)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific path without environment overrides
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Override settings from `QUEUECAST_PLATFORMS`, `QUEUE_BACKEND`,
    /// `QUEUE_ROOT`, `S3_BUCKET`, `S3_ENDPOINT`, `MEDIA_BASE_URL`,
    /// `FB_PAGE_ID`, `IG_USER_ID`, `MAKE_WEBHOOK_URL`, `DEFAULT_CAPTION` and
    /// `QUEUECAST_DRY_RUN`
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(list) = env_value("QUEUECAST_PLATFORMS") {
            self.platforms.enabled = list
                .split(',')
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect();
        }
        if let Some(backend) = env_value("QUEUE_BACKEND") {
            self.queue.backend = backend.parse().map_err(|message| ConfigError::InvalidValue {
                field: "QUEUE_BACKEND".to_string(),
                message,
            })?;
        }
        if let Some(root) = env_value("QUEUE_ROOT") {
            self.queue.root = root;
        }
        if let Some(bucket) = env_value("S3_BUCKET") {
            self.queue.bucket = Some(bucket);
        }
        if let Some(endpoint) = env_value("S3_ENDPOINT") {
            self.queue.endpoint = Some(endpoint);
        }
        if let Some(url) = env_value("MEDIA_BASE_URL") {
            self.queue.media_base_url = Some(url);
        }
        if let Some(id) = env_value("FB_PAGE_ID") {
            self.facebook.page_id = Some(id);
        }
        if let Some(id) = env_value("IG_USER_ID") {
            self.instagram.user_id = Some(id);
        }
        if let Some(url) = env_value("MAKE_WEBHOOK_URL") {
            self.linkedin.webhook_url = Some(url);
        }
        if let Some(caption) = env_value("DEFAULT_CAPTION") {
            self.defaults.caption = caption;
        }
        if let Some(flag) = env_value("QUEUECAST_DRY_RUN") {
            self.defaults.dry_run = parse_bool("QUEUECAST_DRY_RUN", &flag)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        for name in &self.platforms.enabled {
            if !KNOWN_PLATFORMS.contains(&name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    field: "platforms.enabled".to_string(),
                    message: format!(
                        "unknown platform '{}' (expected one of {})",
                        name,
                        KNOWN_PLATFORMS.join(", ")
                    ),
                }
                .into());
            }
        }
        if self.polling.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "polling.max_attempts".to_string(),
                message: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Enabled platforms in publish order
    pub fn enabled_platforms(&self) -> Vec<&'static str> {
        KNOWN_PLATFORMS
            .iter()
            .copied()
            .filter(|p| self.platforms.enabled.iter().any(|e| e == p))
            .collect()
    }

    /// Queue root with `~` expanded
    pub fn queue_root(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.queue.root).to_string())
    }

    /// Media base URL, required whenever there is something to publish
    pub fn media_base_url(&self) -> Result<&str> {
        self.queue
            .media_base_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ConfigError::MissingField("queue.media_base_url (MEDIA_BASE_URL)".to_string()).into())
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_bool(field: &str, value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected true or false, got '{}'", value),
        }
        .into()),
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("queuecast").join("config.toml"))
}
