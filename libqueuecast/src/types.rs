//! Core types for Queuecast

use serde::{Deserialize, Serialize};

/// Caption used when a queued item has no companion text file
pub const DEFAULT_CAPTION: &str = "New post";

/// File extensions the queue recognizes as publishable media
pub const MEDIA_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "mp4"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Detect the media kind from a file name or key, `None` when the
    /// extension is not a recognized media type
    pub fn from_name(name: &str) -> Option<Self> {
        let ext = extension(name)?;
        match ext.as_str() {
            "jpg" | "jpeg" | "png" => Some(Self::Image),
            "mp4" => Some(Self::Video),
            _ => None,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// MIME type for a media file name, used by upload protocols that declare it
pub fn mime_type_for(name: &str) -> &'static str {
    match extension(name).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

fn extension(name: &str) -> Option<String> {
    let file = name.rsplit('/').next().unwrap_or(name);
    let (stem, ext) = file.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Posted,
}

/// A media file taken from the pending location of the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuedItem {
    /// Storage key, e.g. `post/a.jpg`
    pub key: String,
    pub media_kind: MediaKind,
    pub caption: String,
    pub state: ItemState,
}

impl QueuedItem {
    /// Key of the optional caption companion (`post/a.jpg` -> `post/a.txt`)
    pub fn caption_key(&self) -> String {
        caption_key_for(&self.key)
    }

    /// Last path segment of the key
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

pub fn caption_key_for(key: &str) -> String {
    let file_start = key.rfind('/').map(|i| i + 1).unwrap_or(0);
    match key[file_start..].rfind('.') {
        Some(dot) if dot > 0 => format!("{}.txt", &key[..file_start + dot]),
        _ => format!("{}.txt", key),
    }
}

/// Everything an adapter needs for one pass, shared read-only by all adapters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    /// Queue key the request was built from
    pub source_key: String,
    /// Full caption; each adapter clips it to its own limit
    pub caption: String,
    /// Public URL the platforms fetch the media from
    pub media_url: Option<String>,
    pub media_kind: Option<MediaKind>,
    pub file_name: Option<String>,
}

impl PublishRequest {
    pub fn for_item(item: &QueuedItem, media_url: String) -> Self {
        Self {
            source_key: item.key.clone(),
            caption: item.caption.clone(),
            media_url: Some(media_url),
            media_kind: Some(item.media_kind),
            file_name: Some(item.file_name().to_string()),
        }
    }

    /// Text-only request
    pub fn text(caption: impl Into<String>) -> Self {
        Self {
            source_key: String::new(),
            caption: caption.into(),
            media_url: None,
            media_kind: None,
            file_name: None,
        }
    }

    pub fn is_video(&self) -> bool {
        self.media_kind.map(|k| k.is_video()).unwrap_or(false)
    }

    /// Caption clipped to `limit` characters
    pub fn caption_within(&self, limit: usize) -> String {
        truncate_caption(&self.caption, limit)
    }
}

/// Clip `caption` to at most `limit` characters (not bytes)
pub fn truncate_caption(caption: &str, limit: usize) -> String {
    match caption.char_indices().nth(limit) {
        Some((byte_idx, _)) => caption[..byte_idx].to_string(),
        None => caption.to_string(),
    }
}

/// Why a platform did not acknowledge the publish
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Missing credential or identifier
    Configuration,
    /// Non-2xx response or network failure outside the auth-expiry case
    Transient,
    /// The access token was rejected and could not be recovered
    AuthExpired,
    /// The platform reported that its asynchronous job failed
    Processing,
    /// The poll budget ran out
    Timeout,
    /// The platform would reject the content as submitted
    Invalid,
    /// Shutdown was requested while waiting
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::Transient => "transient",
            Self::AuthExpired => "auth_expired",
            Self::Processing => "processing",
            Self::Timeout => "timeout",
            Self::Invalid => "invalid",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Result of publishing to a single platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PublishResult {
    /// Platform name (e.g., "facebook", "instagram")
    pub platform: String,
    pub success: bool,
    /// Platform-native post or media identifier (if successful)
    pub platform_post_id: Option<String>,
    pub failure: Option<FailureKind>,
    /// Error message (if failed)
    pub error: Option<String>,
}

impl PublishResult {
    pub fn success(platform: &str, platform_post_id: String) -> Self {
        Self {
            platform: platform.to_string(),
            success: true,
            platform_post_id: Some(platform_post_id),
            failure: None,
            error: None,
        }
    }

    pub fn failure(platform: &str, kind: FailureKind, error: String) -> Self {
        Self {
            platform: platform.to_string(),
            success: false,
            platform_post_id: None,
            failure: Some(kind),
            error: Some(error),
        }
    }
}
