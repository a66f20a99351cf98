//! Media queue storage
//!
//! Pending items live under `post/`, published ones under `posted/`. A media
//! file may have a caption companion with the same base name and a `.txt`
//! extension. Keys are slash-separated storage keys such as `post/a.jpg`.
//!
//! Advancing an item is copy-then-delete. If the delete fails after the copy
//! succeeded the item exists in both places and the error is reported as
//! [`QueueError::PartialMove`]; nothing is rolled back.
//!
//! Two storage backends exist: a local directory ([`LocalDirQueue`]) and any
//! S3-compatible bucket ([`bucket::ObjectStoreQueue`]). [`open_queue`] picks
//! one from configuration together with the matching URL resolver.

pub mod bucket;

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::{Config, QueueBackend};
use crate::error::{ConfigError, QueueError, Result};
use crate::types::{caption_key_for, MediaKind};

pub use bucket::{ObjectStoreQueue, PresignedUrlResolver};

pub const PENDING_PREFIX: &str = "post/";
pub const POSTED_PREFIX: &str = "posted/";

/// Storage holding the pending and posted items
#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Every key under the pending prefix (media and captions alike)
    async fn list_pending(&self) -> Result<Vec<String>>;

    /// Trimmed content of a caption object; `None` when it is missing or blank
    async fn read_caption(&self, key: &str) -> Result<Option<String>>;

    /// Move `key` and its caption companion (if present) from pending to
    /// posted, returning the new media key
    async fn advance_to_posted(&self, key: &str) -> Result<String>;
}

/// Maps a storage key to the public URL platforms fetch the media from
#[async_trait]
pub trait MediaUrlResolver: Send + Sync {
    async fn public_url(&self, key: &str) -> Result<String>;
}

/// Media served at `{base}/media/{key}`
#[derive(Debug, Clone)]
pub struct BaseUrlResolver {
    base_url: String,
}

impl BaseUrlResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl MediaUrlResolver for BaseUrlResolver {
    async fn public_url(&self, key: &str) -> Result<String> {
        Ok(format!("{}/media/{}", self.base_url, key))
    }
}

/// Open the configured queue backend and the resolver its media is served by.
///
/// The local backend needs `media_base_url`. A bucket uses it when set and
/// falls back to presigned URLs otherwise.
pub fn open_queue(config: &Config) -> Result<(Arc<dyn QueueSource>, Arc<dyn MediaUrlResolver>)> {
    match config.queue.backend {
        QueueBackend::Local => {
            let resolver = BaseUrlResolver::new(config.media_base_url()?);
            let queue = LocalDirQueue::new(config.queue_root());
            info!("Queue: local directory {}", queue.root().display());
            Ok((Arc::new(queue), Arc::new(resolver)))
        }
        QueueBackend::S3 => {
            let bucket = config
                .queue
                .bucket
                .as_deref()
                .filter(|b| !b.is_empty())
                .ok_or_else(|| ConfigError::MissingField("queue.bucket (S3_BUCKET)".to_string()))?;
            let store = bucket::s3_store(bucket, &config.queue)?;
            info!("Queue: bucket {}", bucket);

            let resolver: Arc<dyn MediaUrlResolver> = match config.media_base_url() {
                Ok(base) => Arc::new(BaseUrlResolver::new(base)),
                Err(_) => Arc::new(PresignedUrlResolver::new(
                    Arc::new(store.clone()),
                    config.queue.url_expiry,
                )),
            };
            Ok((Arc::new(ObjectStoreQueue::new(Arc::new(store))), resolver))
        }
    }
}

/// Lexicographically smallest pending key with a recognized media extension
pub fn select_next(keys: &[String]) -> Option<&String> {
    keys.iter()
        .filter(|k| k.starts_with(PENDING_PREFIX))
        .filter(|k| MediaKind::from_name(k).is_some())
        .min()
}

/// `post/a.jpg` -> `posted/a.jpg`
pub fn posted_key_for(key: &str) -> Result<String> {
    let name = pending_file_name(key)?;
    Ok(format!("{}{}", POSTED_PREFIX, name))
}

/// File name of a pending key, rejecting anything that is not a direct child
/// of the pending prefix
fn pending_file_name(key: &str) -> Result<&str> {
    let name = key
        .strip_prefix(PENDING_PREFIX)
        .ok_or_else(|| QueueError::InvalidKey(key.to_string()))?;
    if name.is_empty() || name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(QueueError::InvalidKey(key.to_string()).into());
    }
    Ok(name)
}

fn normalize_caption(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Queue backed by a local directory with `post/` and `posted/` children
#[derive(Debug, Clone)]
pub struct LocalDirQueue {
    root: PathBuf,
}

impl LocalDirQueue {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/').fold(self.root.clone(), |path, part| path.join(part))
    }

    async fn move_one(&self, key: &str) -> Result<String> {
        let posted_key = posted_key_for(key)?;
        let from = self.path_for(key);
        let to = self.path_for(&posted_key);

        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| QueueError::Io {
                    key: posted_key.clone(),
                    source,
                })?;
        }
        tokio::fs::copy(&from, &to)
            .await
            .map_err(|source| QueueError::Io {
                key: key.to_string(),
                source,
            })?;
        tokio::fs::remove_file(&from)
            .await
            .map_err(|e| QueueError::PartialMove {
                key: key.to_string(),
                posted_key: posted_key.clone(),
                message: e.to_string(),
            })?;

        debug!("Moved {} -> {}", key, posted_key);
        Ok(posted_key)
    }
}

#[async_trait]
impl QueueSource for LocalDirQueue {
    async fn list_pending(&self) -> Result<Vec<String>> {
        let dir = self.path_for(PENDING_PREFIX.trim_end_matches('/'));
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(QueueError::Io {
                    key: PENDING_PREFIX.to_string(),
                    source,
                }
                .into())
            }
        };

        let io_err = |source| QueueError::Io {
            key: PENDING_PREFIX.to_string(),
            source,
        };
        let mut keys = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            if !entry.file_type().await.map_err(io_err)?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                keys.push(format!("{}{}", PENDING_PREFIX, name));
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn read_caption(&self, key: &str) -> Result<Option<String>> {
        pending_file_name(key)?;
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(normalize_caption(&String::from_utf8_lossy(&bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(QueueError::Io {
                key: key.to_string(),
                source,
            }
            .into()),
        }
    }

    async fn advance_to_posted(&self, key: &str) -> Result<String> {
        let posted = self.move_one(key).await?;

        let caption_key = caption_key_for(key);
        if caption_key != key && tokio::fs::try_exists(self.path_for(&caption_key)).await.unwrap_or(false) {
            self.move_one(&caption_key).await?;
        }

        info!("Advanced {} to {}", key, posted);
        Ok(posted)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<String, Vec<u8>>,
    fail_deletes: bool,
}

/// In-memory queue for tests and embedding. Deletes can be made to fail to
/// exercise the partial-move path.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, key: &str, content: impl Into<Vec<u8>>) -> Self {
        self.insert(key, content);
        self
    }

    pub fn insert(&self, key: &str, content: impl Into<Vec<u8>>) {
        self.lock().objects.insert(key.to_string(), content.into());
    }

    /// Make every subsequent delete fail
    pub fn fail_deletes(&self, fail: bool) {
        self.lock().fail_deletes = fail;
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().objects.contains_key(key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn move_one(&self, key: &str) -> Result<String> {
        let posted_key = posted_key_for(key)?;
        let mut state = self.lock();
        let content = state.objects.get(key).cloned().ok_or_else(|| QueueError::Io {
            key: key.to_string(),
            source: std::io::Error::new(ErrorKind::NotFound, "no such object"),
        })?;
        state.objects.insert(posted_key.clone(), content);
        if state.fail_deletes {
            return Err(QueueError::PartialMove {
                key: key.to_string(),
                posted_key,
                message: "delete rejected".to_string(),
            }
            .into());
        }
        state.objects.remove(key);
        Ok(posted_key)
    }
}

#[async_trait]
impl QueueSource for MemoryQueue {
    async fn list_pending(&self) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .objects
            .keys()
            .filter(|k| k.starts_with(PENDING_PREFIX))
            .cloned()
            .collect())
    }

    async fn read_caption(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .lock()
            .objects
            .get(key)
            .and_then(|bytes| normalize_caption(&String::from_utf8_lossy(bytes))))
    }

    async fn advance_to_posted(&self, key: &str) -> Result<String> {
        let posted = self.move_one(key)?;
        let caption_key = caption_key_for(key);
        if caption_key != key && self.contains(&caption_key) {
            self.move_one(&caption_key)?;
        }
        Ok(posted)
    }
}
