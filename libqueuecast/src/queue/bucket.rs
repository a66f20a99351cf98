//! Queue stored in an S3-compatible bucket
//!
//! Same layout as the directory queue: pending objects under `post/`,
//! published ones under `posted/`. Object stores have no rename, so an item
//! moves by server-side copy followed by delete.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::ObjectStore;
use reqwest::Method;
use tracing::{debug, info};

use crate::config::QueueConfig;
use crate::error::{ConfigError, QueueError, Result};
use crate::queue::{
    normalize_caption, pending_file_name, posted_key_for, MediaUrlResolver, QueueSource,
    PENDING_PREFIX,
};
use crate::types::caption_key_for;

/// Build an S3 client for `bucket`. Credentials and anything not set in
/// `settings` come from the usual `AWS_*` environment variables.
pub fn s3_store(bucket: &str, settings: &QueueConfig) -> Result<AmazonS3> {
    let mut builder = AmazonS3Builder::from_env().with_bucket_name(bucket);
    if let Some(region) = settings.region.as_deref().filter(|r| !r.is_empty()) {
        builder = builder.with_region(region);
    }
    if let Some(endpoint) = settings.endpoint.as_deref().filter(|e| !e.is_empty()) {
        builder = builder
            .with_endpoint(endpoint)
            .with_allow_http(endpoint.starts_with("http://"));
    }
    builder.build().map_err(|e| {
        ConfigError::InvalidValue {
            field: "queue.bucket".to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

fn store_error(key: &str, source: object_store::Error) -> QueueError {
    QueueError::Store {
        key: key.to_string(),
        source,
    }
}

/// Queue backed by any [`ObjectStore`]
#[derive(Debug, Clone)]
pub struct ObjectStoreQueue {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreQueue {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    async fn move_one(&self, key: &str) -> Result<String> {
        let posted_key = posted_key_for(key)?;
        let from = Path::from(key);

        self.store
            .copy(&from, &Path::from(posted_key.as_str()))
            .await
            .map_err(|e| store_error(key, e))?;
        self.store
            .delete(&from)
            .await
            .map_err(|e| QueueError::PartialMove {
                key: key.to_string(),
                posted_key: posted_key.clone(),
                message: e.to_string(),
            })?;

        debug!("Moved {} -> {}", key, posted_key);
        Ok(posted_key)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&Path::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(store_error(key, e).into()),
        }
    }
}

#[async_trait]
impl QueueSource for ObjectStoreQueue {
    async fn list_pending(&self) -> Result<Vec<String>> {
        let prefix = Path::from(PENDING_PREFIX.trim_end_matches('/'));
        // Direct children only, like the directory queue
        let listing = self
            .store
            .list_with_delimiter(Some(&prefix))
            .await
            .map_err(|e| store_error(PENDING_PREFIX, e))?;

        let mut keys: Vec<String> = listing
            .objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn read_caption(&self, key: &str) -> Result<Option<String>> {
        pending_file_name(key)?;
        let object = match self.store.get(&Path::from(key)).await {
            Ok(object) => object,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(store_error(key, e).into()),
        };
        let bytes = object.bytes().await.map_err(|e| store_error(key, e))?;
        Ok(normalize_caption(&String::from_utf8_lossy(&bytes)))
    }

    async fn advance_to_posted(&self, key: &str) -> Result<String> {
        let posted = self.move_one(key).await?;

        let caption_key = caption_key_for(key);
        if caption_key != key && self.exists(&caption_key).await? {
            self.move_one(&caption_key).await?;
        }

        info!("Advanced {} to {}", key, posted);
        Ok(posted)
    }
}

/// Hands platforms a time-limited presigned GET URL for each object
#[derive(Debug, Clone)]
pub struct PresignedUrlResolver {
    signer: Arc<dyn Signer>,
    expires_in: Duration,
}

impl PresignedUrlResolver {
    pub fn new(signer: Arc<dyn Signer>, expires_in: Duration) -> Self {
        Self { signer, expires_in }
    }
}

#[async_trait]
impl MediaUrlResolver for PresignedUrlResolver {
    async fn public_url(&self, key: &str) -> Result<String> {
        let url = self
            .signer
            .signed_url(Method::GET, &Path::from(key), self.expires_in)
            .await
            .map_err(|e| store_error(key, e))?;
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueuecastError;
    use futures::stream::BoxStream;
    use futures::TryStreamExt;
    use object_store::memory::InMemory;
    use object_store::{
        GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, PutMultipartOpts,
        PutOptions, PutPayload, PutResult,
    };
    use std::fmt;

    async fn put(store: &dyn ObjectStore, key: &str, content: &'static str) {
        store
            .put(&Path::from(key), PutPayload::from_static(content.as_bytes()))
            .await
            .unwrap();
    }

    async fn stored_keys(store: &dyn ObjectStore) -> Vec<String> {
        let mut keys: Vec<String> = store
            .list(None)
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await
            .unwrap();
        keys.sort();
        keys
    }

    /// Delegates to an in-memory store but rejects every delete
    #[derive(Debug)]
    struct RejectDeletes(InMemory);

    impl fmt::Display for RejectDeletes {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "RejectDeletes({})", self.0)
        }
    }

    #[async_trait]
    impl ObjectStore for RejectDeletes {
        async fn put_opts(
            &self,
            location: &Path,
            payload: PutPayload,
            opts: PutOptions,
        ) -> object_store::Result<PutResult> {
            self.0.put_opts(location, payload, opts).await
        }

        async fn put_multipart_opts(
            &self,
            location: &Path,
            opts: PutMultipartOpts,
        ) -> object_store::Result<Box<dyn MultipartUpload>> {
            self.0.put_multipart_opts(location, opts).await
        }

        async fn get_opts(
            &self,
            location: &Path,
            options: GetOptions,
        ) -> object_store::Result<GetResult> {
            self.0.get_opts(location, options).await
        }

        async fn delete(&self, _location: &Path) -> object_store::Result<()> {
            Err(object_store::Error::NotImplemented)
        }

        fn list(&self, prefix: Option<&Path>) -> BoxStream<'_, object_store::Result<ObjectMeta>> {
            self.0.list(prefix)
        }

        async fn list_with_delimiter(&self, prefix: Option<&Path>) -> object_store::Result<ListResult> {
            self.0.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.0.copy(from, to).await
        }

        async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> object_store::Result<()> {
            self.0.copy_if_not_exists(from, to).await
        }
    }

    #[tokio::test]
    async fn test_bucket_queue_lists_direct_children_of_post() {
        let store = Arc::new(InMemory::new());
        put(store.as_ref(), "post/b.mp4", "vid").await;
        put(store.as_ref(), "post/a.jpg", "img").await;
        put(store.as_ref(), "post/a.txt", "cap").await;
        put(store.as_ref(), "post/nested/c.jpg", "img").await;
        put(store.as_ref(), "posted/old.jpg", "img").await;

        let queue = ObjectStoreQueue::new(store);
        assert_eq!(
            queue.list_pending().await.unwrap(),
            vec!["post/a.jpg", "post/a.txt", "post/b.mp4"]
        );
    }

    #[tokio::test]
    async fn test_bucket_queue_caption_is_trimmed() {
        let store = Arc::new(InMemory::new());
        put(store.as_ref(), "post/a.txt", "  Hello bucket \n").await;
        put(store.as_ref(), "post/b.txt", " \n").await;

        let queue = ObjectStoreQueue::new(store);
        assert_eq!(
            queue.read_caption("post/a.txt").await.unwrap().as_deref(),
            Some("Hello bucket")
        );
        assert_eq!(queue.read_caption("post/b.txt").await.unwrap(), None);
        assert_eq!(queue.read_caption("post/c.txt").await.unwrap(), None);
        assert!(queue.read_caption("posted/a.txt").await.is_err());
    }

    #[tokio::test]
    async fn test_bucket_queue_moves_media_and_caption() {
        let store = Arc::new(InMemory::new());
        put(store.as_ref(), "post/a.jpg", "img").await;
        put(store.as_ref(), "post/a.txt", "cap").await;
        put(store.as_ref(), "post/b.mp4", "vid").await;

        let queue = ObjectStoreQueue::new(store.clone());
        let posted = queue.advance_to_posted("post/a.jpg").await.unwrap();
        assert_eq!(posted, "posted/a.jpg");
        assert_eq!(
            stored_keys(store.as_ref()).await,
            vec!["post/b.mp4", "posted/a.jpg", "posted/a.txt"]
        );

        let moved = store.get(&Path::from("posted/a.jpg")).await.unwrap();
        assert_eq!(moved.bytes().await.unwrap().as_ref(), b"img");
    }

    #[tokio::test]
    async fn test_bucket_queue_move_without_caption() {
        let store = Arc::new(InMemory::new());
        put(store.as_ref(), "post/c.png", "png").await;

        let queue = ObjectStoreQueue::new(store.clone());
        queue.advance_to_posted("post/c.png").await.unwrap();
        assert_eq!(stored_keys(store.as_ref()).await, vec!["posted/c.png"]);
    }

    #[tokio::test]
    async fn test_bucket_queue_missing_item_is_store_error() {
        let queue = ObjectStoreQueue::new(Arc::new(InMemory::new()));
        let err = queue.advance_to_posted("post/gone.jpg").await.unwrap_err();
        assert!(matches!(err, QueuecastError::Queue(QueueError::Store { .. })));
    }

    #[tokio::test]
    async fn test_bucket_queue_partial_move() {
        let store = Arc::new(RejectDeletes(InMemory::new()));
        put(store.as_ref(), "post/a.jpg", "img").await;

        let queue = ObjectStoreQueue::new(store.clone());
        let err = queue.advance_to_posted("post/a.jpg").await.unwrap_err();
        match err {
            QueuecastError::Queue(QueueError::PartialMove { key, posted_key, .. }) => {
                assert_eq!(key, "post/a.jpg");
                assert_eq!(posted_key, "posted/a.jpg");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(
            stored_keys(store.as_ref()).await,
            vec!["post/a.jpg", "posted/a.jpg"]
        );
    }

    #[tokio::test]
    async fn test_presigned_url_resolver() {
        let s3 = AmazonS3Builder::new()
            .with_bucket_name("queue")
            .with_region("us-east-1")
            .with_endpoint("http://localhost:9000")
            .with_allow_http(true)
            .with_access_key_id("AKIDEXAMPLE")
            .with_secret_access_key("secret")
            .build()
            .unwrap();
        let resolver = PresignedUrlResolver::new(Arc::new(s3), Duration::from_secs(3600));

        let url = resolver.public_url("post/a.jpg").await.unwrap();
        assert!(url.starts_with("http://localhost:9000/"));
        assert!(url.contains("post/a.jpg"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("X-Amz-Signature="));
        assert!(url.contains("AKIDEXAMPLE"));
    }

    #[test]
    fn test_s3_store_from_settings() {
        let mut settings = QueueConfig::default();
        settings.region = Some("eu-west-1".to_string());
        settings.endpoint = Some("http://minio.local:9000".to_string());
        assert!(s3_store("queue", &settings).is_ok());
    }
}
