//! Google Cloud Storage access for satflow, built on `object_store`. Any [ObjectStore] can be
//! plugged in, which is how the tests run against an in-memory store.
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tracing::{debug, info};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Object {0} not found")]
    NotFound(String),

    #[error("Object store error - {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GcsConfig {
    pub bucket: String,
}

/// Put/get/list on a single bucket. Cloning shares the underlying store.
#[derive(Clone)]
pub struct GcsClient {
    bucket: String,
    store: Arc<dyn ObjectStore>,
}

impl std::fmt::Debug for GcsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsClient")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl GcsClient {
    /// Connects to the bucket using the credentials discovered from the environment
    /// (service account file or application default credentials).
    pub fn connect(config: &GcsConfig) -> Result<Self> {
        if config.bucket.trim().is_empty() {
            return Err(Error::InvalidConfig("bucket name can not be empty".to_string()));
        }
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(&config.bucket)
            .build()?;
        info!(bucket = %config.bucket, "Created GCS client");
        Ok(Self::with_store(&config.bucket, Arc::new(store)))
    }

    pub fn with_store(bucket: &str, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.to_string(),
            store,
        }
    }

    /// Writes `content` under `key`, replacing any existing object.
    pub async fn put_object(&self, key: &str, content: Bytes) -> Result<()> {
        let size = content.len();
        self.store
            .put(&Path::from(key), PutPayload::from_bytes(content))
            .await?;
        debug!(bucket = %self.bucket, key, size, "Stored object");
        Ok(())
    }

    pub async fn get_object(&self, key: &str) -> Result<Bytes> {
        match self.store.get(&Path::from(key)).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => Err(Error::NotFound(key.to_string())),
            Err(e) => Err(Error::ObjectStore(e)),
        }
    }

    /// Lists object keys under `prefix` (or the whole bucket), sorted.
    pub async fn list_objects(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        let prefix = prefix.map(Path::from);
        let mut stream = self.store.list(prefix.as_ref());
        let mut keys = Vec::new();
        while let Some(meta) = stream.next().await {
            keys.push(meta?.location.to_string());
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use object_store::memory::InMemory;

    use super::*;

    fn client() -> GcsClient {
        GcsClient::with_store("archive", Arc::new(InMemory::new()))
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let client = client();
        client
            .put_object("processed_messages/1.txt", Bytes::from_static(b"Processed: hello"))
            .await
            .unwrap();
        let content = client.get_object("processed_messages/1.txt").await.unwrap();
        assert_eq!(content, Bytes::from_static(b"Processed: hello"));
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let client = client();
        client
            .put_object("processed_messages/1.txt", Bytes::from_static(b"first"))
            .await
            .unwrap();
        client
            .put_object("processed_messages/1.txt", Bytes::from_static(b"second"))
            .await
            .unwrap();

        let keys = client.list_objects(None).await.unwrap();
        assert_eq!(keys, vec!["processed_messages/1.txt".to_string()]);
        let content = client.get_object("processed_messages/1.txt").await.unwrap();
        assert_eq!(content, Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn test_get_missing_object() {
        let err = client().get_object("nope.txt").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(ref key) if key == "nope.txt"));
    }

    #[tokio::test]
    async fn test_list_with_prefix() {
        let client = client();
        for key in ["processed_messages/2.txt", "processed_messages/1.txt", "other/3.txt"] {
            client
                .put_object(key, Bytes::from_static(b"x"))
                .await
                .unwrap();
        }
        let keys = client
            .list_objects(Some("processed_messages"))
            .await
            .unwrap();
        assert_eq!(
            keys,
            vec![
                "processed_messages/1.txt".to_string(),
                "processed_messages/2.txt".to_string()
            ]
        );
    }

    #[test]
    fn test_connect_rejects_empty_bucket() {
        let err = GcsClient::connect(&GcsConfig {
            bucket: "".to_string(),
        })
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
