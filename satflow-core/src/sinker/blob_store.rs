use bytes::Bytes;
use satflow_gcs::GcsClient;

use crate::sinker::BlobStore;

impl BlobStore for GcsClient {
    async fn put_object(&self, key: &str, content: Bytes) -> crate::Result<()> {
        GcsClient::put_object(self, key, content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use object_store::memory::InMemory;

    use super::*;

    #[tokio::test]
    async fn test_put_object_overwrites() {
        let client = GcsClient::with_store("archive", Arc::new(InMemory::new()));
        BlobStore::put_object(&client, "processed_messages/m-1.txt", Bytes::from_static(b"a"))
            .await
            .unwrap();
        BlobStore::put_object(&client, "processed_messages/m-1.txt", Bytes::from_static(b"b"))
            .await
            .unwrap();

        assert_eq!(
            client.list_objects(Some("processed_messages")).await.unwrap(),
            vec!["processed_messages/m-1.txt".to_string()]
        );
        assert_eq!(
            client.get_object("processed_messages/m-1.txt").await.unwrap(),
            Bytes::from_static(b"b")
        );
    }
}
