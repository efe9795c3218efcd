use std::collections::HashMap;

use bytes::Bytes;
use google_cloud_googleapis::pubsub::v1::PubsubMessage;
use google_cloud_pubsub::client::Client;
use google_cloud_pubsub::publisher::Publisher;
use tracing::info;

use crate::{Error, Result};

/// Publishes to a single topic. Cloning shares the underlying publisher workers.
#[derive(Clone)]
pub struct PubSubPublisher {
    topic: String,
    publisher: Publisher,
}

impl PubSubPublisher {
    pub async fn connect(client: &Client, topic_id: &str) -> Result<Self> {
        if topic_id.trim().is_empty() {
            return Err(Error::InvalidConfig("topic id can not be empty".to_string()));
        }

        let topic = client.topic(topic_id);
        let exists = topic.exists(None).await.map_err(|status| Error::Topic {
            topic: topic_id.to_string(),
            error: status.to_string(),
        })?;
        if !exists {
            return Err(Error::Topic {
                topic: topic_id.to_string(),
                error: "topic does not exist".to_string(),
            });
        }

        info!(topic = topic_id, "Created Pub/Sub publisher");
        Ok(Self {
            topic: topic_id.to_string(),
            publisher: topic.new_publisher(None),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publishes one message and waits until the server has accepted it. Returns the
    /// server-assigned message id.
    pub async fn publish(
        &self,
        payload: Bytes,
        attributes: HashMap<String, String>,
    ) -> Result<String> {
        let message = PubsubMessage {
            data: payload.to_vec(),
            attributes,
            ..Default::default()
        };

        let awaiter = self.publisher.publish(message).await;
        awaiter.get().await.map_err(|status| Error::Publish {
            topic: self.topic.clone(),
            error: status.to_string(),
        })
    }

    /// Flushes buffered messages and stops the publisher workers.
    pub async fn shutdown(&mut self) {
        info!(topic = %self.topic, "Shutting down Pub/Sub publisher");
        self.publisher.shutdown().await;
    }
}
