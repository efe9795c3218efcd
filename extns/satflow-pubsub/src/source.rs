use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use google_cloud_pubsub::client::Client;
use google_cloud_pubsub::subscriber::ReceivedMessage;
use google_cloud_pubsub::subscription::MessageStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct PubSubSourceConfig {
    pub subscription: String,
}

/// A message pulled from the subscription. The payload and metadata are detached from the
/// underlying gRPC message so that only the [AckHandle] has to travel with the delivery.
#[derive(Debug)]
pub struct PubSubMessage {
    pub id: String,
    pub payload: Bytes,
    pub attributes: HashMap<String, String>,
    pub delivery_attempt: Option<usize>,
    pub handle: AckHandle,
}

impl From<ReceivedMessage> for PubSubMessage {
    fn from(mut received: ReceivedMessage) -> Self {
        let payload = Bytes::from(std::mem::take(&mut received.message.data));
        let attributes = std::mem::take(&mut received.message.attributes);
        let id = received.message.message_id.clone();
        let delivery_attempt = received.delivery_attempt();
        PubSubMessage {
            id: id.clone(),
            payload,
            attributes,
            delivery_attempt,
            handle: AckHandle {
                message_id: id,
                received,
            },
        }
    }
}

/// Settles exactly one Pub/Sub delivery. Both operations consume the handle, so a message can
/// not be acknowledged after it was negatively acknowledged (or the other way around).
pub struct AckHandle {
    message_id: String,
    received: ReceivedMessage,
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("message_id", &self.message_id)
            .field("ack_id", &self.received.ack_id())
            .finish()
    }
}

impl AckHandle {
    pub async fn ack(self) -> Result<()> {
        self.received.ack().await.map_err(|status| Error::Ack {
            message_id: self.message_id.clone(),
            error: status.to_string(),
        })
    }

    /// Makes the message immediately eligible for redelivery.
    pub async fn nack(self) -> Result<()> {
        self.received.nack().await.map_err(|status| Error::Ack {
            message_id: self.message_id.clone(),
            error: status.to_string(),
        })
    }
}

/// Streaming-pull consumer of a single subscription.
pub struct PubSubSource {
    subscription: String,
    stream: MessageStream,
    cancel: CancellationToken,
}

impl PubSubSource {
    pub async fn connect(client: &Client, config: PubSubSourceConfig) -> Result<Self> {
        if config.subscription.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "subscription id can not be empty".to_string(),
            ));
        }

        let subscription = client.subscription(&config.subscription);
        let exists = subscription
            .exists(None)
            .await
            .map_err(|status| Error::Subscription {
                subscription: config.subscription.clone(),
                error: status.to_string(),
            })?;
        if !exists {
            return Err(Error::Subscription {
                subscription: config.subscription,
                error: "subscription does not exist".to_string(),
            });
        }

        let stream = subscription
            .subscribe(None)
            .await
            .map_err(|status| Error::Subscription {
                subscription: config.subscription.clone(),
                error: format!("subscribing: {status}"),
            })?;
        let cancel = stream.cancellable();

        info!(subscription = %config.subscription, "Subscribed to Pub/Sub");
        Ok(Self {
            subscription: config.subscription,
            stream,
            cancel,
        })
    }

    /// Waits for the next delivery. Returns `None` once the stream is closed.
    pub async fn next_message(&mut self) -> Option<PubSubMessage> {
        self.stream.next().await.map(PubSubMessage::from)
    }

    /// Stops pulling. Messages that were already handed out stay settleable.
    pub fn close(&self) {
        info!(subscription = %self.subscription, "Closing Pub/Sub subscription stream");
        self.cancel.cancel();
    }
}

#[cfg(feature = "pubsub-emulator-tests")]
#[cfg(test)]
mod tests {
    use std::time::Duration;

    use google_cloud_pubsub::subscription::SubscriptionConfig;

    use super::*;
    use crate::publisher::PubSubPublisher;
    use crate::{PubSubConfig, create_client};

    fn emulator_config() -> PubSubConfig {
        PubSubConfig {
            project_id: "satflow-test".to_string(),
            emulator_host: Some(
                std::env::var("PUBSUB_EMULATOR_HOST")
                    .unwrap_or_else(|_| "localhost:8085".to_string()),
            ),
        }
    }

    fn unique(prefix: &str) -> String {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("{prefix}-{nanos}")
    }

    #[tokio::test]
    async fn test_consume_and_ack() {
        let client = create_client(&emulator_config()).await.unwrap();
        let topic_id = unique("satflow-topic");
        let subscription_id = unique("satflow-sub");

        let topic = client.topic(&topic_id);
        topic.create(None, None).await.unwrap();
        client
            .create_subscription(
                &subscription_id,
                &topic_id,
                SubscriptionConfig::default(),
                None,
            )
            .await
            .unwrap();

        let mut publisher = PubSubPublisher::connect(&client, &topic_id).await.unwrap();
        let published_id = publisher
            .publish(Bytes::from_static(b"scan-17"), HashMap::new())
            .await
            .unwrap();

        let mut source = PubSubSource::connect(
            &client,
            PubSubSourceConfig {
                subscription: subscription_id.clone(),
            },
        )
        .await
        .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(10), source.next_message())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.id, published_id);
        assert_eq!(message.payload, Bytes::from_static(b"scan-17"));
        message.handle.ack().await.unwrap();

        source.close();
        publisher.shutdown().await;
        client
            .subscription(&subscription_id)
            .delete(None)
            .await
            .unwrap();
        topic.delete(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_subscription() {
        let client = create_client(&emulator_config()).await.unwrap();
        let result = PubSubSource::connect(
            &client,
            PubSubSourceConfig {
                subscription: unique("missing"),
            },
        )
        .await;
        assert!(matches!(result, Err(Error::Subscription { .. })));
    }
}
