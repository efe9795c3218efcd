use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use satflow_pubsub::source::{AckHandle, PubSubMessage};
use tokio::sync::oneshot;

use crate::Error;

/// Settlement sent back through a channel receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAck {
    /// Message was successfully processed.
    Ack,
    /// Message was not processed and has to be redelivered.
    Nak,
}

/// Opaque token required to settle one delivery attempt. Settling consumes it, so a delivery can
/// be acked or nacked at most once.
pub enum Receipt {
    PubSub(AckHandle),
    /// Receipt of an in-process source, the settlement is sent back over the channel.
    Channel(oneshot::Sender<ReadAck>),
}

impl fmt::Debug for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Receipt::PubSub(handle) => f.debug_tuple("PubSub").field(handle).finish(),
            Receipt::Channel(_) => f.write_str("Channel"),
        }
    }
}

impl Receipt {
    pub async fn ack(self) -> crate::Result<()> {
        self.settle(ReadAck::Ack).await
    }

    pub async fn nack(self) -> crate::Result<()> {
        self.settle(ReadAck::Nak).await
    }

    async fn settle(self, ack: ReadAck) -> crate::Result<()> {
        match self {
            Receipt::PubSub(handle) => match ack {
                ReadAck::Ack => handle.ack().await?,
                ReadAck::Nak => handle.nack().await?,
            },
            Receipt::Channel(tx) => tx
                .send(ack)
                .map_err(|_| Error::Ack("receipt receiver was dropped".to_string()))?,
        }
        Ok(())
    }
}

/// A delivered unit of work.
#[derive(Debug)]
pub struct InboundMessage {
    /// Identifier assigned by the source, stable across redeliveries.
    pub id: String,
    pub payload: Bytes,
    pub attributes: HashMap<String, String>,
    /// Number of delivery attempts, if the source tracks it.
    pub delivery_attempt: Option<usize>,
    pub receipt: Receipt,
}

impl From<PubSubMessage> for InboundMessage {
    fn from(message: PubSubMessage) -> Self {
        InboundMessage {
            id: message.id,
            payload: message.payload,
            attributes: message.attributes,
            delivery_attempt: message.delivery_attempt,
            receipt: Receipt::PubSub(message.handle),
        }
    }
}

/// Output of the [crate::processor::Processor].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedRecord {
    pub message_id: String,
    pub content: String,
}
