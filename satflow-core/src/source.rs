//! Message sources feeding the [crate::supervisor::PipelineSupervisor].
//!
//! A source hands out [InboundMessage]s, each carrying the receipt needed to settle it. Settling
//! happens through the receipt, never through the source, so deliveries can be acked or nacked
//! concurrently while the source keeps pulling.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::Error;
use crate::message::{InboundMessage, ReadAck, Receipt};

/// Pub/Sub streaming pull.
pub(crate) mod pubsub;

#[trait_variant::make(MessageSource: Send)]
#[allow(dead_code)]
pub trait LocalMessageSource {
    /// Waits for the next delivery. `None` means the source is exhausted or closed, an `Err` is a
    /// failure to receive that does not end the stream.
    async fn recv(&mut self) -> Option<crate::Result<InboundMessage>>;

    /// Stops accepting new deliveries. Deliveries already handed out remain settleable.
    async fn close(&mut self);
}

/// Creates an in-process source with room for `capacity` pending deliveries.
pub fn channel_source(capacity: usize) -> (ChannelSourceHandle, ChannelSource) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelSourceHandle { tx }, ChannelSource { rx })
}

/// In-process source, settlements are reported back to whoever sent the message.
pub struct ChannelSource {
    rx: mpsc::Receiver<InboundMessage>,
}

impl MessageSource for ChannelSource {
    async fn recv(&mut self) -> Option<crate::Result<InboundMessage>> {
        self.rx.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        info!("Closing in-process source");
        self.rx.close();
    }
}

/// Sending side of a [ChannelSource].
#[derive(Clone)]
pub struct ChannelSourceHandle {
    tx: mpsc::Sender<InboundMessage>,
}

impl ChannelSourceHandle {
    /// Delivers a message and returns the receiver on which its settlement will arrive.
    pub async fn send(
        &self,
        id: impl Into<String>,
        payload: Bytes,
        attributes: HashMap<String, String>,
    ) -> crate::Result<oneshot::Receiver<ReadAck>> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let message = InboundMessage {
            id: id.into(),
            payload,
            attributes,
            delivery_attempt: None,
            receipt: Receipt::Channel(ack_tx),
        };
        self.tx
            .send(message)
            .await
            .map_err(|_| Error::Source("in-process source is closed".to_string()))?;
        Ok(ack_rx)
    }
}
