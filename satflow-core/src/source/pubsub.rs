use satflow_pubsub::source::PubSubSource;
use tracing::debug;

use crate::message::InboundMessage;
use crate::source::MessageSource;

impl MessageSource for PubSubSource {
    async fn recv(&mut self) -> Option<crate::Result<InboundMessage>> {
        let message = self.next_message().await?;
        debug!(
            message_id = %message.id,
            delivery_attempt = ?message.delivery_attempt,
            "Received Pub/Sub message"
        );
        Some(Ok(message.into()))
    }

    async fn close(&mut self) {
        PubSubSource::close(self);
    }
}
