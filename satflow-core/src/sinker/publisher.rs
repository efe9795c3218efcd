use std::collections::HashMap;

use bytes::Bytes;
use satflow_pubsub::publisher::PubSubPublisher;

use crate::sinker::Publisher;

impl Publisher for PubSubPublisher {
    async fn publish(&self, payload: Bytes) -> crate::Result<String> {
        Ok(PubSubPublisher::publish(self, payload, HashMap::new()).await?)
    }
}
