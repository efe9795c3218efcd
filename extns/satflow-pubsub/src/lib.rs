//! Google Cloud Pub/Sub plumbing: a streaming-pull [source::PubSubSource] whose messages carry
//! an [source::AckHandle], and a [publisher::PubSubPublisher] that waits for the server
//! confirmation of every publish.
use google_cloud_gax::conn::Environment;
use google_cloud_pubsub::client::{Client, ClientConfig};
use tracing::info;

pub mod publisher;
pub mod source;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Connecting to Pub/Sub - {0}")]
    Connection(String),

    #[error("Subscription {subscription} - {error}")]
    Subscription { subscription: String, error: String },

    #[error("Topic {topic} - {error}")]
    Topic { topic: String, error: String },

    #[error("Publishing to {topic} - {error}")]
    Publish { topic: String, error: String },

    #[error("Settling message {message_id} - {error}")]
    Ack { message_id: String, error: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Connection details shared by the subscriber and the publisher.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PubSubConfig {
    pub project_id: String,
    /// `host:port` of a Pub/Sub emulator. Authentication is skipped when set.
    pub emulator_host: Option<String>,
}

impl PubSubConfig {
    fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(Error::InvalidConfig("project id can not be empty".to_string()));
        }
        if let Some(host) = &self.emulator_host {
            if host.trim().is_empty() {
                return Err(Error::InvalidConfig(
                    "emulator host can not be empty when set".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Creates a Pub/Sub client, either against the emulator or with application default credentials.
pub async fn create_client(config: &PubSubConfig) -> Result<Client> {
    config.validate()?;

    let mut client_config = ClientConfig::default();
    client_config.project_id = Some(config.project_id.clone());

    match &config.emulator_host {
        Some(host) => {
            info!(%host, "Using Pub/Sub emulator");
            client_config.environment = Environment::Emulator(host.clone());
        }
        None => {
            client_config = client_config
                .with_auth()
                .await
                .map_err(|e| Error::Connection(format!("authenticating client: {e}")))?;
        }
    }

    Client::new(client_config)
        .await
        .map_err(|e| Error::Connection(e.to_string()))
}
