use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Config Error - {0}")]
    Config(String),

    #[error("Source Error - {0}")]
    Source(String),

    #[error("Row Store Error - {0}")]
    RowStore(String),

    #[error("Blob Store Error - {0}")]
    BlobStore(String),

    #[error("Publish Error - {0}")]
    Publish(String),

    #[error("Ack Error - {0}")]
    Ack(String),

    #[error("Timeout Error - {0}")]
    Timeout(String),

    #[error("Query Error - {0}")]
    InvalidQuery(String),

    #[error("metrics Error - {0}")]
    Metrics(String),

    #[error("Delivery Error - {0}")]
    Delivery(String),
}

impl From<satflow_pubsub::Error> for Error {
    fn from(value: satflow_pubsub::Error) -> Self {
        match value {
            satflow_pubsub::Error::Publish { .. } | satflow_pubsub::Error::Topic { .. } => {
                Error::Publish(value.to_string())
            }
            satflow_pubsub::Error::Ack { .. } => Error::Ack(value.to_string()),
            satflow_pubsub::Error::InvalidConfig(_) => Error::Config(value.to_string()),
            satflow_pubsub::Error::Connection(_) | satflow_pubsub::Error::Subscription { .. } => {
                Error::Source(value.to_string())
            }
        }
    }
}

impl From<satflow_bigquery::Error> for Error {
    fn from(value: satflow_bigquery::Error) -> Self {
        match value {
            satflow_bigquery::Error::InvalidConfig(_) => Error::Config(value.to_string()),
            _ => Error::RowStore(value.to_string()),
        }
    }
}

impl From<satflow_gcs::Error> for Error {
    fn from(value: satflow_gcs::Error) -> Self {
        match value {
            satflow_gcs::Error::InvalidConfig(_) => Error::Config(value.to_string()),
            _ => Error::BlobStore(value.to_string()),
        }
    }
}
