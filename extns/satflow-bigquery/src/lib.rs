//! BigQuery REST plumbing: streaming row inserts (`tabledata.insertAll`), synchronous ad-hoc
//! queries (`jobs.query`), and the geospatial query templates run against the scan table.
use std::time::Duration;

pub mod auth;
pub mod client;
pub mod queries;

pub use auth::Credentials;
pub use client::{BigQueryClient, RowError};

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("BigQuery transport error - {0}")]
    Http(#[from] reqwest::Error),

    #[error("BigQuery returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Decoding BigQuery response - {0}")]
    Decode(String),

    #[error("Query did not complete - {0}")]
    Incomplete(String),

    #[error("BigQuery credentials - {0}")]
    Auth(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq)]
pub struct BigQueryConfig {
    pub project_id: String,
    pub dataset: String,
    pub table: String,
    /// REST base URL, without a trailing slash.
    pub endpoint: String,
    pub request_timeout: Duration,
}

impl Default for BigQueryConfig {
    fn default() -> Self {
        BigQueryConfig {
            project_id: String::new(),
            dataset: String::new(),
            table: "satellite_data".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl BigQueryConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("project_id", &self.project_id),
            ("dataset", &self.dataset),
            ("table", &self.table),
            ("endpoint", &self.endpoint),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect();

        if !missing.is_empty() {
            return Err(Error::InvalidConfig(format!(
                "empty values for {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }
}
