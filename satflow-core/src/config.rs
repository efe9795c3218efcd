use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use satflow_bigquery::BigQueryConfig;
use satflow_pubsub::PubSubConfig;

use crate::Error;

const ENV_GCP_PROJECT_ID: &str = "GCP_PROJECT_ID";
const ENV_PUBSUB_SUBSCRIPTION_ID: &str = "PUBSUB_SUBSCRIPTION_ID";
const ENV_PUBSUB_TOPIC_RESPONSE: &str = "PUBSUB_TOPIC_RESPONSE";
const ENV_PUBSUB_EMULATOR_HOST: &str = "PUBSUB_EMULATOR_HOST";
const ENV_DATASET_NAME: &str = "DATASET_NAME";
const ENV_TABLE_NAME: &str = "TABLE_NAME";
const ENV_BIGQUERY_ENDPOINT: &str = "BIGQUERY_ENDPOINT";
const ENV_GOOGLE_OAUTH_ACCESS_TOKEN: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
const ENV_GOOGLE_APPLICATION_CREDENTIALS: &str = "GOOGLE_APPLICATION_CREDENTIALS";
const ENV_GCS_BUCKET_NAME: &str = "GCS_BUCKET_NAME";
const ENV_ARCHIVE_PREFIX: &str = "SATFLOW_ARCHIVE_PREFIX";
const ENV_PROCESSED_PREFIX: &str = "SATFLOW_PROCESSED_PREFIX";
const ENV_MAX_IN_FLIGHT: &str = "SATFLOW_MAX_IN_FLIGHT";
const ENV_SINK_TIMEOUT_MS: &str = "SATFLOW_SINK_TIMEOUT_MS";
const ENV_METRICS_PORT: &str = "SATFLOW_METRICS_PORT";

const DEFAULT_TABLE_NAME: &str = "satellite_data";
const DEFAULT_ARCHIVE_PREFIX: &str = "processed_messages";
const DEFAULT_PROCESSED_PREFIX: &str = "Processed: ";
const DEFAULT_MAX_IN_FLIGHT: usize = 32;
const DEFAULT_SINK_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_METRICS_PORT: u16 = 2469;

/// Subscription and topics used by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PubSubSettings {
    pub project_id: String,
    pub subscription: String,
    pub response_topic: String,
    pub emulator_host: Option<String>,
}

impl PubSubSettings {
    pub fn client_config(&self) -> PubSubConfig {
        PubSubConfig {
            project_id: self.project_id.clone(),
            emulator_host: self.emulator_host.clone(),
        }
    }
}

/// Dataset and table the scans are written to.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSettings {
    pub dataset: String,
    pub table: String,
}

impl TableSettings {
    /// Loads only the table name, enough to render queries without contacting BigQuery.
    pub fn load() -> crate::Result<Self> {
        let env_vars: HashMap<String, String> = env::vars().collect();
        let mut reader = EnvReader::new(&env_vars);
        let settings = Self::read(&mut reader);
        reader.finish()?;
        Ok(settings)
    }

    fn read(reader: &mut EnvReader<'_>) -> Self {
        Self {
            dataset: reader.required(ENV_DATASET_NAME),
            table: reader
                .optional(ENV_TABLE_NAME)
                .unwrap_or_else(|| DEFAULT_TABLE_NAME.to_string()),
        }
    }
}

/// How requests to BigQuery are authorized.
#[derive(Clone, PartialEq)]
pub enum RowStoreAuth {
    /// Application default credentials, refreshed for as long as the pipeline runs.
    ApplicationDefault,
    /// Fixed token, only accepted together with a custom endpoint.
    AccessToken(String),
    /// No credentials, for emulators behind a custom endpoint.
    Anonymous,
}

impl fmt::Debug for RowStoreAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowStoreAuth::ApplicationDefault => write!(f, "ApplicationDefault"),
            RowStoreAuth::AccessToken(_) => write!(f, "AccessToken(****)"),
            RowStoreAuth::Anonymous => write!(f, "Anonymous"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowStoreSettings {
    pub project_id: String,
    pub dataset: String,
    pub table: String,
    pub endpoint: String,
    pub auth: RowStoreAuth,
}

impl RowStoreSettings {
    /// Loads only what the row store needs, for tools that do not run the pipeline.
    pub fn load() -> crate::Result<Self> {
        let env_vars: HashMap<String, String> = env::vars().collect();
        let mut reader = EnvReader::new(&env_vars);
        let settings = Self::read(&mut reader);
        reader.finish()?;
        Ok(settings)
    }

    fn read(reader: &mut EnvReader<'_>) -> Self {
        let project_id = reader.required(ENV_GCP_PROJECT_ID);
        let TableSettings { dataset, table } = TableSettings::read(reader);
        let endpoint = reader
            .optional(ENV_BIGQUERY_ENDPOINT)
            .map(|endpoint| endpoint.trim_end_matches('/').to_string());

        let auth = match (&endpoint, reader.optional(ENV_GOOGLE_OAUTH_ACCESS_TOKEN)) {
            (Some(_), Some(token)) => RowStoreAuth::AccessToken(token),
            (Some(_), None) => RowStoreAuth::Anonymous,
            (None, Some(_)) => {
                reader.invalid.push(format!(
                    "{ENV_GOOGLE_OAUTH_ACCESS_TOKEN} expires and is never refreshed, it is only accepted with {ENV_BIGQUERY_ENDPOINT}"
                ));
                RowStoreAuth::ApplicationDefault
            }
            (None, None) => {
                if let Some(path) = reader
                    .optional(ENV_GOOGLE_APPLICATION_CREDENTIALS)
                    .filter(|path| !Path::new(path).is_file())
                {
                    reader.invalid.push(format!(
                        "{ENV_GOOGLE_APPLICATION_CREDENTIALS}='{path}': no such credentials file"
                    ));
                }
                RowStoreAuth::ApplicationDefault
            }
        };

        Self {
            project_id,
            dataset,
            table,
            endpoint: endpoint.unwrap_or_else(|| satflow_bigquery::DEFAULT_ENDPOINT.to_string()),
            auth,
        }
    }

    pub fn table_settings(&self) -> TableSettings {
        TableSettings {
            dataset: self.dataset.clone(),
            table: self.table.clone(),
        }
    }

    pub fn client_config(&self, request_timeout: Duration) -> BigQueryConfig {
        BigQueryConfig {
            project_id: self.project_id.clone(),
            dataset: self.dataset.clone(),
            table: self.table.clone(),
            endpoint: self.endpoint.clone(),
            request_timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlobStoreSettings {
    pub bucket: String,
    /// Archived objects are stored as `<archive_prefix>/<message id>.txt`.
    pub archive_prefix: String,
}

impl BlobStoreSettings {
    /// Loads the archive settings. `None` when no bucket is configured.
    pub fn load() -> Option<Self> {
        let env_vars: HashMap<String, String> = env::vars().collect();
        Self::read(&EnvReader::new(&env_vars))
    }

    fn read(reader: &EnvReader<'_>) -> Option<Self> {
        let bucket = reader.optional(ENV_GCS_BUCKET_NAME)?;
        Some(Self {
            bucket,
            archive_prefix: reader
                .optional(ENV_ARCHIVE_PREFIX)
                .map(|prefix| prefix.trim_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_ARCHIVE_PREFIX.to_string()),
        })
    }
}

/// Everything the pipeline needs, built once at startup and handed to each component.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub pubsub: PubSubSettings,
    pub row_store: RowStoreSettings,
    /// Archiving is disabled when no bucket is configured.
    pub blob_store: Option<BlobStoreSettings>,
    pub processed_prefix: String,
    pub max_in_flight: usize,
    /// Upper bound for every single sink call.
    pub sink_timeout: Duration,
    pub metrics_port: u16,
}

impl Settings {
    /// Loads the settings from the process environment.
    pub fn load() -> crate::Result<Self> {
        let env_vars: HashMap<String, String> = env::vars().collect();
        Self::try_from(env_vars)
    }
}

impl TryFrom<HashMap<String, String>> for Settings {
    type Error = Error;

    fn try_from(env_vars: HashMap<String, String>) -> Result<Self, Self::Error> {
        let mut reader = EnvReader::new(&env_vars);

        let row_store = RowStoreSettings::read(&mut reader);
        let pubsub = PubSubSettings {
            project_id: row_store.project_id.clone(),
            subscription: reader.required(ENV_PUBSUB_SUBSCRIPTION_ID),
            response_topic: reader.required(ENV_PUBSUB_TOPIC_RESPONSE),
            emulator_host: reader.optional(ENV_PUBSUB_EMULATOR_HOST),
        };
        let blob_store = BlobStoreSettings::read(&reader);

        let processed_prefix = env_vars
            .get(ENV_PROCESSED_PREFIX)
            .cloned()
            .unwrap_or_else(|| DEFAULT_PROCESSED_PREFIX.to_string());
        let max_in_flight = reader.positive(ENV_MAX_IN_FLIGHT, DEFAULT_MAX_IN_FLIGHT);
        let sink_timeout_ms = reader.positive(ENV_SINK_TIMEOUT_MS, DEFAULT_SINK_TIMEOUT_MS);
        let metrics_port = reader.parse(ENV_METRICS_PORT, DEFAULT_METRICS_PORT);

        reader.finish()?;

        Ok(Settings {
            pubsub,
            row_store,
            blob_store,
            processed_prefix,
            max_in_flight,
            sink_timeout: Duration::from_millis(sink_timeout_ms),
            metrics_port,
        })
    }
}

/// Reads variables, collecting every missing or invalid one before failing.
struct EnvReader<'a> {
    env_vars: &'a HashMap<String, String>,
    missing: Vec<&'static str>,
    invalid: Vec<String>,
}

impl<'a> EnvReader<'a> {
    fn new(env_vars: &'a HashMap<String, String>) -> Self {
        Self {
            env_vars,
            missing: Vec::new(),
            invalid: Vec::new(),
        }
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.env_vars
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    fn required(&mut self, key: &'static str) -> String {
        self.optional(key).unwrap_or_else(|| {
            self.missing.push(key);
            String::new()
        })
    }

    fn parse<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let Some(value) = self.optional(key) else {
            return default;
        };
        value.parse().unwrap_or_else(|e| {
            self.invalid.push(format!("{key}='{value}': {e}"));
            default
        })
    }

    fn positive<T>(&mut self, key: &str, default: T) -> T
    where
        T: FromStr + PartialOrd + Default + Copy,
        T::Err: fmt::Display,
    {
        let value = self.parse(key, default);
        if value <= T::default() {
            self.invalid.push(format!("{key} must be greater than 0"));
            return default;
        }
        value
    }

    fn finish(self) -> crate::Result<()> {
        let mut problems = Vec::new();
        if !self.missing.is_empty() {
            problems.push(format!(
                "missing environment variables: {}",
                self.missing.join(", ")
            ));
        }
        problems.extend(self.invalid);
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(problems.join("; ")))
        }
    }
}
