use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::{BigQueryConfig, Credentials, Error, Result};

const QUERY_TIMEOUT_MS: u64 = 30_000;

/// A per-row rejection reported by `insertAll`.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub index: u32,
    pub reason: String,
    pub message: String,
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "row {}: {} ({})", self.index, self.message, self.reason)
    }
}

#[derive(Deserialize)]
struct InsertAllResponse {
    #[serde(default, rename = "insertErrors")]
    insert_errors: Vec<InsertErrors>,
}

#[derive(Deserialize)]
struct InsertErrors {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    #[serde(default, rename = "jobComplete")]
    job_complete: Option<bool>,
    #[serde(default, rename = "pageToken")]
    page_token: Option<String>,
}

#[derive(Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Deserialize)]
struct FieldSchema {
    name: String,
}

#[derive(Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

/// Client for a single BigQuery table. Cheap to clone; the underlying connection pool is shared.
#[derive(Clone)]
pub struct BigQueryClient {
    http: reqwest::Client,
    config: BigQueryConfig,
    credentials: Credentials,
}

impl BigQueryClient {
    pub fn new(config: BigQueryConfig, credentials: Credentials) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            config,
            credentials,
        })
    }

    fn insert_all_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/datasets/{}/tables/{}/insertAll",
            self.config.endpoint, self.config.project_id, self.config.dataset, self.config.table
        )
    }

    fn query_url(&self) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.config.endpoint, self.config.project_id
        )
    }

    async fn post(&self, url: String) -> Result<reqwest::RequestBuilder> {
        let request = self.http.post(url);
        Ok(match self.credentials.authorization().await? {
            Some(value) => request.header(reqwest::header::AUTHORIZATION, value),
            None => request,
        })
    }

    /// Streams a single row into the table. `insert_id` lets BigQuery drop duplicates of the
    /// same row on a best-effort basis. Returns the per-row errors, empty on success.
    pub async fn insert_row(&self, insert_id: &str, row: Value) -> Result<Vec<RowError>> {
        let body = json!({
            "rows": [{ "insertId": insert_id, "json": row }],
        });

        let response = self
            .post(self.insert_all_url())
            .await?
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let parsed: InsertAllResponse = response
            .json()
            .await
            .map_err(|e| Error::Decode(e.to_string()))?;

        let row_errors: Vec<RowError> = parsed
            .insert_errors
            .into_iter()
            .flat_map(|entry| {
                let index = entry.index;
                entry.errors.into_iter().map(move |e| RowError {
                    index,
                    reason: e.reason,
                    message: e.message,
                })
            })
            .collect();

        debug!(insert_id, errors = row_errors.len(), "insertAll completed");
        Ok(row_errors)
    }

    /// Runs a standard-SQL query and returns every row as an object keyed by column name.
    pub async fn query(&self, sql: &str) -> Result<Vec<Map<String, Value>>> {
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_TIMEOUT_MS,
        });

        let response = self
            .post(self.query_url())
            .await?
            .json(&body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| Error::Decode(e.to_string()))?;

        if parsed.job_complete == Some(false) {
            return Err(Error::Incomplete(format!(
                "job still running after {QUERY_TIMEOUT_MS}ms"
            )));
        }
        if parsed.page_token.is_some() {
            warn!("Query result has more pages, only the first page is returned");
        }

        let fields: Vec<String> = parsed
            .schema
            .map(|schema| schema.fields.into_iter().map(|f| f.name).collect())
            .unwrap_or_default();

        parsed
            .rows
            .into_iter()
            .map(|row| {
                if row.f.len() != fields.len() {
                    return Err(Error::Decode(format!(
                        "row has {} cells but schema has {} fields",
                        row.f.len(),
                        fields.len()
                    )));
                }
                Ok(fields
                    .iter()
                    .cloned()
                    .zip(row.f.into_iter().map(|cell| cell.v))
                    .collect())
            })
            .collect()
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&text)
        .map(|body| body.error.message)
        .unwrap_or(text);
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}
