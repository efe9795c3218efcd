use satflow_bigquery::BigQueryClient;
use serde_json::Value;

use crate::sinker::RowStore;

impl RowStore for BigQueryClient {
    async fn insert_row(&self, insert_id: &str, row: Value) -> crate::Result<Vec<String>> {
        let row_errors = BigQueryClient::insert_row(self, insert_id, row).await?;
        Ok(row_errors.iter().map(ToString::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::routing::post;
    use axum::{Json, Router};
    use satflow_bigquery::{BigQueryConfig, Credentials};
    use serde_json::json;

    use super::*;
    use crate::Error;

    async fn start_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client(endpoint: String) -> BigQueryClient {
        BigQueryClient::new(
            BigQueryConfig {
                project_id: "proj".to_string(),
                dataset: "scans".to_string(),
                endpoint,
                request_timeout: Duration::from_secs(5),
                ..Default::default()
            },
            Credentials::Anonymous,
        )
        .unwrap()
    }

    const INSERT_ALL: &str =
        "/bigquery/v2/projects/proj/datasets/scans/tables/satellite_data/insertAll";

    #[tokio::test]
    async fn test_row_errors_become_reasons() {
        let router = Router::new().route(
            INSERT_ALL,
            post(|| async {
                Json(json!({
                    "insertErrors": [{
                        "index": 0,
                        "errors": [{ "reason": "invalid", "message": "no such field: message" }]
                    }]
                }))
            }),
        );
        let store = client(start_server(router).await);

        let errors = RowStore::insert_row(&store, "m-1", json!({ "message": "x" }))
            .await
            .unwrap();
        assert_eq!(
            errors,
            vec!["row 0: no such field: message (invalid)".to_string()]
        );
    }

    #[tokio::test]
    async fn test_http_failure_is_row_store_error() {
        let router = Router::new().route(
            INSERT_ALL,
            post(|| async {
                (
                    axum::http::StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({ "error": { "code": 503, "message": "backend unavailable" } })),
                )
            }),
        );
        let store = client(start_server(router).await);

        let err = RowStore::insert_row(&store, "m-1", json!({ "message": "x" }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RowStore(ref message) if message.contains("backend unavailable")));
    }
}
