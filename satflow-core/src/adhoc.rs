//! One-shot operations behind the `query` and `archive` commands. They use the same clients as
//! the pipeline but never touch the subscription.

use std::time::Duration;

use bytes::Bytes;
use satflow_bigquery::queries::GeoQueries;
use serde_json::{Map, Value};
use tracing::info;

use crate::Error;
use crate::config::{BlobStoreSettings, RowStoreSettings, TableSettings};
use crate::shared::create_components::{create_blob_store, create_row_store};

const QUERY_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub const MAX_LONGITUDE: f64 = 180.0;
pub const MAX_LATITUDE: f64 = 90.0;

/// Geospatial query over the scan table.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoQuery {
    AllRows,
    WithinPolygon(String),
    ContainingPoint { longitude: f64, latitude: f64 },
    IntersectingPolygon(String),
    ContainingPolygon(String),
}

/// Returns `value` if it is a finite number within `±bound` degrees.
pub fn check_coordinate(name: &str, value: f64, bound: f64) -> crate::Result<f64> {
    if value.is_finite() && value.abs() <= bound {
        Ok(value)
    } else {
        Err(Error::InvalidQuery(format!(
            "{name} must be between -{bound} and {bound}, got {value}"
        )))
    }
}

impl GeoQuery {
    /// Rejects points that can not be rendered as a geography.
    pub fn validate(&self) -> crate::Result<()> {
        if let GeoQuery::ContainingPoint {
            longitude,
            latitude,
        } = self
        {
            check_coordinate("longitude", *longitude, MAX_LONGITUDE)?;
            check_coordinate("latitude", *latitude, MAX_LATITUDE)?;
        }
        Ok(())
    }

    pub fn to_sql(&self, queries: &GeoQueries) -> String {
        match self {
            GeoQuery::AllRows => queries.all_rows(),
            GeoQuery::WithinPolygon(wkt) => queries.within_polygon(wkt),
            GeoQuery::ContainingPoint {
                longitude,
                latitude,
            } => queries.containing_point(*longitude, *latitude),
            GeoQuery::IntersectingPolygon(wkt) => queries.intersecting_polygon(wkt),
            GeoQuery::ContainingPolygon(wkt) => queries.containing_polygon(wkt),
        }
    }
}

/// Renders the query against the configured table.
pub fn build_query(table: &TableSettings, query: &GeoQuery) -> crate::Result<String> {
    query.validate()?;
    Ok(query.to_sql(&GeoQueries::new(&table.dataset, &table.table)))
}

/// Runs the query and returns the first page of rows.
pub async fn run_query(
    settings: &RowStoreSettings,
    query: &GeoQuery,
) -> crate::Result<Vec<Map<String, Value>>> {
    let sql = build_query(&settings.table_settings(), query)?;
    let client = create_row_store(settings, QUERY_REQUEST_TIMEOUT).await?;
    info!(?query, "Running query");
    Ok(client.query(&sql).await?)
}

/// Lists archived objects under `prefix`, or under the archive prefix when none is given.
pub async fn list_archive(
    settings: &BlobStoreSettings,
    prefix: Option<&str>,
) -> crate::Result<Vec<String>> {
    let client = create_blob_store(settings)?;
    let prefix = prefix.unwrap_or(&settings.archive_prefix);
    Ok(client.list_objects(Some(prefix)).await?)
}

pub async fn read_archive(settings: &BlobStoreSettings, key: &str) -> crate::Result<Bytes> {
    let client = create_blob_store(settings)?;
    Ok(client.get_object(key).await?)
}

#[cfg(test)]
mod tests {
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    use super::*;
    use crate::config::RowStoreAuth;

    fn settings(endpoint: &str) -> RowStoreSettings {
        RowStoreSettings {
            project_id: "proj".to_string(),
            dataset: "scans".to_string(),
            table: "satellite_data".to_string(),
            endpoint: endpoint.to_string(),
            auth: RowStoreAuth::Anonymous,
        }
    }

    #[test]
    fn test_queries_use_configured_table() {
        let settings = TableSettings {
            dataset: "scans".to_string(),
            table: "satellite_data".to_string(),
        };
        let sql = build_query(&settings, &GeoQuery::AllRows).unwrap();
        assert_eq!(sql, "SELECT *\nFROM `scans.satellite_data`;");

        let sql = build_query(
            &settings,
            &GeoQuery::ContainingPoint {
                longitude: -122.4,
                latitude: 37.7,
            },
        )
        .unwrap();
        assert!(sql.contains("ST_GEOGPOINT(-122.4, 37.7)"));
        assert!(sql.ends_with("ORDER BY scan_time DESC;"));

        let wkt = "POLYGON((0 0, 1 0, 1 1, 0 0))";
        for (query, function) in [
            (GeoQuery::WithinPolygon(wkt.to_string()), "ST_WITHIN"),
            (GeoQuery::IntersectingPolygon(wkt.to_string()), "ST_INTERSECTS"),
            (GeoQuery::ContainingPolygon(wkt.to_string()), "ST_CONTAINS"),
        ] {
            let sql = build_query(&settings, &query).unwrap();
            assert!(sql.contains(&format!("WHERE {function}(")), "{sql}");
            assert!(sql.contains(&format!("ST_GEOGFROMTEXT('{wkt}')")), "{sql}");
        }
    }

    #[test]
    fn test_points_outside_the_globe_are_rejected() {
        let settings = TableSettings {
            dataset: "scans".to_string(),
            table: "satellite_data".to_string(),
        };
        for (longitude, latitude) in [
            (f64::NAN, 0.0),
            (0.0, f64::INFINITY),
            (180.5, 10.0),
            (-30.0, -90.1),
        ] {
            let query = GeoQuery::ContainingPoint {
                longitude,
                latitude,
            };
            let err = build_query(&settings, &query).unwrap_err();
            assert!(matches!(err, Error::InvalidQuery(_)), "{err}");
        }

        let edge = GeoQuery::ContainingPoint {
            longitude: -180.0,
            latitude: 90.0,
        };
        assert!(build_query(&settings, &edge).unwrap().contains("ST_GEOGPOINT(-180, 90)"));
    }

    #[tokio::test]
    async fn test_run_query_returns_rows() {
        let router = Router::new().route(
            "/bigquery/v2/projects/proj/queries",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["useLegacySql"], json!(false));
                Json(json!({
                    "jobComplete": true,
                    "schema": { "fields": [{ "name": "id" }, { "name": "sensor_name" }] },
                    "rows": [{ "f": [{ "v": "scan-1" }, { "v": "S2A" }] }]
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let rows = run_query(&settings(&format!("http://{addr}")), &GeoQuery::AllRows)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("scan-1"));
        assert_eq!(rows[0]["sensor_name"], json!("S2A"));
    }

    #[tokio::test]
    async fn test_run_query_rejects_incomplete_settings() {
        let mut settings = settings("http://localhost");
        settings.dataset = String::new();
        let err = run_query(&settings, &GeoQuery::AllRows).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
