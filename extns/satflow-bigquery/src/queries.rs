//! Read-only geospatial query templates over the scan table. The table is expected to carry a
//! `GEOGRAPHY` column named `geo_location` holding the footprint polygon of each scan.

const SCAN_COLUMNS: &str = "id, scan_time, sensor_name, sensor_type, geo_location, storage_location";

/// Query builders bound to one `dataset.table`.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoQueries {
    table_ref: String,
}

impl GeoQueries {
    pub fn new(dataset: &str, table: &str) -> Self {
        Self {
            table_ref: format!("`{dataset}.{table}`"),
        }
    }

    pub fn all_rows(&self) -> String {
        format!("SELECT *\nFROM {};", self.table_ref)
    }

    /// Scans whose footprint lies within `polygon_wkt`.
    pub fn within_polygon(&self, polygon_wkt: &str) -> String {
        self.polygon_predicate("ST_WITHIN", polygon_wkt)
    }

    /// Scans whose footprint contains the point, newest first. The coordinates must be finite,
    /// callers range-check them.
    pub fn containing_point(&self, longitude: f64, latitude: f64) -> String {
        format!(
            "SELECT id, scan_time, sensor_name, sensor_type, ST_ASTEXT(geo_location) as polygon_wkt, storage_location, raw_data\n\
             FROM {}\n\
             WHERE ST_CONTAINS(\n    geo_location,\n    ST_GEOGPOINT({longitude}, {latitude})\n)\n\
             ORDER BY scan_time DESC;",
            self.table_ref
        )
    }

    pub fn intersecting_polygon(&self, polygon_wkt: &str) -> String {
        self.polygon_predicate("ST_INTERSECTS", polygon_wkt)
    }

    /// Scans whose footprint fully contains `polygon_wkt`.
    pub fn containing_polygon(&self, polygon_wkt: &str) -> String {
        self.polygon_predicate("ST_CONTAINS", polygon_wkt)
    }

    fn polygon_predicate(&self, function: &str, polygon_wkt: &str) -> String {
        format!(
            "SELECT {SCAN_COLUMNS}\n\
             FROM {}\n\
             WHERE {function}(\n    geo_location,\n    ST_GEOGFROMTEXT('{}')\n);",
            self.table_ref,
            escape_literal(polygon_wkt)
        )
    }
}

/// Escapes a value for use inside a single-quoted standard-SQL string literal.
fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            _ => escaped.push(c),
        }
    }
    escaped
}
