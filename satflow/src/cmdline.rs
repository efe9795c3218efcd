use clap::{Arg, ArgAction, ArgMatches, Command};
use satflow_core::adhoc::{self, GeoQuery};

pub(super) const QUERY_ALL: &str = "all";
pub(super) const QUERY_WITHIN: &str = "within";
pub(super) const QUERY_CONTAINS_POINT: &str = "contains-point";
pub(super) const QUERY_INTERSECTS: &str = "intersects";
pub(super) const QUERY_CONTAINS: &str = "contains";

pub(super) fn root_cli() -> Command {
    Command::new("satflow")
        .author("satflow authors")
        .about("Moves satellite scan messages from Pub/Sub into BigQuery, GCS and a response topic")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(add_run_subcommand())
        .subcommand(add_query_subcommand())
        .subcommand(add_archive_subcommand())
}

fn add_run_subcommand() -> Command {
    Command::new("run").about("Runs the pipeline until SIGINT/SIGTERM")
}

fn add_query_subcommand() -> Command {
    Command::new("query")
        .about("Builds a geospatial query over the scan table and runs it")
        .arg(
            Arg::new("kind")
                .help("Kind of query")
                .required(true)
                .value_parser([
                    QUERY_ALL,
                    QUERY_WITHIN,
                    QUERY_CONTAINS_POINT,
                    QUERY_INTERSECTS,
                    QUERY_CONTAINS,
                ]),
        )
        .arg(
            Arg::new("wkt")
                .long("wkt")
                .help("Polygon in WKT, e.g. 'POLYGON((0 0, 1 0, 1 1, 0 0))'")
                .action(ArgAction::Set)
                .required_if_eq_any([
                    ("kind", QUERY_WITHIN),
                    ("kind", QUERY_INTERSECTS),
                    ("kind", QUERY_CONTAINS),
                ]),
        )
        .arg(
            Arg::new("lon")
                .long("lon")
                .help("Longitude of the point")
                .action(ArgAction::Set)
                .allow_negative_numbers(true)
                .value_parser(longitude)
                .required_if_eq("kind", QUERY_CONTAINS_POINT),
        )
        .arg(
            Arg::new("lat")
                .long("lat")
                .help("Latitude of the point")
                .action(ArgAction::Set)
                .allow_negative_numbers(true)
                .value_parser(latitude)
                .required_if_eq("kind", QUERY_CONTAINS_POINT),
        )
        .arg(
            Arg::new("print-only")
                .long("print-only")
                .help("Print the SQL instead of running it")
                .action(ArgAction::SetTrue),
        )
}

fn parse_coordinate(value: &str, name: &str, bound: f64) -> Result<f64, String> {
    let value: f64 = value.parse().map_err(|e| format!("{e}"))?;
    adhoc::check_coordinate(name, value, bound).map_err(|e| e.to_string())
}

fn longitude(value: &str) -> Result<f64, String> {
    parse_coordinate(value, "longitude", adhoc::MAX_LONGITUDE)
}

fn latitude(value: &str) -> Result<f64, String> {
    parse_coordinate(value, "latitude", adhoc::MAX_LATITUDE)
}

fn add_archive_subcommand() -> Command {
    Command::new("archive")
        .about("Reads the archive bucket")
        .subcommand_required(true)
        .subcommand(
            Command::new("list").about("Lists archived objects").arg(
                Arg::new("prefix")
                    .long("prefix")
                    .help("Key prefix, defaults to the archive prefix")
                    .action(ArgAction::Set),
            ),
        )
        .subcommand(
            Command::new("get")
                .about("Writes an archived object to stdout")
                .arg(Arg::new("key").help("Object key").required(true)),
        )
}

/// Turns the `query` arguments into a [GeoQuery].
pub(super) fn geo_query(args: &ArgMatches) -> Result<GeoQuery, String> {
    let kind = args
        .get_one::<String>("kind")
        .ok_or("query kind is required")?;
    let wkt = || {
        args.get_one::<String>("wkt")
            .cloned()
            .ok_or_else(|| format!("--wkt is required for '{kind}'"))
    };
    let coordinate = |name: &str| {
        args.get_one::<f64>(name)
            .copied()
            .ok_or_else(|| format!("--{name} is required for '{kind}'"))
    };

    match kind.as_str() {
        QUERY_ALL => Ok(GeoQuery::AllRows),
        QUERY_WITHIN => Ok(GeoQuery::WithinPolygon(wkt()?)),
        QUERY_CONTAINS_POINT => Ok(GeoQuery::ContainingPoint {
            longitude: coordinate("lon")?,
            latitude: coordinate("lat")?,
        }),
        QUERY_INTERSECTS => Ok(GeoQuery::IntersectingPolygon(wkt()?)),
        QUERY_CONTAINS => Ok(GeoQuery::ContainingPolygon(wkt()?)),
        other => Err(format!("unknown query kind '{other}'")),
    }
}
