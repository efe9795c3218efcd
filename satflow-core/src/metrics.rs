use std::iter;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Response, StatusCode};
use axum::response::IntoResponse;
use axum::{Router, routing::get};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use rcgen::{CertifiedKey, generate_simple_self_signed};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::Error;

// The top-level metric registry is created with the GLOBAL_PREFIX
const GLOBAL_PREFIX: &str = "satflow";

const SINK_LABEL: &str = "sink";
const REASON_LABEL: &str = "reason";
const KIND_LABEL: &str = "kind";

// Note: We do not add a suffix to the metric name, as the suffix is inferred through the metric type
// by the prometheus client library
// refer: https://github.com/prometheus/client_rust/blob/master/src/registry.rs#L102

// counters
const DELIVERY_RECEIVED: &str = "delivery_received";
const DELIVERY_ACK: &str = "delivery_ack";
const DELIVERY_NACK: &str = "delivery_nack";
const PROCESSING_ERROR: &str = "processing_error";
const SINK_WRITE: &str = "sink_write";
const SINK_FAILURE: &str = "sink_failure";
const ACK_ERROR: &str = "ack_error";

// gauge
const DELIVERY_IN_FLIGHT: &str = "delivery_in_flight";

// timers
const DELIVERY_TIME: &str = "delivery_time";
const SINK_TIME: &str = "sink_time";

/// The global register of all metrics.
#[derive(Default)]
struct GlobalRegistry {
    // It is okay to use std mutex because we register each metric only one time.
    registry: parking_lot::Mutex<Registry>,
}

impl GlobalRegistry {
    fn new() -> Self {
        GlobalRegistry {
            registry: parking_lot::Mutex::new(Registry::default()),
        }
    }
}

/// GLOBAL_REGISTRY is the static global registry which is initialized only once.
static GLOBAL_REGISTRY: OnceLock<GlobalRegistry> = OnceLock::new();

fn global_registry() -> &'static GlobalRegistry {
    GLOBAL_REGISTRY.get_or_init(GlobalRegistry::new)
}

/// Metrics of the delivery pipeline. Each metric is a family, differentiated by the label values
/// assigned at the call site.
pub(crate) struct PipelineMetrics {
    pub(crate) received: Family<Vec<(String, String)>, Counter>,
    pub(crate) ack: Family<Vec<(String, String)>, Counter>,
    pub(crate) nack: Family<Vec<(String, String)>, Counter>,
    pub(crate) processing_error: Family<Vec<(String, String)>, Counter>,
    pub(crate) ack_error: Family<Vec<(String, String)>, Counter>,
    pub(crate) in_flight: Family<Vec<(String, String)>, Gauge>,
    pub(crate) delivery_time: Family<Vec<(String, String)>, Histogram>,
    pub(crate) sink: SinkMetrics,
}

/// Family of metrics for the sinks
pub(crate) struct SinkMetrics {
    pub(crate) write: Family<Vec<(String, String)>, Counter>,
    pub(crate) failure: Family<Vec<(String, String)>, Counter>,
    pub(crate) time: Family<Vec<(String, String)>, Histogram>,
}

/// Exponential bucket distribution with range.
/// Creates `length` buckets, where the lowest bucket is `min` and the highest bucket is `max`.
/// The final +Inf bucket is not counted and not included in the returned iterator.
/// The function panics if `length` is 0 or negative, or if `min` is 0 or negative.
fn exponential_buckets_range(min: f64, max: f64, length: u16) -> impl Iterator<Item = f64> {
    if length < 1 {
        panic!("ExponentialBucketsRange length needs a positive length");
    }
    if min <= 0.0 {
        panic!("ExponentialBucketsRange min needs to be greater than 0");
    }

    // We know max/min and highest bucket. Solve for growth_factor.
    let growth_factor = (max / min).powf(1.0 / (length as f64 - 1.0));

    iter::repeat(())
        .enumerate()
        .map(move |(i, _)| min * growth_factor.powf(i as f64))
        .take(length.into())
}

// exponential buckets in the range 100 microseconds to 5 minutes
fn latency_histogram() -> Histogram {
    Histogram::new(exponential_buckets_range(100.0, 60_000_000.0 * 5.0, 10))
}

impl PipelineMetrics {
    fn new() -> Self {
        let metrics = Self {
            received: Family::<Vec<(String, String)>, Counter>::default(),
            ack: Family::<Vec<(String, String)>, Counter>::default(),
            nack: Family::<Vec<(String, String)>, Counter>::default(),
            processing_error: Family::<Vec<(String, String)>, Counter>::default(),
            ack_error: Family::<Vec<(String, String)>, Counter>::default(),
            in_flight: Family::<Vec<(String, String)>, Gauge>::default(),
            delivery_time: Family::<Vec<(String, String)>, Histogram>::new_with_constructor(
                latency_histogram,
            ),
            sink: SinkMetrics {
                write: Family::<Vec<(String, String)>, Counter>::default(),
                failure: Family::<Vec<(String, String)>, Counter>::default(),
                time: Family::<Vec<(String, String)>, Histogram>::new_with_constructor(
                    latency_histogram,
                ),
            },
        };

        let mut registry = global_registry().registry.lock();
        let registry = registry.sub_registry_with_prefix(GLOBAL_PREFIX);
        registry.register(
            DELIVERY_RECEIVED,
            "A Counter to keep track of the total number of messages received from the source",
            metrics.received.clone(),
        );
        registry.register(
            DELIVERY_ACK,
            "A Counter to keep track of the total number of deliveries that were acknowledged",
            metrics.ack.clone(),
        );
        registry.register(
            DELIVERY_NACK,
            "A Counter to keep track of the total number of deliveries that were negatively acknowledged",
            metrics.nack.clone(),
        );
        registry.register(
            PROCESSING_ERROR,
            "A Counter to keep track of the total number of payloads the processor rejected",
            metrics.processing_error.clone(),
        );
        registry.register(
            ACK_ERROR,
            "A Counter to keep track of the failed ack/nack calls to the source",
            metrics.ack_error.clone(),
        );
        registry.register(
            DELIVERY_IN_FLIGHT,
            "A Gauge to keep track of the deliveries currently being handled",
            metrics.in_flight.clone(),
        );
        registry.register(
            DELIVERY_TIME,
            "A Histogram to keep track of the time taken from receipt to settlement, in microseconds",
            metrics.delivery_time.clone(),
        );
        registry.register(
            SINK_WRITE,
            "A Counter to keep track of the total number of sink writes attempted",
            metrics.sink.write.clone(),
        );
        registry.register(
            SINK_FAILURE,
            "A Counter to keep track of the total number of failed sink writes",
            metrics.sink.failure.clone(),
        );
        registry.register(
            SINK_TIME,
            "A Histogram to keep track of the time taken by each sink write, in microseconds",
            metrics.sink.time.clone(),
        );
        metrics
    }
}

/// PIPELINE_METRICS is the PipelineMetrics object which stores the metrics
static PIPELINE_METRICS: OnceLock<PipelineMetrics> = OnceLock::new();

pub(crate) fn pipeline_metrics() -> &'static PipelineMetrics {
    PIPELINE_METRICS.get_or_init(PipelineMetrics::new)
}

pub(crate) fn no_labels() -> Vec<(String, String)> {
    Vec::new()
}

pub(crate) fn sink_labels(sink: &str) -> Vec<(String, String)> {
    vec![(SINK_LABEL.to_string(), sink.to_string())]
}

pub(crate) fn nack_labels(reason: &str) -> Vec<(String, String)> {
    vec![(REASON_LABEL.to_string(), reason.to_string())]
}

pub(crate) fn ack_error_labels(kind: &str) -> Vec<(String, String)> {
    vec![(KIND_LABEL.to_string(), kind.to_string())]
}

/// Whether the supervisor is currently accepting deliveries. Backs the `/readyz` endpoint.
#[derive(Clone, Default, Debug)]
pub struct HealthState {
    listening: Arc<AtomicBool>,
}

impl HealthState {
    pub(crate) fn set_listening(&self, listening: bool) {
        self.listening.store(listening, Ordering::Relaxed);
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Relaxed)
    }
}

// metrics_handler is used to generate and return a snapshot of the
// current state of the metrics in the global registry
pub async fn metrics_handler() -> impl IntoResponse {
    let state = global_registry().registry.lock();
    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &state) {
        error!(?e, "Encoding metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    debug!("Exposing metrics: {:?}", buffer);
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        Body::from(buffer),
    )
        .into_response()
}

/// Serves `/metrics`, `/livez` and `/readyz` over HTTPS with a self-signed certificate until the
/// token is cancelled.
pub async fn start_metrics_https_server(
    addr: SocketAddr,
    health: HealthState,
    cln_token: CancellationToken,
) -> crate::Result<()> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    // Generate a self-signed certificate
    let CertifiedKey { cert, signing_key } = generate_simple_self_signed(vec!["localhost".into()])
        .map_err(|e| Error::Metrics(format!("Generating self-signed certificate: {e}")))?;

    let tls_config = RustlsConfig::from_pem(cert.pem().into(), signing_key.serialize_pem().into())
        .await
        .map_err(|e| Error::Metrics(format!("Creating tlsConfig from pem: {e}")))?;

    let handle = Handle::new();
    tokio::spawn({
        let handle = handle.clone();
        async move {
            cln_token.cancelled().await;
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        }
    });

    info!(?addr, "Starting metrics server");
    axum_server::bind_rustls(addr, tls_config)
        .handle(handle)
        .serve(metrics_router(health).into_make_service())
        .await
        .map_err(|e| Error::Metrics(format!("Starting web server for metrics: {e}")))?;

    Ok(())
}

/// router for metrics and health endpoints
fn metrics_router(health: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/livez", get(livez))
        .route("/readyz", get(readyz))
        .with_state(health)
}

async fn livez() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

async fn readyz(State(health): State<HealthState>) -> impl IntoResponse {
    if health.is_listening() {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
