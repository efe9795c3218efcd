//! Type configuration trait for the sinks of a pipeline.

use satflow_bigquery::BigQueryClient;
use satflow_gcs::GcsClient;
use satflow_pubsub::publisher::PubSubPublisher;

use crate::sinker::{BlobStore, Publisher, RowStore};

pub trait PipelineTypeConfig: Send + Sync + Clone + 'static {
    type RowStore: RowStore + Clone + Sync + 'static;
    type BlobStore: BlobStore + Clone + Sync + 'static;
    type Publisher: Publisher + Clone + Sync + 'static;
}

/// BigQuery rows, GCS archive and a Pub/Sub response topic.
#[derive(Clone)]
pub struct GcpPipeline {}
impl PipelineTypeConfig for GcpPipeline {
    type RowStore = BigQueryClient;
    type BlobStore = GcsClient;
    type Publisher = PubSubPublisher;
}
