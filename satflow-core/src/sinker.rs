//! The [SinkCoordinator] writes a [ProcessedRecord] to every configured sink and reports what
//! happened to each of them in a [DeliveryOutcome].
//!
//! Sinks are called in a fixed order, one after the other:
//!   1. row store (mandatory)
//!   2. blob archive (optional, only when a bucket is configured)
//!   3. republish to the outbound topic (mandatory)
//!
//! A failure never stops the remaining sinks from being attempted. The delivery is acked only if
//! every mandatory sink succeeded; a failed archive write is recorded and counted, but on its own
//! does not cause a redelivery.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::Error;
use crate::message::ProcessedRecord;
use crate::metrics::{pipeline_metrics, sink_labels};
use crate::typ::PipelineTypeConfig;

mod blob_store;
mod publisher;
mod row_store;

/// Streaming insert of single rows into a structured table.
#[trait_variant::make(RowStore: Send)]
#[allow(dead_code)]
pub trait LocalRowStore {
    /// Inserts one row. Returns the per-row errors reported by the store, empty on success.
    async fn insert_row(&self, insert_id: &str, row: Value) -> crate::Result<Vec<String>>;
}

/// Named-object storage used for the archive.
#[trait_variant::make(BlobStore: Send)]
#[allow(dead_code)]
pub trait LocalBlobStore {
    /// Stores `content` under `key`, overwriting an existing object.
    async fn put_object(&self, key: &str, content: Bytes) -> crate::Result<()>;
}

/// Outbound topic.
#[trait_variant::make(Publisher: Send)]
#[allow(dead_code)]
pub trait LocalPublisher {
    /// Publishes and waits for the confirmation. Returns the id assigned by the topic.
    async fn publish(&self, payload: Bytes) -> crate::Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    RowStore,
    BlobStore,
    Publish,
}

impl SinkKind {
    /// A failed mandatory sink forces the delivery to be nacked.
    pub fn is_mandatory(&self) -> bool {
        match self {
            SinkKind::RowStore | SinkKind::Publish => true,
            SinkKind::BlobStore => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::RowStore => "row_store",
            SinkKind::BlobStore => "blob_store",
            SinkKind::Publish => "publish",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkStatus {
    Success,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOutcome {
    pub kind: SinkKind,
    pub status: SinkStatus,
}

impl SinkOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, SinkStatus::Success)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Ack,
    Nack,
}

/// The ordered sink results of one delivery and the decision derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub outcomes: Vec<SinkOutcome>,
    pub decision: Decision,
}

impl DeliveryOutcome {
    pub fn from_outcomes(outcomes: Vec<SinkOutcome>) -> Self {
        let mandatory_ok = outcomes
            .iter()
            .filter(|outcome| outcome.kind.is_mandatory())
            .all(SinkOutcome::is_success);
        DeliveryOutcome {
            outcomes,
            decision: if mandatory_ok {
                Decision::Ack
            } else {
                Decision::Nack
            },
        }
    }

    pub fn outcome(&self, kind: SinkKind) -> Option<&SinkOutcome> {
        self.outcomes.iter().find(|outcome| outcome.kind == kind)
    }

    pub fn failures(&self) -> impl Iterator<Item = &SinkOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_success())
    }
}

/// Object key of the archived copy. Depends only on the message id, so a redelivered message
/// overwrites its earlier copy.
pub fn archive_key(prefix: &str, message_id: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{message_id}.txt")
    } else {
        format!("{prefix}/{message_id}.txt")
    }
}

/// Archive destination, present only when blob storage is configured.
pub struct Archive<B> {
    pub store: B,
    pub prefix: String,
}

pub struct SinkCoordinator<C: PipelineTypeConfig> {
    row_store: C::RowStore,
    archive: Option<Archive<C::BlobStore>>,
    publisher: C::Publisher,
    timeout: Duration,
}

impl<C: PipelineTypeConfig> SinkCoordinator<C> {
    pub fn new(
        row_store: C::RowStore,
        archive: Option<Archive<C::BlobStore>>,
        publisher: C::Publisher,
        timeout: Duration,
    ) -> Self {
        Self {
            row_store,
            archive,
            publisher,
            timeout,
        }
    }

    /// Writes the record to every sink, in order, and decides whether the delivery can be acked.
    pub async fn persist(&self, record: &ProcessedRecord) -> DeliveryOutcome {
        let mut outcomes = Vec::with_capacity(3);

        let row = json!({ "message": record.content });
        outcomes.push(
            self.call(SinkKind::RowStore, &record.message_id, async {
                let row_errors =
                    RowStore::insert_row(&self.row_store, &record.message_id, row).await?;
                if row_errors.is_empty() {
                    Ok(())
                } else {
                    Err(Error::RowStore(row_errors.join("; ")))
                }
            })
            .await,
        );

        if let Some(archive) = &self.archive {
            let key = archive_key(&archive.prefix, &record.message_id);
            let content = Bytes::from(record.content.clone());
            outcomes.push(
                self.call(SinkKind::BlobStore, &record.message_id, async {
                    BlobStore::put_object(&archive.store, &key, content).await
                })
                .await,
            );
        }

        let payload = Bytes::from(record.content.clone());
        outcomes.push(
            self.call(SinkKind::Publish, &record.message_id, async {
                Publisher::publish(&self.publisher, payload)
                    .await
                    .map(|published_id| {
                        debug!(message_id = %record.message_id, %published_id, "Republished");
                    })
            })
            .await,
        );

        DeliveryOutcome::from_outcomes(outcomes)
    }

    /// Runs one sink call under the timeout and turns its result into a [SinkOutcome].
    async fn call<F>(&self, kind: SinkKind, message_id: &str, write: F) -> SinkOutcome
    where
        F: Future<Output = crate::Result<()>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "{kind} did not complete within {:?}",
                self.timeout
            ))),
        };

        let labels = sink_labels(kind.as_str());
        let metrics = pipeline_metrics();
        metrics.sink.write.get_or_create(&labels).inc();
        metrics
            .sink
            .time
            .get_or_create(&labels)
            .observe(start.elapsed().as_micros() as f64);

        let status = match result {
            Ok(()) => SinkStatus::Success,
            Err(e) => {
                metrics.sink.failure.get_or_create(&labels).inc();
                if kind.is_mandatory() {
                    error!(message_id, sink = %kind, error = %e, "Mandatory sink write failed");
                } else {
                    warn!(message_id, sink = %kind, error = %e, "Optional sink write failed");
                }
                SinkStatus::Failed(e.to_string())
            }
        };
        SinkOutcome { kind, status }
    }
}
