//! The [DeliveryController] drives one [InboundMessage] through
//! `Received -> Processed -> Sinked -> {Acked, Nacked}` and settles it exactly once.
//!
//! A processing failure skips the sinks and nacks. A panic anywhere in processing or sinking is
//! caught here and nacks as well, so a delivery is never left without a settlement.

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::message::{InboundMessage, Receipt};
use crate::metrics::{ack_error_labels, nack_labels, no_labels, pipeline_metrics};
use crate::processor::{ProcessingError, Processor};
use crate::sinker::{Decision, DeliveryOutcome, SinkCoordinator};
use crate::typ::PipelineTypeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    Processed,
    Sinked,
    Acked,
    Nacked,
}

/// Why a delivery was nacked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    Processing,
    Sink,
    Panic,
}

impl NackReason {
    fn as_str(&self) -> &'static str {
        match self {
            NackReason::Processing => "processing",
            NackReason::Sink => "sink",
            NackReason::Panic => "panic",
        }
    }
}

/// What happened to a single delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub message_id: String,
    /// States visited, in order. Always ends in [DeliveryState::Acked] or [DeliveryState::Nacked].
    pub path: Vec<DeliveryState>,
    pub nack_reason: Option<NackReason>,
    /// Sink results, absent when the sinks were never reached.
    pub outcome: Option<DeliveryOutcome>,
    /// Set when the ack/nack call itself failed. The source redelivers in that case.
    pub settle_error: Option<String>,
}

impl DeliveryReport {
    pub fn decision(&self) -> Decision {
        if self.nack_reason.is_some() {
            Decision::Nack
        } else {
            Decision::Ack
        }
    }
}

/// Result of the part of a delivery that runs isolated from the controller.
enum Stage {
    Rejected(ProcessingError),
    Sinked(DeliveryOutcome),
}

#[derive(Clone)]
pub struct DeliveryController<C: PipelineTypeConfig> {
    processor: Arc<Processor>,
    coordinator: Arc<SinkCoordinator<C>>,
}

impl<C: PipelineTypeConfig> DeliveryController<C> {
    pub fn new(processor: Processor, coordinator: SinkCoordinator<C>) -> Self {
        Self {
            processor: Arc::new(processor),
            coordinator: Arc::new(coordinator),
        }
    }

    /// Handles one delivery to completion, including its ack or nack.
    pub async fn handle(&self, message: InboundMessage) -> DeliveryReport {
        let start = Instant::now();
        let metrics = pipeline_metrics();
        metrics.received.get_or_create(&no_labels()).inc();
        metrics.in_flight.get_or_create(&no_labels()).inc();

        let InboundMessage {
            id,
            payload,
            delivery_attempt,
            receipt,
            ..
        } = message;

        if let Some(attempt) = delivery_attempt.filter(|attempt| *attempt > 1) {
            info!(message_id = %id, delivery_attempt = attempt, "Handling redelivered message");
        }

        let mut report = DeliveryReport {
            message_id: id.clone(),
            path: vec![DeliveryState::Received],
            nack_reason: None,
            outcome: None,
            settle_error: None,
        };

        match self.run_stages(id, payload).await {
            Ok(Stage::Rejected(e)) => {
                metrics.processing_error.get_or_create(&no_labels()).inc();
                warn!(message_id = %report.message_id, error = %e, "Processing failed, skipping sinks");
                report.nack_reason = Some(NackReason::Processing);
            }
            Ok(Stage::Sinked(outcome)) => {
                report.path.push(DeliveryState::Processed);
                report.path.push(DeliveryState::Sinked);
                if outcome.decision == Decision::Nack {
                    report.nack_reason = Some(NackReason::Sink);
                }
                report.outcome = Some(outcome);
            }
            Err(e) => {
                error!(message_id = %report.message_id, error = %e, "Delivery panicked");
                report.nack_reason = Some(NackReason::Panic);
            }
        }

        settle(receipt, &mut report).await;

        metrics.in_flight.get_or_create(&no_labels()).dec();
        metrics
            .delivery_time
            .get_or_create(&no_labels())
            .observe(start.elapsed().as_micros() as f64);
        report
    }

    /// Runs processing and sinking on a separate task so that a panic surfaces as an error
    /// instead of unwinding through the controller.
    async fn run_stages(
        &self,
        id: String,
        payload: Bytes,
    ) -> Result<Stage, tokio::task::JoinError> {
        let processor = Arc::clone(&self.processor);
        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            let record = match processor.process(&id, &payload) {
                Ok(record) => record,
                Err(e) => return Stage::Rejected(e),
            };
            debug!(message_id = %id, content = %record.content, "Processed message");
            Stage::Sinked(coordinator.persist(&record).await)
        })
        .await
    }
}

/// Issues the ack or nack matching the report and records it.
async fn settle(receipt: Receipt, report: &mut DeliveryReport) {
    let metrics = pipeline_metrics();
    let (result, kind) = match report.nack_reason {
        None => (receipt.ack().await, "ack"),
        Some(_) => (receipt.nack().await, "nack"),
    };

    match report.nack_reason {
        None => {
            report.path.push(DeliveryState::Acked);
            metrics.ack.get_or_create(&no_labels()).inc();
            debug!(message_id = %report.message_id, decision = "ack", "Delivery settled");
        }
        Some(reason) => {
            report.path.push(DeliveryState::Nacked);
            metrics
                .nack
                .get_or_create(&nack_labels(reason.as_str()))
                .inc();
            info!(
                message_id = %report.message_id,
                decision = "nack",
                reason = reason.as_str(),
                "Delivery settled"
            );
        }
    }

    if let Err(e) = result {
        metrics.ack_error.get_or_create(&ack_error_labels(kind)).inc();
        error!(message_id = %report.message_id, kind, error = %e, "Settling delivery failed");
        report.settle_error = Some(e.to_string());
    }
}
