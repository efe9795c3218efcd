//! The [PipelineSupervisor] pulls deliveries from a [MessageSource] and hands each to the
//! [DeliveryController] on its own task.
//!
//! At most `max_in_flight` deliveries run at once; once the limit is reached the supervisor stops
//! pulling until a delivery settles. On cancellation it stops pulling, closes the source and waits
//! for every in-flight delivery to be acked or nacked before returning.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::Error;
use crate::delivery::{DeliveryController, DeliveryReport};
use crate::metrics::HealthState;
use crate::sinker::Decision;
use crate::source::MessageSource;
use crate::typ::PipelineTypeConfig;

/// Counters of one supervisor run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorStats {
    pub received: usize,
    pub acked: usize,
    pub nacked: usize,
    pub source_errors: usize,
}

impl SupervisorStats {
    fn record(&mut self, result: Result<DeliveryReport, JoinError>) {
        match result {
            Ok(report) => match report.decision() {
                Decision::Ack => self.acked += 1,
                Decision::Nack => self.nacked += 1,
            },
            // the receipt is dropped with the task, the source redelivers after its deadline
            Err(e) => error!(error = %e, "Delivery task failed before settling"),
        }
    }
}

pub struct PipelineSupervisor<C: PipelineTypeConfig> {
    controller: DeliveryController<C>,
    max_in_flight: usize,
    health: HealthState,
}

impl<C: PipelineTypeConfig> PipelineSupervisor<C> {
    pub fn new(
        controller: DeliveryController<C>,
        max_in_flight: usize,
        health: HealthState,
    ) -> Self {
        Self {
            controller,
            max_in_flight,
            health,
        }
    }

    /// Runs until the token is cancelled or the source ends, then drains in-flight deliveries.
    pub async fn run<S: MessageSource>(
        self,
        mut source: S,
        cln_token: CancellationToken,
    ) -> crate::Result<SupervisorStats> {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks: JoinSet<DeliveryReport> = JoinSet::new();
        let mut stats = SupervisorStats::default();

        self.health.set_listening(true);
        info!(max_in_flight = self.max_in_flight, "Pipeline supervisor started");

        loop {
            while let Some(result) = tasks.try_join_next() {
                stats.record(result);
            }

            let permit = tokio::select! {
                biased;
                _ = cln_token.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => permit
                    .map_err(|e| Error::Delivery(format!("in-flight limiter closed: {e}")))?,
            };

            let next = tokio::select! {
                biased;
                _ = cln_token.cancelled() => break,
                next = source.recv() => next,
            };

            match next {
                None => {
                    info!("Source ended");
                    break;
                }
                Some(Err(e)) => {
                    stats.source_errors += 1;
                    error!(error = %e, "Failed to receive from source");
                }
                Some(Ok(message)) => {
                    stats.received += 1;
                    let controller = self.controller.clone();
                    tasks.spawn(async move {
                        let report = controller.handle(message).await;
                        drop(permit);
                        report
                    });
                }
            }
        }

        self.health.set_listening(false);
        source.close().await;
        info!(
            in_flight = tasks.len(),
            "Stopped accepting deliveries, draining in-flight deliveries"
        );
        while let Some(result) = tasks.join_next().await {
            stats.record(result);
        }

        info!(?stats, "Pipeline supervisor stopped");
        Ok(stats)
    }
}
