//! Wires the Pub/Sub subscription, the sinks and the metrics server together and runs the
//! [PipelineSupervisor] until SIGINT/SIGTERM.

use std::net::SocketAddr;

use satflow_pubsub::publisher::PubSubPublisher;
use satflow_pubsub::source::{PubSubSource, PubSubSourceConfig};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Settings;
use crate::delivery::DeliveryController;
use crate::metrics::{HealthState, start_metrics_https_server};
use crate::processor::Processor;
use crate::shared::create_components::create_sink_coordinator;
use crate::supervisor::{PipelineSupervisor, SupervisorStats};

/// Runs the pipeline until a shutdown signal is received and every in-flight delivery is settled.
/// Fails only if the pipeline could not be started.
pub async fn run(settings: Settings) -> crate::Result<SupervisorStats> {
    let cln_token = CancellationToken::new();
    let shutdown_cln_token = cln_token.clone();

    // wait for SIG{INT,TERM} and invoke cancellation token.
    let shutdown_handle: JoinHandle<()> = tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_cln_token.cancel();
    });

    let result = start(settings, cln_token).await;
    if !shutdown_handle.is_finished() {
        shutdown_handle.abort();
    }

    match &result {
        Ok(stats) => info!(?stats, "Gracefully Exiting..."),
        Err(e) => error!(error = %e, "Pipeline failed to start"),
    }
    result
}

async fn start(settings: Settings, cln_token: CancellationToken) -> crate::Result<SupervisorStats> {
    info!(?settings, "Starting pipeline");

    let client = satflow_pubsub::create_client(&settings.pubsub.client_config()).await?;
    let source = PubSubSource::connect(
        &client,
        PubSubSourceConfig {
            subscription: settings.pubsub.subscription.clone(),
        },
    )
    .await?;
    let mut publisher = PubSubPublisher::connect(&client, &settings.pubsub.response_topic).await?;

    let coordinator = create_sink_coordinator(&settings, publisher.clone()).await?;
    let controller =
        DeliveryController::new(Processor::new(settings.processed_prefix.clone()), coordinator);

    let health = HealthState::default();
    let metrics_cln_token = CancellationToken::new();
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], settings.metrics_port));
    let metrics_handle = tokio::spawn({
        let health = health.clone();
        let metrics_cln_token = metrics_cln_token.clone();
        async move {
            if let Err(e) = start_metrics_https_server(metrics_addr, health, metrics_cln_token).await
            {
                error!(error = %e, "Metrics server failed");
            }
        }
    });

    let supervisor = PipelineSupervisor::new(controller, settings.max_in_flight, health);
    let stats = supervisor.run(source, cln_token).await;

    // deliveries are drained, nothing publishes anymore
    publisher.shutdown().await;
    info!(topic = %publisher.topic(), "Response publisher flushed");
    metrics_cln_token.cancel();
    if let Err(e) = metrics_handle.await {
        error!(error = %e, "Metrics server task failed");
    }

    stats
}

/// Resolves once SIGINT or SIGTERM is received.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        info!("Received Ctrl+C signal");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
        info!("Received terminate signal");
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
