use satflow_bigquery::{BigQueryClient, Credentials};
use satflow_gcs::{GcsClient, GcsConfig};
use satflow_pubsub::publisher::PubSubPublisher;

use crate::Error;
use crate::config::{BlobStoreSettings, RowStoreAuth, RowStoreSettings, Settings};
use crate::sinker::{Archive, SinkCoordinator};
use crate::typ::GcpPipeline;

/// Creates the row store client. Requests are bounded by the sink timeout. Credentials are
/// resolved here so a pipeline without usable credentials never starts pulling.
pub(crate) async fn create_row_store(
    settings: &RowStoreSettings,
    sink_timeout: std::time::Duration,
) -> crate::Result<BigQueryClient> {
    let credentials = match &settings.auth {
        RowStoreAuth::ApplicationDefault => Credentials::application_default()
            .await
            .map_err(startup_error)?,
        RowStoreAuth::AccessToken(token) => Credentials::AccessToken(token.clone()),
        RowStoreAuth::Anonymous => Credentials::Anonymous,
    };
    Ok(BigQueryClient::new(
        settings.client_config(sink_timeout),
        credentials,
    )?)
}

fn startup_error(err: satflow_bigquery::Error) -> Error {
    Error::Config(format!("no usable BigQuery credentials: {err}"))
}

pub(crate) fn create_blob_store(settings: &BlobStoreSettings) -> crate::Result<GcsClient> {
    Ok(GcsClient::connect(&GcsConfig {
        bucket: settings.bucket.clone(),
    })?)
}

/// Creates the sink coordinator, archiving only when a bucket is configured.
pub(crate) async fn create_sink_coordinator(
    settings: &Settings,
    publisher: PubSubPublisher,
) -> crate::Result<SinkCoordinator<GcpPipeline>> {
    let row_store = create_row_store(&settings.row_store, settings.sink_timeout).await?;

    let archive = settings
        .blob_store
        .as_ref()
        .map(|blob_store| {
            create_blob_store(blob_store).map(|store| Archive {
                store,
                prefix: blob_store.archive_prefix.clone(),
            })
        })
        .transpose()?;

    Ok(SinkCoordinator::new(
        row_store,
        archive,
        publisher,
        settings.sink_timeout,
    ))
}
