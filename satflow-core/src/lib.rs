//! satflow moves messages from a Pub/Sub subscription into BigQuery, an optional GCS archive and
//! a response topic, with at-least-once delivery:
//! - the [pipeline::run] entrypoint pulls deliveries through the [supervisor::PipelineSupervisor]
//! - each delivery is processed and written to every sink by the [delivery::DeliveryController]
//! - it is acked only when the row store and the response topic both accepted it, otherwise
//!   nacked for redelivery
mod error;
pub use crate::error::{Error, Result};

/// Settings loaded once from the environment.
pub mod config;

pub mod adhoc;
pub mod delivery;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod processor;
pub mod sinker;
pub mod source;
pub mod supervisor;
pub mod typ;

mod shared;
