//! # Bus Errors
//!
//! Error taxonomy shared by every bus variant.

use crate::lifecycle::BusState;
use thiserror::Error;

/// Errors surfaced to callers of the bus contract.
#[derive(Debug, Error)]
pub enum BusError {
    /// A required message property (channel or event name) is missing.
    #[error("Property '{property}' not set on the message")]
    MissingProperty { property: &'static str },

    /// An enricher failed; the publish was aborted before any delivery.
    #[error("Enricher #{enricher} failed: {source}")]
    Enrichment {
        enricher: usize,
        #[source]
        source: anyhow::Error,
    },

    /// The transport rejected or failed an operation.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The message could not be converted to or from its wire form.
    #[error("Message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The bus is not accepting operations.
    #[error("Bus is not running (state: {state:?})")]
    NotRunning { state: BusState },

    /// The registry could not build a bus instance.
    #[error("No bus available: {0}")]
    NoBusAvailable(String),
}

/// Errors from the physical pub/sub transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection reset by peer")]
    ConnectionClosed,

    #[error("Timeout when establishing connection")]
    ConnectTimeout,

    #[error("Server replied with error: {0}")]
    Server(String),

    #[error("Transport client failed: {0}")]
    Client(#[source] Box<dyn std::error::Error + Send + Sync>),
}
