//! Error taxonomy for the pipeline.
//!
//! The split matters operationally: [`FatalConnectError`] stops the
//! process at startup, [`PolicyError`] variants are transient and
//! surfaced to callers, and [`MessageParseError`] is local to a single
//! delivery and must never take down the consumer loop.

use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// Outcome of a policy-guarded operation that did not succeed.
#[derive(Debug, Error)]
pub enum PolicyError<E>
where
    E: std::error::Error + 'static,
{
    /// The breaker is open; the wrapped operation was not invoked.
    #[error("circuit open, retry allowed in {retry_in:?}")]
    CircuitOpen { retry_in: Duration },

    /// Every allowed attempt failed; carries the last failure.
    #[error("retries exhausted after {attempts} attempts")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: E,
    },
}

/// Startup connection acquisition failed for good.
#[derive(Debug, Error)]
pub enum FatalConnectError {
    #[error("could not connect to broker: {0}")]
    Exhausted(#[source] PolicyError<TransportError>),

    #[error("channel creation failed: {0}")]
    Channel(#[source] TransportError),
}

/// Exchange/queue/binding declaration failed.
#[derive(Debug, Error)]
#[error("topology declaration failed: {0}")]
pub struct TopologyError(#[from] pub TransportError);

/// One publish attempt inside the publish policy.
#[derive(Debug, Error)]
pub enum PublishAttemptError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("reconnect failed: {0}")]
    Reconnect(#[source] FatalConnectError),
}

/// Publish failed even after reconnection attempts; the message is
/// considered undelivered.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("envelope serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("publish failed: {0}")]
    Failed(#[source] PolicyError<PublishAttemptError>),
}

/// A delivery body that could not be decoded into an envelope.
#[derive(Debug, Error)]
pub enum MessageParseError {
    #[error("invalid envelope JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("header.messageType is missing or empty")]
    MissingMessageType,

    #[error("payload does not match schema for {message_type}: {source}")]
    Payload {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The consumer subscription itself failed (not a per-delivery error).
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("subscribe failed: {0}")]
    Subscribe(#[from] TransportError),
}
