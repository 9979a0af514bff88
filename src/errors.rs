//! Error types for the forwarder

use crate::telemetry::SignalKind;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForwarderError>;

#[derive(Debug, Error)]
pub enum ForwarderError {
    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Channel could not be built or connected
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The collector answered with a non-OK status
    #[error("RPC error: {0}")]
    Status(#[from] tonic::Status),

    /// The collector accepted the call but rejected part of it
    #[error("failed to export {rejected} {}: {message}", .kind.record_noun())]
    PartialSuccess {
        kind: SignalKind,
        rejected: i64,
        message: String,
    },

    /// The export did not finish within the configured timeout
    #[error("export deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// The caller or the client's stop signal cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    #[error("not started")]
    NotStarted,

    #[error("already started")]
    AlreadyStarted,

    #[error("already closed")]
    AlreadyClosed,
}
