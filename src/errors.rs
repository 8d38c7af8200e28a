//! Error taxonomy of the charge-point runtime.
//!
//! Protocol-level faults (malformed frames, unknown message ids) surface as
//! [`FrameError`] and are answered on the wire with a CALLERROR where the
//! trigger was a CALL. Everything that has a typed OCPP response status is
//! reported through that status, never through a CALLERROR.

use thiserror::Error;

/// Errors surfaced by the public charge-point API.
#[derive(Debug, Error)]
pub enum ChargePointError {
    #[error("charge point is already running")]
    AlreadyRunning,

    #[error("charge point has not been started")]
    NotRunning,

    #[error("no transaction active on connector {0}")]
    NoActiveTransaction(u32),

    #[error("connector {0} already has an active transaction")]
    TransactionInProgress(u32),

    #[error("unknown connector {0}")]
    UnknownConnector(u32),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("configuration: {0}")]
    Configuration(String),
}

/// Errors raised while parsing or classifying an OCPP-J frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("empty OCPP message array")]
    EmptyArray,

    #[error("message type is not a number")]
    InvalidMessageType,

    #[error("unknown message type: {0}")]
    UnknownMessageType(u64),

    #[error("expected at least {expected} fields, got {got}")]
    MissingFields { expected: usize, got: usize },

    #[error("field type mismatch: {0}")]
    FieldTypeMismatch(&'static str),

    #[error("unknown action {action} (message id {unique_id})")]
    UnknownAction { action: String, unique_id: String },

    #[error("no pending call with message id {0}")]
    UnknownMessageId(String),
}

/// Errors from the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store is closed")]
    Closed,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store backend: {0}")]
    Backend(String),
}

/// Errors from the WebSocket transport seam.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),
}

pub type Result<T> = std::result::Result<T, ChargePointError>;
