use thiserror::Error;

use crate::message::RpcError;

/// Transport/protocol failures. Any of these is fatal to [`crate::endpoint::Endpoint::serve`];
/// per-request failures never construct this type (see `HandlerError` / `RegistryError`).
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("codec read failed: {0}")]
    Read(#[source] CodecError),
    #[error("codec write failed: {0}")]
    Write(#[source] CodecError),
    #[error("received response for unknown or already-completed call id {id}")]
    UnknownResponseId { id: u64 },
    #[error("remote connection is timeout.")]
    HeartbeatTimeout {
        elapsed: std::time::Duration,
        deadline: std::time::Duration,
    },
    #[error("remote connection is closed")]
    HeartbeatSend(#[source] CodecError),
    #[error("endpoint is shutting down")]
    Shutdown,
    #[error("call was cancelled before a reply arrived")]
    Cancelled,
    #[error("birpc: call timeout, dont resend")]
    CallTimeout,
    #[error(transparent)]
    Remote(#[from] RpcError),
}

/// Errors surfaced by a [`crate::codec::Codec`] implementation.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("transport closed by peer")]
    Closed,
    #[error("frame exceeds maximum payload size ({size} > {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("message {id} sets both or neither of result/error")]
    InvalidEnvelope { id: u64 },
}

/// Errors building a [`crate::registry::Registry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("method {0:?} is already registered")]
    DuplicateMethod(String),
}

/// The error a handler returns for a single failed call. Carried back to the
/// caller as an [`RpcError`]; never terminates [`crate::endpoint::Endpoint::serve`].
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("failed to decode arguments: {0}")]
    BadArgs(#[source] serde_json::Error),
    #[error("failed to encode reply: {0}")]
    BadReply(#[source] serde_json::Error),
    #[error("{0}")]
    Failed(String),
}

impl From<HandlerError> for RpcError {
    fn from(err: HandlerError) -> Self {
        RpcError::new(err.to_string())
    }
}
