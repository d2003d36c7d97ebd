//! Messaging error types

use thiserror::Error;

use crate::frame::FrameError;

/// Outcome of waiting on or writing to a [`crate::MessageFuture`] that is not a payload
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum FutureError {
    /// The connection dropped before a reply arrived; the future is poisoned
    #[error("validator disconnected before a reply arrived")]
    Disconnected,

    /// A bounded wait elapsed; the future is still pending
    #[error("timed out waiting for a reply")]
    Timeout,

    /// A reply was already recorded for this correlation id
    #[error("future already resolved")]
    AlreadyResolved,
}

/// Payload encode/decode failure
#[derive(Debug, Error)]
#[error("codec error: {0}")]
pub struct CodecError(#[from] serde_json::Error);

/// Errors surfaced by a [`crate::Stream`]
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The transport is down; sends fail fast until reconnected
    #[error("validator connection lost")]
    Disconnected,

    /// The channel was closed locally
    #[error("channel closed")]
    Closed,

    /// No unsolicited message arrived within the requested timeout
    #[error("timed out waiting for a message")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
