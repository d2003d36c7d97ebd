//! The duplex stream abstraction consumed by the transaction processor

use std::sync::Arc;
use std::time::Duration;

use core_types::CorrelationId;

use crate::error::ChannelError;
use crate::future::MessageFuture;
use crate::message::{Message, MessageType};

/// One connection to the validator, multiplexed into many request/reply pairs
///
/// Implementations must tolerate arbitrary concurrent callers: worker
/// threads issue state calls while the dispatch loop answers pings and
/// reads the next request.
pub trait Stream: Send + Sync {
    /// Sends a request under a fresh correlation id and returns the future
    /// its reply will resolve.
    fn send(
        &self,
        message_type: MessageType,
        content: Vec<u8>,
    ) -> Result<Arc<MessageFuture>, ChannelError>;

    /// Replies to a message the validator initiated, reusing its
    /// correlation id. No future is created.
    fn send_back(
        &self,
        message_type: MessageType,
        correlation_id: &CorrelationId,
        content: Vec<u8>,
    ) -> Result<(), ChannelError>;

    /// Blocks for the next unsolicited message.
    ///
    /// Returns `ChannelError::Disconnected` once per lost connection.
    fn receive(&self) -> Result<Message, ChannelError>;

    /// Like [`Stream::receive`], failing with `ChannelError::Timeout` when
    /// nothing arrives in time.
    fn receive_timeout(&self, timeout: Duration) -> Result<Message, ChannelError>;

    /// Re-establishes a lost connection. Never called implicitly. A
    /// disconnect notice still queued from the lost connection is discarded.
    fn reconnect(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    /// Closes the connection. Idempotent.
    fn close(&self);
}
