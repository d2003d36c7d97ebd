//! # Validator Messaging
//!
//! This crate carries transaction-processor traffic to and from a validator.
//!
//! ## Philosophy
//!
//! - **One connection, many conversations**: requests are multiplexed over a
//!   single socket and matched to replies by correlation id
//! - **Typed payloads**: every request and response kind has a struct
//! - **Loud disconnects**: a lost connection fails every waiter instead of
//!   leaving it hanging
//!
//! ## Architecture
//!
//! An envelope ([`Message`]) holds a [`MessageType`], a correlation id and
//! opaque content. Envelopes travel as length-prefixed JSON frames.
//!
//! [`SocketChannel`] implements [`Stream`]: `send` registers a
//! [`MessageFuture`] before writing, the receive loop resolves it when the
//! reply arrives, and anything unmatched is queued for `receive`.

pub mod channel;
pub mod error;
pub mod frame;
pub mod future;
pub mod message;
pub mod stream;
pub mod typed;

pub use channel::{ChannelConfig, ConnectionState, SocketChannel};
pub use error::{ChannelError, CodecError, FutureError};
pub use frame::{FrameError, FrameReader, FrameWriter, DEFAULT_MAX_FRAME_BYTES};
pub use future::MessageFuture;
pub use message::{decode_payload, encode_payload, Message, MessageType};
pub use stream::Stream;
