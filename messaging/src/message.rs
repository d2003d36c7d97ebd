//! Message types and envelope structure

use core_types::CorrelationId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CodecError;

/// Kind tag carried by every envelope
///
/// The numeric codes are the validator protocol's. Kinds this crate does not
/// know about survive decoding as [`MessageType::Other`] so they can be
/// logged and discarded instead of failing the whole frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum MessageType {
    Default,
    TpRegisterRequest,
    TpRegisterResponse,
    TpUnregisterRequest,
    TpUnregisterResponse,
    TpProcessRequest,
    TpProcessResponse,
    TpStateGetRequest,
    TpStateGetResponse,
    TpStateSetRequest,
    TpStateSetResponse,
    TpStateDeleteRequest,
    TpStateDeleteResponse,
    TpReceiptAddDataRequest,
    TpReceiptAddDataResponse,
    TpEventAddRequest,
    TpEventAddResponse,
    PingRequest,
    PingResponse,
    /// Any code outside the set above
    Other(i32),
}

impl MessageType {
    /// Returns the wire code for this kind
    pub fn code(&self) -> i32 {
        match self {
            MessageType::Default => 0,
            MessageType::TpRegisterRequest => 1,
            MessageType::TpRegisterResponse => 2,
            MessageType::TpUnregisterRequest => 3,
            MessageType::TpUnregisterResponse => 4,
            MessageType::TpProcessRequest => 5,
            MessageType::TpProcessResponse => 6,
            MessageType::TpStateGetRequest => 7,
            MessageType::TpStateGetResponse => 8,
            MessageType::TpStateSetRequest => 9,
            MessageType::TpStateSetResponse => 10,
            MessageType::TpStateDeleteRequest => 11,
            MessageType::TpStateDeleteResponse => 12,
            MessageType::TpReceiptAddDataRequest => 13,
            MessageType::TpReceiptAddDataResponse => 14,
            MessageType::TpEventAddRequest => 15,
            MessageType::TpEventAddResponse => 16,
            MessageType::PingRequest => 1000,
            MessageType::PingResponse => 1001,
            MessageType::Other(code) => *code,
        }
    }
}

impl From<i32> for MessageType {
    fn from(code: i32) -> Self {
        match code {
            0 => MessageType::Default,
            1 => MessageType::TpRegisterRequest,
            2 => MessageType::TpRegisterResponse,
            3 => MessageType::TpUnregisterRequest,
            4 => MessageType::TpUnregisterResponse,
            5 => MessageType::TpProcessRequest,
            6 => MessageType::TpProcessResponse,
            7 => MessageType::TpStateGetRequest,
            8 => MessageType::TpStateGetResponse,
            9 => MessageType::TpStateSetRequest,
            10 => MessageType::TpStateSetResponse,
            11 => MessageType::TpStateDeleteRequest,
            12 => MessageType::TpStateDeleteResponse,
            13 => MessageType::TpReceiptAddDataRequest,
            14 => MessageType::TpReceiptAddDataResponse,
            15 => MessageType::TpEventAddRequest,
            16 => MessageType::TpEventAddResponse,
            1000 => MessageType::PingRequest,
            1001 => MessageType::PingResponse,
            other => MessageType::Other(other),
        }
    }
}

impl From<MessageType> for i32 {
    fn from(kind: MessageType) -> Self {
        kind.code()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Other(code) => write!(f, "Other({})", code),
            known => write!(f, "{:?}", known),
        }
    }
}

/// Wire envelope exchanged with the validator
///
/// The content is opaque at this level; typed payloads live in
/// [`crate::typed`] and are decoded with [`Message::decode_content`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Kind of the payload
    pub message_type: MessageType,
    /// Correlation ID for request/response matching
    pub correlation_id: CorrelationId,
    /// Serialized payload
    pub content: Vec<u8>,
}

impl Message {
    /// Creates a new envelope
    pub fn new(message_type: MessageType, correlation_id: CorrelationId, content: Vec<u8>) -> Self {
        Self {
            message_type,
            correlation_id,
            content,
        }
    }

    /// Creates an envelope around a typed payload
    pub fn with_payload<T: Serialize>(
        message_type: MessageType,
        correlation_id: CorrelationId,
        payload: &T,
    ) -> Result<Self, CodecError> {
        Ok(Self::new(message_type, correlation_id, encode_payload(payload)?))
    }

    /// Deserializes the content into a typed payload
    pub fn decode_content<T: DeserializeOwned>(&self) -> Result<T, CodecError> {
        decode_payload(&self.content)
    }

    /// Serializes the whole envelope for framing
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses an envelope from a frame body
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Serializes a typed payload into envelope content
pub fn encode_payload<T: Serialize>(payload: &T) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(payload)?)
}

/// Deserializes envelope content into a typed payload
pub fn decode_payload<T: DeserializeOwned>(content: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(content)?)
}
