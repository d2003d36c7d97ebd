//! Typed payloads carried inside envelopes.
//!
//! One struct per request/response kind of the validator protocol. Each
//! is serialized into the envelope content with [`crate::encode_payload`].
//! Status enums carry an explicit `StatusUnset` so a zeroed or partially
//! written reply is never mistaken for success.

use core_types::ContextId;
use serde::{Deserialize, Serialize};

/// Liveness probe sent by the validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingResponse {}

/// Announces one handler (family + version) to the validator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpRegisterRequest {
    pub family: String,
    pub version: String,
    /// Address prefixes this handler reads and writes.
    pub namespaces: Vec<String>,
    /// How many requests the validator may have in flight at once.
    pub max_occupancy: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegisterStatus {
    #[default]
    StatusUnset,
    Ok,
    Error,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpRegisterResponse {
    pub status: RegisterStatus,
}

impl TpRegisterResponse {
    pub fn ok() -> Self {
        Self {
            status: RegisterStatus::Ok,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpUnregisterRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpUnregisterResponse {
    pub status: RegisterStatus,
}

/// Header of the transaction a process request carries.
///
/// `family_name` and `family_version` select the handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionHeader {
    pub family_name: String,
    pub family_version: String,
    #[serde(default)]
    pub batcher_public_key: String,
    #[serde(default)]
    pub signer_public_key: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub payload_sha512: String,
}

/// Work item pushed by the validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpProcessRequest {
    pub header: TransactionHeader,
    /// Opaque transaction payload interpreted by the handler.
    pub payload: Vec<u8>,
    #[serde(default)]
    pub signature: String,
    /// Scope for every state call made while handling this request.
    pub context_id: ContextId,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessStatus {
    #[default]
    StatusUnset,
    Ok,
    InvalidTransaction,
    InternalError,
}

/// Result of one process request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpProcessResponse {
    pub status: ProcessStatus,
    /// Human-readable reason, absent on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Application-specific diagnostic bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_data: Option<Vec<u8>>,
}

impl TpProcessResponse {
    pub fn ok() -> Self {
        Self {
            status: ProcessStatus::Ok,
            message: None,
            extended_data: None,
        }
    }

    pub fn invalid_transaction(message: impl Into<String>, extended_data: Option<Vec<u8>>) -> Self {
        Self {
            status: ProcessStatus::InvalidTransaction,
            message: Some(message.into()),
            extended_data,
        }
    }

    pub fn internal_error(message: impl Into<String>, extended_data: Option<Vec<u8>>) -> Self {
        Self {
            status: ProcessStatus::InternalError,
            message: Some(message.into()),
            extended_data,
        }
    }
}

/// Status shared by the get/set/delete state responses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateStatus {
    #[default]
    StatusUnset,
    Ok,
    /// The address lies outside the handler's declared inputs/outputs.
    AuthorizationError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpStateEntry {
    pub address: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpStateGetRequest {
    pub context_id: ContextId,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpStateGetResponse {
    #[serde(default)]
    pub entries: Vec<TpStateEntry>,
    pub status: StateStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpStateSetRequest {
    pub context_id: ContextId,
    pub entries: Vec<TpStateEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpStateSetResponse {
    #[serde(default)]
    pub addresses: Vec<String>,
    pub status: StateStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpStateDeleteRequest {
    pub context_id: ContextId,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpStateDeleteResponse {
    #[serde(default)]
    pub addresses: Vec<String>,
    pub status: StateStatus,
}

/// Status shared by the receipt-data and event responses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddStatus {
    #[default]
    StatusUnset,
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpReceiptAddDataRequest {
    pub context_id: ContextId,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpReceiptAddDataResponse {
    pub status: AddStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    pub event_type: String,
    pub attributes: Vec<EventAttribute>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpEventAddRequest {
    pub context_id: ContextId,
    pub event: Event,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TpEventAddResponse {
    pub status: AddStatus,
}
