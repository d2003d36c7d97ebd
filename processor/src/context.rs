//! State facade handed to handlers
//!
//! [`Context`] is the handler-visible contract. [`StreamContext`] implements
//! it by turning each call into one request/reply round trip on the shared
//! [`Stream`], scoped to a single context id.
//!
//! Status handling:
//!
//! - `OK` yields the data
//! - `AUTHORIZATION_ERROR` on a state call is the caller's fault and becomes
//!   [`ApplyError::InvalidTransaction`]
//! - anything else, including a reply that does not decode, becomes
//!   [`ApplyError::InternalError`]

use std::collections::HashMap;

use core_types::ContextId;
use messaging::typed::{
    AddStatus, Event, EventAttribute, StateStatus, TpEventAddRequest, TpEventAddResponse,
    TpReceiptAddDataRequest, TpReceiptAddDataResponse, TpStateDeleteRequest,
    TpStateDeleteResponse, TpStateEntry, TpStateGetRequest, TpStateGetResponse,
    TpStateSetRequest, TpStateSetResponse,
};
use messaging::{decode_payload, encode_payload, MessageType, Stream};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::ApplyError;

/// Handler-visible view of validator state for one request
pub trait Context {
    /// Reads the given addresses. Addresses with no value are absent from
    /// the result.
    fn get_state(&self, addresses: &[String]) -> Result<HashMap<String, Vec<u8>>, ApplyError>;

    /// Writes the given entries and returns the addresses the validator set.
    fn set_state(&self, entries: HashMap<String, Vec<u8>>) -> Result<Vec<String>, ApplyError>;

    /// Deletes the given addresses and returns those actually removed.
    fn delete_state(&self, addresses: &[String]) -> Result<Vec<String>, ApplyError>;

    /// Attaches opaque data to the transaction receipt.
    fn add_receipt_data(&self, data: Vec<u8>) -> Result<(), ApplyError>;

    fn add_event(
        &self,
        event_type: &str,
        attributes: Vec<(String, String)>,
        data: Vec<u8>,
    ) -> Result<(), ApplyError>;
}

/// [`Context`] backed by a [`Stream`]
pub struct StreamContext<'a> {
    stream: &'a dyn Stream,
    context_id: ContextId,
}

impl<'a> StreamContext<'a> {
    pub fn new(stream: &'a dyn Stream, context_id: ContextId) -> Self {
        Self { stream, context_id }
    }

    pub fn context_id(&self) -> &ContextId {
        &self.context_id
    }

    /// Sends one request and waits, without a timeout, for its reply.
    fn round_trip<Req, Resp>(&self, message_type: MessageType, request: &Req) -> Result<Resp, ApplyError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let future = self.stream.send(message_type, encode_payload(request)?)?;
        let reply = future.result()?;
        decode_payload(&reply).map_err(|err| {
            ApplyError::internal_error(format!("malformed reply to {message_type}: {err}"))
        })
    }
}

fn unexpected_status(operation: &str, status: impl std::fmt::Debug) -> ApplyError {
    ApplyError::internal_error(format!("{operation} returned unexpected status {status:?}"))
}

impl Context for StreamContext<'_> {
    fn get_state(&self, addresses: &[String]) -> Result<HashMap<String, Vec<u8>>, ApplyError> {
        let request = TpStateGetRequest {
            context_id: self.context_id.clone(),
            addresses: addresses.to_vec(),
        };
        let response: TpStateGetResponse =
            self.round_trip(MessageType::TpStateGetRequest, &request)?;
        match response.status {
            StateStatus::Ok => Ok(response
                .entries
                .into_iter()
                .map(|entry| (entry.address, entry.data))
                .collect()),
            StateStatus::AuthorizationError => Err(ApplyError::invalid_transaction(format!(
                "tried to get unauthorized address {addresses:?}"
            ))),
            status => Err(unexpected_status("state get", status)),
        }
    }

    fn set_state(&self, entries: HashMap<String, Vec<u8>>) -> Result<Vec<String>, ApplyError> {
        let addresses: Vec<String> = entries.keys().cloned().collect();
        let request = TpStateSetRequest {
            context_id: self.context_id.clone(),
            entries: entries
                .into_iter()
                .map(|(address, data)| TpStateEntry { address, data })
                .collect(),
        };
        let response: TpStateSetResponse =
            self.round_trip(MessageType::TpStateSetRequest, &request)?;
        match response.status {
            StateStatus::Ok => Ok(response.addresses),
            StateStatus::AuthorizationError => Err(ApplyError::invalid_transaction(format!(
                "tried to set unauthorized address {addresses:?}"
            ))),
            status => Err(unexpected_status("state set", status)),
        }
    }

    fn delete_state(&self, addresses: &[String]) -> Result<Vec<String>, ApplyError> {
        let request = TpStateDeleteRequest {
            context_id: self.context_id.clone(),
            addresses: addresses.to_vec(),
        };
        let response: TpStateDeleteResponse =
            self.round_trip(MessageType::TpStateDeleteRequest, &request)?;
        match response.status {
            StateStatus::Ok => Ok(response.addresses),
            StateStatus::AuthorizationError => Err(ApplyError::invalid_transaction(format!(
                "tried to delete unauthorized address {addresses:?}"
            ))),
            status => Err(unexpected_status("state delete", status)),
        }
    }

    fn add_receipt_data(&self, data: Vec<u8>) -> Result<(), ApplyError> {
        let request = TpReceiptAddDataRequest {
            context_id: self.context_id.clone(),
            data,
        };
        let response: TpReceiptAddDataResponse =
            self.round_trip(MessageType::TpReceiptAddDataRequest, &request)?;
        match response.status {
            AddStatus::Ok => Ok(()),
            AddStatus::Error => Err(ApplyError::internal_error("failed to add receipt data")),
            status => Err(unexpected_status("receipt data add", status)),
        }
    }

    fn add_event(
        &self,
        event_type: &str,
        attributes: Vec<(String, String)>,
        data: Vec<u8>,
    ) -> Result<(), ApplyError> {
        let request = TpEventAddRequest {
            context_id: self.context_id.clone(),
            event: Event {
                event_type: event_type.to_string(),
                attributes: attributes
                    .into_iter()
                    .map(|(key, value)| EventAttribute { key, value })
                    .collect(),
                data,
            },
        };
        let response: TpEventAddResponse =
            self.round_trip(MessageType::TpEventAddRequest, &request)?;
        match response.status {
            AddStatus::Ok => Ok(()),
            AddStatus::Error => Err(ApplyError::internal_error("failed to add event")),
            status => Err(unexpected_status("event add", status)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeStream;

    fn context(stream: &FakeStream) -> StreamContext<'_> {
        StreamContext::new(stream, ContextId::new("ctx-1"))
    }

    #[test]
    fn test_get_returns_entries_as_map() {
        let stream = FakeStream::json(&TpStateGetResponse {
            entries: vec![TpStateEntry {
                address: "abc".to_string(),
                data: vec![1, 2],
            }],
            status: StateStatus::Ok,
        });
        let state = context(&stream).get_state(&["abc".to_string()]).unwrap();
        assert_eq!(state.get("abc"), Some(&vec![1, 2]));

        let sent = stream.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, MessageType::TpStateGetRequest);
        let request: TpStateGetRequest = decode_payload(&sent[0].1).unwrap();
        assert_eq!(request.context_id.as_str(), "ctx-1");
        assert_eq!(request.addresses, vec!["abc".to_string()]);
    }

    #[test]
    fn test_authorization_error_is_invalid_transaction() {
        let stream = FakeStream::json(&TpStateGetResponse {
            entries: Vec::new(),
            status: StateStatus::AuthorizationError,
        });
        let err = context(&stream).get_state(&["zz".to_string()]).unwrap_err();
        assert!(matches!(err, ApplyError::InvalidTransaction { .. }));
    }

    #[test]
    fn test_garbage_reply_is_internal_error_not_empty_result() {
        let stream = FakeStream::raw(b"\x00\xffnot a status".to_vec());
        let err = context(&stream).get_state(&["abc".to_string()]).unwrap_err();
        assert!(matches!(err, ApplyError::InternalError { .. }));
    }

    #[test]
    fn test_unset_status_is_internal_error() {
        let stream = FakeStream::json(&TpStateSetResponse {
            addresses: Vec::new(),
            status: StateStatus::StatusUnset,
        });
        let err = context(&stream)
            .set_state(HashMap::from([("a".to_string(), vec![1])]))
            .unwrap_err();
        assert!(matches!(err, ApplyError::InternalError { .. }));
    }

    #[test]
    fn test_delete_echoes_removed_addresses() {
        let stream = FakeStream::json(&TpStateDeleteResponse {
            addresses: vec!["a".to_string()],
            status: StateStatus::Ok,
        });
        let removed = context(&stream)
            .delete_state(&["a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(removed, vec!["a".to_string()]);
    }

    #[test]
    fn test_receipt_and_event_errors_are_internal() {
        let stream = FakeStream::json(&TpReceiptAddDataResponse {
            status: AddStatus::Error,
        });
        assert!(matches!(
            context(&stream).add_receipt_data(vec![9]),
            Err(ApplyError::InternalError { .. })
        ));

        let stream = FakeStream::json(&TpEventAddResponse {
            status: AddStatus::Ok,
        });
        context(&stream)
            .add_event("transfer", vec![("to".to_string(), "bob".to_string())], vec![])
            .unwrap();
        let request: TpEventAddRequest = decode_payload(&stream.sent()[0].1).unwrap();
        assert_eq!(request.event.event_type, "transfer");
        assert_eq!(request.event.attributes[0].key, "to");
    }

    #[test]
    fn test_lost_connection_is_internal_error() {
        let stream = FakeStream::disconnected();
        let err = context(&stream).get_state(&["abc".to_string()]).unwrap_err();
        assert!(matches!(err, ApplyError::InternalError { .. }));
    }
}
