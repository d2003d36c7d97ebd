//! Per-request unit of work

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use core_types::CorrelationId;
use messaging::typed::{TpProcessRequest, TpProcessResponse};
use messaging::{encode_payload, MessageType, Stream};

use crate::context::StreamContext;
use crate::error::ApplyError;
use crate::handler::TransactionHandler;

/// Runs one process request through its handler and replies to the
/// validator under the request's correlation id.
pub struct HandlerTask {
    correlation_id: CorrelationId,
    request: TpProcessRequest,
    stream: Arc<dyn Stream>,
    handler: Arc<dyn TransactionHandler>,
}

impl HandlerTask {
    pub fn new(
        correlation_id: CorrelationId,
        request: TpProcessRequest,
        stream: Arc<dyn Stream>,
        handler: Arc<dyn TransactionHandler>,
    ) -> Self {
        Self {
            correlation_id,
            request,
            stream,
            handler,
        }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Applies the handler and sends the response. Returns what was sent.
    pub fn run(self) -> TpProcessResponse {
        let response = self.apply();
        match encode_payload(&response) {
            Ok(content) => {
                if let Err(err) = self.stream.send_back(
                    MessageType::TpProcessResponse,
                    &self.correlation_id,
                    content,
                ) {
                    tracing::warn!(
                        "failed to send response for {}: {err}",
                        self.correlation_id
                    );
                }
            }
            Err(err) => {
                tracing::error!(
                    "failed to encode response for {}: {err}",
                    self.correlation_id
                );
            }
        }
        response
    }

    fn apply(&self) -> TpProcessResponse {
        let context = StreamContext::new(self.stream.as_ref(), self.request.context_id.clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.handler.apply(&self.request, &context)
        }));

        match outcome {
            Ok(Ok(())) => TpProcessResponse::ok(),
            Ok(Err(ApplyError::InvalidTransaction {
                message,
                extended_data,
            })) => {
                tracing::debug!(
                    family = %self.request.header.family_name,
                    "invalid transaction {}: {message}",
                    self.correlation_id
                );
                TpProcessResponse::invalid_transaction(message, extended_data)
            }
            Ok(Err(ApplyError::InternalError {
                message,
                extended_data,
            })) => {
                tracing::warn!(
                    family = %self.request.header.family_name,
                    "internal error on {}: {message}",
                    self.correlation_id
                );
                TpProcessResponse::internal_error(message, extended_data)
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                tracing::error!(
                    family = %self.request.header.family_name,
                    "handler panicked on {}: {reason}",
                    self.correlation_id
                );
                TpProcessResponse::internal_error(format!("handler panicked: {reason}"), None)
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
