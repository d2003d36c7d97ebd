//! Processor error types

use messaging::typed::RegisterStatus;
use messaging::{ChannelError, CodecError, FutureError};
use thiserror::Error;

/// Failure outcome of [`crate::TransactionHandler::apply`]
///
/// The two variants map onto distinct response statuses: the validator
/// rejects the transaction for `InvalidTransaction` and treats
/// `InternalError` as a processor fault it may retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("invalid transaction: {message}")]
    InvalidTransaction {
        message: String,
        extended_data: Option<Vec<u8>>,
    },

    #[error("internal error: {message}")]
    InternalError {
        message: String,
        extended_data: Option<Vec<u8>>,
    },
}

impl ApplyError {
    pub fn invalid_transaction(message: impl Into<String>) -> Self {
        ApplyError::InvalidTransaction {
            message: message.into(),
            extended_data: None,
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        ApplyError::InternalError {
            message: message.into(),
            extended_data: None,
        }
    }

    /// Attaches application-specific diagnostic bytes.
    pub fn with_extended_data(self, data: Vec<u8>) -> Self {
        match self {
            ApplyError::InvalidTransaction { message, .. } => ApplyError::InvalidTransaction {
                message,
                extended_data: Some(data),
            },
            ApplyError::InternalError { message, .. } => ApplyError::InternalError {
                message,
                extended_data: Some(data),
            },
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApplyError::InvalidTransaction { message, .. }
            | ApplyError::InternalError { message, .. } => message,
        }
    }

    pub fn extended_data(&self) -> Option<&[u8]> {
        match self {
            ApplyError::InvalidTransaction { extended_data, .. }
            | ApplyError::InternalError { extended_data, .. } => extended_data.as_deref(),
        }
    }
}

impl From<FutureError> for ApplyError {
    fn from(err: FutureError) -> Self {
        ApplyError::internal_error(err.to_string())
    }
}

impl From<ChannelError> for ApplyError {
    fn from(err: ChannelError) -> Self {
        ApplyError::internal_error(err.to_string())
    }
}

impl From<CodecError> for ApplyError {
    fn from(err: CodecError) -> Self {
        ApplyError::internal_error(err.to_string())
    }
}

/// Worker pool errors
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool is shutting down and takes no new work
    #[error("worker pool is closed")]
    Closed,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// One failed registration round trip
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("registration reply lost: {0}")]
    Reply(#[from] FutureError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("validator refused registration with status {0:?}")]
    Refused(RegisterStatus),
}

impl RegistrationError {
    /// True when the transport is down and a reconnect is worth trying.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            RegistrationError::Channel(ChannelError::Disconnected)
                | RegistrationError::Reply(FutureError::Disconnected)
        )
    }
}

/// Errors returned while building or starting a processor
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}
