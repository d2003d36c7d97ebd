//! # Core Types
//!
//! Identifiers shared by the messaging layer and the transaction processor.
//!
//! ## Key Types
//!
//! - [`CorrelationId`]: links an outbound request to its reply on a shared connection
//! - [`ContextId`]: scopes every state operation of one in-flight process request

pub mod ids;

pub use ids::{ContextId, CorrelationId};
