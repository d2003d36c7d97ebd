//! # Transaction Processor
//!
//! This crate hosts transaction handlers on behalf of a validator.
//!
//! ## Philosophy
//!
//! - **Handlers are capabilities**: the embedder supplies business logic,
//!   the processor owns registration, dispatch and shutdown
//! - **Pings never wait**: liveness replies are sent from the dispatch loop,
//!   never from the worker pool
//! - **Every request gets an answer**: success, rejection, internal failure
//!   and even a handler panic all become a response status
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! # use processor::{ApplyError, Context, TransactionHandler};
//! # use messaging::typed::TpProcessRequest;
//! # struct IntKey;
//! # impl TransactionHandler for IntKey {
//! #     fn family_name(&self) -> &str { "intkey" }
//! #     fn version(&self) -> &str { "1.0" }
//! #     fn namespaces(&self) -> Vec<String> { vec!["1cf126".to_string()] }
//! #     fn apply(&self, _: &TpProcessRequest, _: &dyn Context) -> Result<(), ApplyError> { Ok(()) }
//! # }
//!
//! let processor = Arc::new(processor::TransactionProcessor::new("tcp://localhost:4004")?);
//! processor.add_handler(Arc::new(IntKey));
//! processor.run()?;
//! # Ok::<(), processor::ProcessorError>(())
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod pool;
pub mod processor;
pub mod registry;
pub mod task;

#[cfg(test)]
mod test_support;

pub use config::ProcessorConfig;
pub use context::{Context, StreamContext};
pub use error::{ApplyError, PoolError, ProcessorError, RegistrationError};
pub use handler::TransactionHandler;
pub use pool::{ShutdownReport, WorkerPool};
pub use processor::{Dispatch, Phase, TransactionProcessor};
pub use registry::{HandlerKey, HandlerRegistry, RegisterOutcome};
pub use task::HandlerTask;
