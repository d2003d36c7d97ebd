//! # Transaction Processor
//!
//! The dispatch engine: keeps the handler set registered with the
//! validator, answers pings inline, fans process requests out to a worker
//! pool, and drains in-flight work on shutdown.
//!
//! ## Lifecycle
//!
//! ```text
//! Registering -> Running -> Draining -> Stopped
//!      ^            |
//!      +------------+  (handler set changed or connection lost)
//! ```
//!
//! `run` blocks the calling thread for the whole lifecycle. `stop` may be
//! called from any other thread, any number of times.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use messaging::typed::{
    PingResponse, RegisterStatus, TpProcessRequest, TpRegisterRequest, TpRegisterResponse,
    TpUnregisterRequest, TpUnregisterResponse,
};
use messaging::{
    decode_payload, encode_payload, ChannelError, FutureError, Message, MessageType,
    SocketChannel, Stream,
};
use parking_lot::{Condvar, Mutex};

use crate::config::ProcessorConfig;
use crate::error::{PoolError, ProcessorError, RegistrationError};
use crate::handler::TransactionHandler;
use crate::pool::WorkerPool;
use crate::registry::{HandlerKey, HandlerRegistry, RegisterOutcome};
use crate::task::HandlerTask;

/// Where the engine is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Registering,
    Running,
    Draining,
    Stopped,
}

/// What [`TransactionProcessor::handle_message`] did with one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// A ping was answered inline
    PingAnswered,
    /// A handler task was queued on the worker pool
    Submitted,
    /// No handler matches the request's family and version; nothing is sent
    NoHandler,
    /// The connection dropped; registration will be redone
    Disconnected,
    /// A message kind the engine does not act on
    Ignored,
    /// An undecodable request, or the pool no longer accepts work
    Dropped,
}

pub struct TransactionProcessor {
    stream: Arc<dyn Stream>,
    registry: HandlerRegistry,
    config: Mutex<ProcessorConfig>,
    pool: Mutex<Option<Arc<WorkerPool>>>,
    phase: Mutex<Phase>,
    stop_called: AtomicBool,
    stopping: AtomicBool,
    wake_lock: Mutex<()>,
    wake: Condvar,
}

impl TransactionProcessor {
    /// Connects to the validator at `address` using the default
    /// configuration plus environment overrides.
    pub fn new(address: impl Into<String>) -> Result<Self, ProcessorError> {
        let stream = SocketChannel::connect(address)?;
        Ok(Self::with_config(
            Arc::new(stream),
            ProcessorConfig::default().apply_env_overrides(),
        ))
    }

    pub fn with_stream(stream: Arc<dyn Stream>) -> Self {
        Self::with_config(stream, ProcessorConfig::default())
    }

    pub fn with_config(stream: Arc<dyn Stream>, config: ProcessorConfig) -> Self {
        Self {
            stream,
            registry: HandlerRegistry::new(),
            config: Mutex::new(config),
            pool: Mutex::new(None),
            phase: Mutex::new(Phase::Registering),
            stop_called: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
        }
    }

    /// Adds a handler. Safe to call while `run` is active; a new or
    /// replaced handler is registered before the next message is read.
    pub fn add_handler(&self, handler: Arc<dyn TransactionHandler>) -> RegisterOutcome {
        let key = HandlerKey::of(handler.as_ref());
        let outcome = self.registry.register(handler);
        match outcome {
            RegisterOutcome::Added => tracing::info!("added handler {key}"),
            RegisterOutcome::Replaced => tracing::info!("replaced handler {key}"),
            RegisterOutcome::Unchanged => {}
        }
        self.notify();
        outcome
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn config(&self) -> ProcessorConfig {
        self.config.lock().clone()
    }

    pub fn worker_pool_size(&self) -> usize {
        self.config.lock().worker_threads
    }

    /// Takes effect when the pool is started; a running pool keeps its size.
    pub fn set_worker_pool_size(&self, size: usize) {
        self.config.lock().worker_threads = size.max(1);
        if self.pool.lock().is_some() {
            tracing::warn!("worker pool already started; new size applies on next start");
        }
    }

    pub fn max_occupancy(&self) -> u32 {
        self.config.lock().max_occupancy
    }

    /// Applies to registrations sent after this call.
    pub fn set_max_occupancy(&self, max_occupancy: u32) {
        self.config.lock().max_occupancy = max_occupancy;
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Serves the validator until [`TransactionProcessor::stop`] is called,
    /// then drains and closes the stream.
    pub fn run(&self) -> Result<(), ProcessorError> {
        self.ensure_pool()?;
        let receive_poll = self.config.lock().receive_poll;
        tracing::info!("transaction processor started");

        while !self.is_stopping() {
            if self.registry.is_empty() {
                self.wait_for_wake(receive_poll, || !self.registry.is_empty());
                continue;
            }
            if !self.registry.is_registered() {
                self.set_phase(Phase::Registering);
                if !self.register_handlers() {
                    continue;
                }
                self.set_phase(Phase::Running);
            }

            match self.stream.receive_timeout(receive_poll) {
                Ok(message) => {
                    self.handle_message(message);
                }
                Err(ChannelError::Timeout) => {}
                Err(ChannelError::Disconnected) => {
                    self.handle_disconnect();
                }
                Err(ChannelError::Closed) => {
                    tracing::warn!("stream closed underneath the processor");
                    break;
                }
                Err(err) => tracing::warn!("receive failed: {err}"),
            }
        }

        self.drain();
        Ok(())
    }

    /// Dispatches one unsolicited message.
    pub fn handle_message(&self, message: Message) -> Dispatch {
        match message.message_type {
            MessageType::PingRequest => {
                match encode_payload(&PingResponse {}) {
                    Ok(content) => {
                        if let Err(err) = self.stream.send_back(
                            MessageType::PingResponse,
                            &message.correlation_id,
                            content,
                        ) {
                            tracing::warn!("failed to answer ping: {err}");
                        }
                    }
                    Err(err) => tracing::error!("failed to encode ping response: {err}"),
                }
                Dispatch::PingAnswered
            }
            MessageType::TpProcessRequest => self.submit(message),
            other => {
                tracing::debug!("ignoring {other} from validator");
                Dispatch::Ignored
            }
        }
    }

    /// Forgets the validator's acknowledgements so the next loop iteration
    /// registers every handler again.
    pub fn handle_disconnect(&self) -> Dispatch {
        tracing::info!("validator connection lost; registration will be retried");
        self.registry.invalidate();
        Dispatch::Disconnected
    }

    /// Unregisters, if the validator acknowledged any handler, and asks the
    /// main loop to exit. Idempotent.
    pub fn stop(&self) {
        if self.stop_called.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("stopping transaction processor");

        if self.registry.has_acknowledged() {
            let timeout = self.config.lock().unregister_timeout;
            if let Err(err) = self.unregister(timeout) {
                tracing::warn!("unregister not acknowledged, continuing shutdown: {err}");
            }
        } else {
            tracing::debug!("no handler acknowledged; skipping unregister");
        }

        self.stopping.store(true, Ordering::SeqCst);
        self.notify();
    }

    fn unregister(&self, timeout: Duration) -> Result<(), RegistrationError> {
        let content = encode_payload(&TpUnregisterRequest {})?;
        let future = self.stream.send(MessageType::TpUnregisterRequest, content)?;
        let reply = future.result_timeout(timeout)?;
        match decode_payload::<TpUnregisterResponse>(&reply) {
            Ok(response) => {
                tracing::info!("unregister acknowledged with status {:?}", response.status)
            }
            Err(err) => tracing::warn!("undecodable unregister reply: {err}"),
        }
        Ok(())
    }

    fn submit(&self, message: Message) -> Dispatch {
        let request: TpProcessRequest = match message.decode_content() {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(
                    "dropping undecodable process request {}: {err}",
                    message.correlation_id
                );
                return Dispatch::Dropped;
            }
        };

        let header = &request.header;
        let Some(handler) = self
            .registry
            .lookup(&header.family_name, &header.family_version)
        else {
            tracing::warn!(
                "no handler for {} {}; dropping {}",
                header.family_name,
                header.family_version,
                message.correlation_id
            );
            return Dispatch::NoHandler;
        };

        let pool = match self.ensure_pool() {
            Ok(pool) => pool,
            Err(err) => {
                tracing::warn!("dropping {}: {err}", message.correlation_id);
                return Dispatch::Dropped;
            }
        };
        let task = HandlerTask::new(
            message.correlation_id,
            request,
            Arc::clone(&self.stream),
            handler,
        );
        match pool.execute(move || {
            task.run();
        }) {
            Ok(()) => Dispatch::Submitted,
            Err(err) => {
                tracing::warn!("worker pool rejected task: {err}");
                Dispatch::Dropped
            }
        }
    }

    /// Registers every unacknowledged handler. Returns true once the whole
    /// set is acknowledged.
    fn register_handlers(&self) -> bool {
        let (max_occupancy, backoff, poll) = {
            let config = self.config.lock();
            (config.max_occupancy, config.register_backoff, config.receive_poll)
        };

        for handler in self.registry.unacknowledged() {
            if self.is_stopping() {
                return false;
            }
            let key = HandlerKey::of(handler.as_ref());
            match self.register_one(handler.as_ref(), max_occupancy, poll) {
                Ok(()) => {
                    tracing::info!("registered {key} with validator");
                    self.registry.acknowledge(&handler);
                }
                Err(err) => {
                    tracing::warn!("registration of {key} failed: {err}");
                    if err.is_disconnect() {
                        if let Err(err) = self.stream.reconnect() {
                            tracing::warn!("reconnect failed: {err}");
                        }
                    }
                    self.wait_for_wake(backoff, || false);
                    return false;
                }
            }
        }
        self.registry.complete_registration()
    }

    /// One register round trip. The reply is awaited without a deadline;
    /// `poll` only bounds each wait so a stop request is noticed.
    fn register_one(
        &self,
        handler: &dyn TransactionHandler,
        max_occupancy: u32,
        poll: Duration,
    ) -> Result<(), RegistrationError> {
        let request = TpRegisterRequest {
            family: handler.family_name().to_string(),
            version: handler.version().to_string(),
            namespaces: handler.namespaces(),
            max_occupancy,
        };
        let future = self
            .stream
            .send(MessageType::TpRegisterRequest, encode_payload(&request)?)?;

        let reply = loop {
            match future.result_timeout(poll) {
                Ok(reply) => break reply,
                Err(FutureError::Timeout) if !self.is_stopping() => continue,
                Err(err) => return Err(err.into()),
            }
        };

        let response: TpRegisterResponse = decode_payload(&reply)?;
        match response.status {
            RegisterStatus::Ok => Ok(()),
            status => Err(RegistrationError::Refused(status)),
        }
    }

    /// Submits whatever is still queued, then shuts the pool down within the
    /// configured budget and closes the stream.
    fn drain(&self) {
        self.set_phase(Phase::Draining);
        let (drain_poll, shutdown_timeout) = {
            let config = self.config.lock();
            (config.drain_poll, config.shutdown_timeout)
        };

        let mut drained = 0usize;
        loop {
            match self.stream.receive_timeout(drain_poll) {
                Ok(message) => {
                    if self.handle_message(message) == Dispatch::Submitted {
                        drained += 1;
                    }
                }
                Err(ChannelError::Timeout)
                | Err(ChannelError::Disconnected)
                | Err(ChannelError::Closed) => break,
                Err(err) => {
                    tracing::warn!("receive failed while draining: {err}");
                    break;
                }
            }
        }
        tracing::info!(drained, "drained queued requests");

        let pool = self.pool.lock().take();
        if let Some(pool) = pool {
            let report = pool.shutdown(shutdown_timeout);
            if !report.is_clean() {
                tracing::warn!(
                    abandoned = report.abandoned,
                    "in-flight tasks did not finish within {shutdown_timeout:?}; abandoning them"
                );
            }
        }

        self.stream.close();
        self.set_phase(Phase::Stopped);
        tracing::info!("transaction processor stopped");
    }

    fn ensure_pool(&self) -> Result<Arc<WorkerPool>, PoolError> {
        let mut slot = self.pool.lock();
        if let Some(pool) = slot.as_ref() {
            return Ok(Arc::clone(pool));
        }
        if self.phase() == Phase::Stopped {
            return Err(PoolError::Closed);
        }
        let pool = Arc::new(WorkerPool::new(self.worker_pool_size())?);
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    fn set_phase(&self, phase: Phase) {
        let mut current = self.phase.lock();
        if *current != phase {
            tracing::debug!("processor phase {:?} -> {:?}", *current, phase);
            *current = phase;
        }
    }

    fn notify(&self) {
        let _guard = self.wake_lock.lock();
        self.wake.notify_all();
    }

    /// Sleeps up to `timeout`. Returns early on stop, or when `ready` holds
    /// after a handler change.
    fn wait_for_wake(&self, timeout: Duration, ready: impl Fn() -> bool) {
        let deadline = Instant::now() + timeout;
        let mut guard = self.wake_lock.lock();
        while !self.is_stopping() && !ready() {
            if self.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
    }
}
