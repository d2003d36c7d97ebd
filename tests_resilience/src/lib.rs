//! Resilience Test Utilities
//!
//! This crate provides shared utilities for resilience and integration tests.
//!
//! ## Test Philosophy
//!
//! - **Real wire, fake peer**: tests talk to the processor over TCP through
//!   a [`FakeValidator`] that speaks the same framing and envelopes
//! - **Bounded waits**: every blocking read has a deadline so a hang fails
//!   the test instead of stalling the suite
//! - **Scripted handlers**: [`FnHandler`] turns a closure into a handler so
//!   each test states its own business logic inline

use std::collections::BTreeMap;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use core_types::{ContextId, CorrelationId};
use messaging::typed::{
    AddStatus, Event, RegisterStatus, StateStatus, TpEventAddRequest, TpEventAddResponse,
    TpProcessRequest, TpReceiptAddDataRequest, TpReceiptAddDataResponse, TpRegisterRequest,
    TpRegisterResponse, TpStateDeleteRequest, TpStateDeleteResponse, TpStateEntry,
    TpStateGetRequest, TpStateGetResponse, TpStateSetRequest, TpStateSetResponse,
    TpUnregisterResponse, TransactionHeader,
};
use messaging::{
    FrameReader, FrameWriter, Message, MessageType, SocketChannel, Stream,
    DEFAULT_MAX_FRAME_BYTES,
};
use processor::{ApplyError, Context, ProcessorConfig, TransactionHandler, TransactionProcessor};
use serde::Serialize;

/// Upper bound for any single wait in these tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Processor settings with short polls so tests run quickly
pub fn fast_config() -> ProcessorConfig {
    ProcessorConfig::default()
        .with_worker_threads(4)
        .with_receive_poll(Duration::from_millis(10))
        .with_drain_poll(Duration::from_millis(50))
        .with_register_backoff(Duration::from_millis(20))
        .with_unregister_timeout(Duration::from_millis(500))
        .with_shutdown_timeout(TEST_TIMEOUT)
}

/// Builds a processor connected to `validator` over a real socket
pub fn connect_processor(validator: &FakeValidator, config: ProcessorConfig) -> Arc<TransactionProcessor> {
    let channel = SocketChannel::connect(validator.address()).expect("Failed to start channel");
    Arc::new(TransactionProcessor::with_config(
        Arc::new(channel) as Arc<dyn Stream>,
        config,
    ))
}

/// Runs the processor on its own thread
pub fn spawn_run(processor: &Arc<TransactionProcessor>) -> thread::JoinHandle<()> {
    let processor = Arc::clone(processor);
    thread::Builder::new()
        .name("test-processor".to_string())
        .spawn(move || processor.run().expect("processor run failed"))
        .expect("Failed to spawn processor thread")
}

/// In-process stand-in for the validator
pub struct FakeValidator {
    listener: TcpListener,
    address: String,
}

impl FakeValidator {
    pub fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind validator");
        listener
            .set_nonblocking(true)
            .expect("Failed to make listener nonblocking");
        let address = format!(
            "tcp://{}",
            listener.local_addr().expect("listener has no address")
        );
        Self { listener, address }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Waits for the next processor connection.
    pub fn accept(&self) -> ValidatorConnection {
        let deadline = Instant::now() + TEST_TIMEOUT;
        loop {
            match self.listener.accept() {
                Ok((socket, _)) => return ValidatorConnection::new(socket),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    assert!(Instant::now() < deadline, "processor never connected");
                    thread::sleep(Duration::from_millis(5));
                }
                Err(err) => panic!("accept failed: {err}"),
            }
        }
    }
}

/// Validator side of one connection, with an in-memory state store that
/// answers the processor's state requests.
pub struct ValidatorConnection {
    socket: TcpStream,
    reader: FrameReader<TcpStream>,
    writer: FrameWriter<TcpStream>,
    pub state: BTreeMap<String, Vec<u8>>,
    pub receipts: Vec<Vec<u8>>,
    pub events: Vec<Event>,
    /// Answer state gets with bytes that do not decode
    pub garbage_state_replies: bool,
}

impl ValidatorConnection {
    fn new(socket: TcpStream) -> Self {
        socket
            .set_nonblocking(false)
            .expect("Failed to make socket blocking");
        socket
            .set_read_timeout(Some(TEST_TIMEOUT))
            .expect("Failed to set read timeout");
        let reader = FrameReader::new(
            socket.try_clone().expect("Failed to clone socket"),
            DEFAULT_MAX_FRAME_BYTES,
        );
        let writer = FrameWriter::new(
            socket.try_clone().expect("Failed to clone socket"),
            DEFAULT_MAX_FRAME_BYTES,
        );
        Self {
            socket,
            reader,
            writer,
            state: BTreeMap::new(),
            receipts: Vec::new(),
            events: Vec::new(),
            garbage_state_replies: false,
        }
    }

    /// Next message from the processor; panics after [`TEST_TIMEOUT`].
    pub fn recv(&mut self) -> Message {
        let body = self
            .reader
            .read_next()
            .expect("validator read failed")
            .expect("processor closed the connection");
        Message::decode(&body).expect("processor sent a malformed envelope")
    }

    /// True once the processor has closed its end.
    pub fn is_closed_by_peer(&mut self) -> bool {
        matches!(self.reader.read_next(), Ok(None) | Err(_))
    }

    pub fn send(&mut self, message: &Message) {
        self.writer
            .write_frame(&message.encode().expect("Failed to encode envelope"))
            .expect("validator write failed");
    }

    pub fn reply<T: Serialize>(&mut self, to: &Message, message_type: MessageType, payload: &T) {
        let reply = Message::with_payload(message_type, to.correlation_id.clone(), payload)
            .expect("Failed to encode reply");
        self.send(&reply);
    }

    /// Reads one register request and acknowledges it.
    pub fn expect_register(&mut self) -> TpRegisterRequest {
        let message = self.recv();
        assert_eq!(message.message_type, MessageType::TpRegisterRequest);
        let request: TpRegisterRequest = message
            .decode_content()
            .expect("undecodable register request");
        self.reply(&message, MessageType::TpRegisterResponse, &TpRegisterResponse::ok());
        request
    }

    /// Reads one unregister request and acknowledges it.
    pub fn expect_unregister(&mut self) {
        let message = self.next_non_state();
        assert_eq!(message.message_type, MessageType::TpUnregisterRequest);
        self.reply(
            &message,
            MessageType::TpUnregisterResponse,
            &TpUnregisterResponse {
                status: RegisterStatus::Ok,
            },
        );
    }

    pub fn ping(&mut self, id: &str) {
        self.send(&Message::new(
            MessageType::PingRequest,
            CorrelationId::from(id),
            b"{}".to_vec(),
        ));
    }

    pub fn send_process_request(&mut self, id: &str, family: &str, version: &str, payload: &[u8]) {
        let request = TpProcessRequest {
            header: TransactionHeader {
                family_name: family.to_string(),
                family_version: version.to_string(),
                ..TransactionHeader::default()
            },
            payload: payload.to_vec(),
            signature: String::new(),
            context_id: ContextId::new(format!("ctx-{id}")),
        };
        let message = Message::with_payload(
            MessageType::TpProcessRequest,
            CorrelationId::from(id),
            &request,
        )
        .expect("Failed to encode process request");
        self.send(&message);
    }

    /// Serves state requests until something else arrives, and returns it.
    pub fn next_non_state(&mut self) -> Message {
        loop {
            let message = self.recv();
            if !self.answer_state(&message) {
                return message;
            }
        }
    }

    /// Answers a state, receipt or event request from the in-memory store.
    /// Returns false for any other kind.
    pub fn answer_state(&mut self, message: &Message) -> bool {
        match message.message_type {
            MessageType::TpStateGetRequest => {
                if self.garbage_state_replies {
                    self.send(&Message::new(
                        MessageType::TpStateGetResponse,
                        message.correlation_id.clone(),
                        b"\x07\x07 definitely not a status".to_vec(),
                    ));
                    return true;
                }
                let request: TpStateGetRequest =
                    message.decode_content().expect("undecodable get");
                let entries = request
                    .addresses
                    .iter()
                    .filter_map(|address| {
                        self.state.get(address).map(|data| TpStateEntry {
                            address: address.clone(),
                            data: data.clone(),
                        })
                    })
                    .collect();
                self.reply(
                    message,
                    MessageType::TpStateGetResponse,
                    &TpStateGetResponse {
                        entries,
                        status: StateStatus::Ok,
                    },
                );
            }
            MessageType::TpStateSetRequest => {
                let request: TpStateSetRequest =
                    message.decode_content().expect("undecodable set");
                let mut addresses = Vec::with_capacity(request.entries.len());
                for entry in request.entries {
                    addresses.push(entry.address.clone());
                    self.state.insert(entry.address, entry.data);
                }
                // echo in reverse so callers cannot rely on order
                addresses.reverse();
                self.reply(
                    message,
                    MessageType::TpStateSetResponse,
                    &TpStateSetResponse {
                        addresses,
                        status: StateStatus::Ok,
                    },
                );
            }
            MessageType::TpStateDeleteRequest => {
                let request: TpStateDeleteRequest =
                    message.decode_content().expect("undecodable delete");
                let addresses = request
                    .addresses
                    .into_iter()
                    .filter(|address| self.state.remove(address).is_some())
                    .collect();
                self.reply(
                    message,
                    MessageType::TpStateDeleteResponse,
                    &TpStateDeleteResponse {
                        addresses,
                        status: StateStatus::Ok,
                    },
                );
            }
            MessageType::TpReceiptAddDataRequest => {
                let request: TpReceiptAddDataRequest =
                    message.decode_content().expect("undecodable receipt");
                self.receipts.push(request.data);
                self.reply(
                    message,
                    MessageType::TpReceiptAddDataResponse,
                    &TpReceiptAddDataResponse {
                        status: AddStatus::Ok,
                    },
                );
            }
            MessageType::TpEventAddRequest => {
                let request: TpEventAddRequest =
                    message.decode_content().expect("undecodable event");
                self.events.push(request.event);
                self.reply(
                    message,
                    MessageType::TpEventAddResponse,
                    &TpEventAddResponse {
                        status: AddStatus::Ok,
                    },
                );
            }
            _ => return false,
        }
        true
    }

    /// Drops the connection from the validator side.
    pub fn disconnect(self) {
        let _ = self.socket.shutdown(std::net::Shutdown::Both);
    }
}

type ApplyFn = dyn Fn(&TpProcessRequest, &dyn Context) -> Result<(), ApplyError> + Send + Sync;

/// Handler whose logic is a closure
pub struct FnHandler {
    family: String,
    version: String,
    namespaces: Vec<String>,
    apply: Box<ApplyFn>,
}

impl FnHandler {
    pub fn new(
        family: &str,
        version: &str,
        apply: impl Fn(&TpProcessRequest, &dyn Context) -> Result<(), ApplyError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            family: family.to_string(),
            version: version.to_string(),
            namespaces: vec!["1cf126".to_string()],
            apply: Box::new(apply),
        })
    }

    /// Handler that accepts every transaction
    pub fn accepting(family: &str, version: &str) -> Arc<Self> {
        Self::new(family, version, |_, _| Ok(()))
    }
}

impl TransactionHandler for FnHandler {
    fn family_name(&self) -> &str {
        &self.family
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn namespaces(&self) -> Vec<String> {
        self.namespaces.clone()
    }

    fn apply(&self, request: &TpProcessRequest, context: &dyn Context) -> Result<(), ApplyError> {
        (self.apply)(request, context)
    }
}

/// Stops the processor from a helper thread while the validator side
/// acknowledges the unregister, then waits for `run` to return.
pub fn stop_and_join(
    processor: &Arc<TransactionProcessor>,
    connection: &mut ValidatorConnection,
    runner: thread::JoinHandle<()>,
) {
    let stopper = {
        let processor = Arc::clone(processor);
        thread::spawn(move || processor.stop())
    };
    connection.expect_unregister();
    stopper.join().expect("stop panicked");
    runner.join().expect("processor thread panicked");
}
