//! TCP duplex channel to the validator
//!
//! A [`SocketChannel`] owns one connection and three kinds of state shared
//! across threads:
//!
//! - the pending table: correlation id -> [`MessageFuture`], plus the
//!   connection state, behind one lock so that a disconnect clears it
//!   atomically with respect to new sends
//! - the unsolicited queue: messages without a pending future, in arrival
//!   order, plus the disconnect sentinel
//! - the writer: every outbound frame goes through one lock so concurrent
//!   senders never interleave partial frames
//!
//! Each connection runs two background threads. The receive loop reads
//! frames and routes them by correlation id. The disconnect monitor waits
//! for transport events and, on disconnect, poisons every pending future,
//! flushes the unsolicited queue and enqueues a single sentinel.

use std::collections::HashMap;
use std::io;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use core_types::CorrelationId;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::ChannelError;
use crate::frame::{FrameReader, FrameWriter, DEFAULT_MAX_FRAME_BYTES};
use crate::future::MessageFuture;
use crate::message::{Message, MessageType};
use crate::stream::Stream;

/// Connection settings for a [`SocketChannel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Validator endpoint, `host:port` or `tcp://host:port`
    pub address: String,
    /// Largest frame body accepted or sent; larger inbound frames are skipped
    pub max_frame_bytes: usize,
    /// Bound on each dial attempt
    pub connect_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// The address with any `tcp://` scheme removed
    pub fn socket_address(&self) -> &str {
        self.address
            .strip_prefix("tcp://")
            .unwrap_or(&self.address)
    }
}

/// Lifecycle of the underlying connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dialing; senders wait for the outcome
    Connecting,
    Connected,
    /// Lost or never established; sends fail fast until reconnected
    Disconnected,
    /// Closed locally; terminal
    Closed,
}

enum Inbound {
    Message(Message),
    Disconnected,
}

enum TransportEvent {
    Connected,
    Disconnected,
}

struct PendingTable {
    state: ConnectionState,
    futures: HashMap<CorrelationId, Arc<MessageFuture>>,
}

struct Shared {
    config: ChannelConfig,
    pending: Mutex<PendingTable>,
    state_changed: Condvar,
    writer: Mutex<Option<FrameWriter<TcpStream>>>,
    inbound_tx: Sender<Inbound>,
    inbound_rx: Receiver<Inbound>,
}

impl Shared {
    /// Waits out the connect barrier and returns the locked table.
    fn settled(&self) -> MutexGuard<'_, PendingTable> {
        let mut table = self.pending.lock();
        while table.state == ConnectionState::Connecting {
            self.state_changed.wait(&mut table);
        }
        table
    }

    fn state(&self) -> ConnectionState {
        self.pending.lock().state
    }

    fn insert_pending(&self) -> Result<Arc<MessageFuture>, ChannelError> {
        let mut table = self.settled();
        match table.state {
            ConnectionState::Connected => {}
            ConnectionState::Closed => return Err(ChannelError::Closed),
            _ => return Err(ChannelError::Disconnected),
        }
        let correlation_id = loop {
            let id = CorrelationId::generate();
            if !table.futures.contains_key(&id) {
                break id;
            }
        };
        let future = Arc::new(MessageFuture::new(correlation_id.clone()));
        table.futures.insert(correlation_id, Arc::clone(&future));
        Ok(future)
    }

    fn take_pending(&self, correlation_id: &CorrelationId) -> Option<Arc<MessageFuture>> {
        self.pending.lock().futures.remove(correlation_id)
    }

    fn write(&self, message: &Message) -> Result<(), ChannelError> {
        let bytes = message.encode()?;
        let written = {
            let mut writer = self.writer.lock();
            writer.as_mut().map(|writer| writer.write_frame(&bytes))
        };
        match written {
            Some(result) => result.map(|_| ()).map_err(ChannelError::from),
            None if self.state() == ConnectionState::Closed => Err(ChannelError::Closed),
            None => Err(ChannelError::Disconnected),
        }
    }

    /// Routes one inbound message: resolve its future, or queue it.
    fn dispatch(&self, message: Message) {
        match self.take_pending(&message.correlation_id) {
            Some(future) => {
                if let Err(err) = future.resolve(message.content) {
                    tracing::debug!("reply for {} not recorded: {err}", message.correlation_id);
                }
            }
            None => {
                let _ = self.inbound_tx.send(Inbound::Message(message));
            }
        }
    }

    /// Returns false when the channel was closed while dialing.
    fn mark_connected(&self, stream: TcpStream) -> bool {
        let mut table = self.pending.lock();
        if table.state != ConnectionState::Connecting {
            return false;
        }
        *self.writer.lock() = Some(FrameWriter::new(stream, self.config.max_frame_bytes));
        table.state = ConnectionState::Connected;
        drop(table);
        self.state_changed.notify_all();
        true
    }

    /// Poisons every pending future, flushes the unsolicited queue and
    /// enqueues one sentinel. Returns the number of futures poisoned.
    fn handle_disconnect(&self) -> usize {
        let mut table = self.pending.lock();
        if table.state != ConnectionState::Closed {
            table.state = ConnectionState::Disconnected;
        }
        self.writer.lock().take();

        let poisoned = table
            .futures
            .drain()
            .filter(|(_, future)| future.poison())
            .count();

        loop {
            match self.inbound_rx.try_recv() {
                Ok(Inbound::Message(message)) => {
                    tracing::debug!(
                        "discarding {} queued before disconnect",
                        message.message_type
                    );
                }
                Ok(Inbound::Disconnected) => {}
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        let _ = self.inbound_tx.send(Inbound::Disconnected);
        drop(table);

        self.state_changed.notify_all();
        poisoned
    }

    /// Drops queued disconnect sentinels, keeping messages in order. Called
    /// with the pending lock held so no disconnect can interleave.
    fn discard_sentinels(&self) {
        let kept: Vec<Message> = self
            .inbound_rx
            .try_iter()
            .filter_map(|inbound| match inbound {
                Inbound::Message(message) => Some(message),
                Inbound::Disconnected => None,
            })
            .collect();
        for message in kept {
            let _ = self.inbound_tx.send(Inbound::Message(message));
        }
    }

    fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }
}

/// [`Stream`] over a single TCP connection
pub struct SocketChannel {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SocketChannel {
    /// Starts dialing `address` in the background and returns immediately.
    ///
    /// Sends issued before the connection is up block until it either
    /// succeeds or fails.
    pub fn connect(address: impl Into<String>) -> Result<Self, ChannelError> {
        Self::with_config(ChannelConfig::new(address))
    }

    pub fn with_config(config: ChannelConfig) -> Result<Self, ChannelError> {
        let (inbound_tx, inbound_rx) = channel::unbounded();
        let shared = Arc::new(Shared {
            config,
            pending: Mutex::new(PendingTable {
                state: ConnectionState::Connecting,
                futures: HashMap::new(),
            }),
            state_changed: Condvar::new(),
            writer: Mutex::new(None),
            inbound_tx,
            inbound_rx,
        });

        let threads = spawn_connection(&shared)?;
        Ok(Self {
            shared,
            threads: Mutex::new(threads),
        })
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Blocks until the initial dial has either connected or failed.
    pub fn wait_connected(&self) -> ConnectionState {
        self.shared.settled().state
    }

    /// Number of sends still waiting for a reply
    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().futures.len()
    }
}

impl Stream for SocketChannel {
    fn send(
        &self,
        message_type: MessageType,
        content: Vec<u8>,
    ) -> Result<Arc<MessageFuture>, ChannelError> {
        let future = self.shared.insert_pending()?;
        let message = Message::new(message_type, future.correlation_id().clone(), content);
        if let Err(err) = self.shared.write(&message) {
            self.shared.take_pending(future.correlation_id());
            return Err(err);
        }
        Ok(future)
    }

    fn send_back(
        &self,
        message_type: MessageType,
        correlation_id: &CorrelationId,
        content: Vec<u8>,
    ) -> Result<(), ChannelError> {
        drop(self.shared.settled());
        self.shared
            .write(&Message::new(message_type, correlation_id.clone(), content))
    }

    fn receive(&self) -> Result<Message, ChannelError> {
        if self.shared.is_closed() {
            return match self.shared.inbound_rx.try_recv() {
                Ok(Inbound::Message(message)) => Ok(message),
                Ok(Inbound::Disconnected) => Err(ChannelError::Disconnected),
                Err(_) => Err(ChannelError::Closed),
            };
        }
        match self.shared.inbound_rx.recv() {
            Ok(Inbound::Message(message)) => Ok(message),
            Ok(Inbound::Disconnected) => Err(ChannelError::Disconnected),
            Err(_) => Err(ChannelError::Closed),
        }
    }

    fn receive_timeout(&self, timeout: Duration) -> Result<Message, ChannelError> {
        match self.shared.inbound_rx.recv_timeout(timeout) {
            Ok(Inbound::Message(message)) => Ok(message),
            Ok(Inbound::Disconnected) => Err(ChannelError::Disconnected),
            Err(RecvTimeoutError::Timeout) if self.shared.is_closed() => Err(ChannelError::Closed),
            Err(RecvTimeoutError::Timeout) => Err(ChannelError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Closed),
        }
    }

    fn reconnect(&self) -> Result<(), ChannelError> {
        {
            let mut table = self.shared.pending.lock();
            match table.state {
                ConnectionState::Connected | ConnectionState::Connecting => return Ok(()),
                ConnectionState::Closed => return Err(ChannelError::Closed),
                ConnectionState::Disconnected => table.state = ConnectionState::Connecting,
            }
            self.shared.discard_sentinels();
        }
        tracing::info!("reconnecting to validator at {}", self.shared.config.address);

        match spawn_connection(&self.shared) {
            Ok(handles) => {
                let mut threads = self.threads.lock();
                threads.retain(|handle| !handle.is_finished());
                threads.extend(handles);
                Ok(())
            }
            Err(err) => {
                self.shared.pending.lock().state = ConnectionState::Disconnected;
                self.shared.state_changed.notify_all();
                Err(err)
            }
        }
    }

    fn close(&self) {
        let writer = {
            let mut table = self.shared.pending.lock();
            if table.state != ConnectionState::Closed {
                table.state = ConnectionState::Closed;
            }
            self.shared.writer.lock().take()
        };
        self.shared.state_changed.notify_all();

        if let Some(writer) = writer {
            let _ = writer.get_ref().shutdown(Shutdown::Both);
        }

        let handles = std::mem::take(&mut *self.threads.lock());
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn spawn_connection(shared: &Arc<Shared>) -> Result<Vec<JoinHandle<()>>, ChannelError> {
    let (events_tx, events_rx) = channel::unbounded();

    let monitor = {
        let shared = Arc::clone(shared);
        thread::Builder::new()
            .name("tp-disconnect-monitor".to_string())
            .spawn(move || run_disconnect_monitor(shared, events_rx))?
    };
    let receiver = {
        let shared = Arc::clone(shared);
        thread::Builder::new()
            .name("tp-receive".to_string())
            .spawn(move || run_connection(shared, events_tx))?
    };
    Ok(vec![receiver, monitor])
}

fn dial(config: &ChannelConfig) -> io::Result<TcpStream> {
    let addrs: Vec<SocketAddr> = config.socket_address().to_socket_addrs()?.collect();
    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.connect_timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("no address resolved for {}", config.address),
        )
    }))
}

fn run_connection(shared: Arc<Shared>, events: Sender<TransportEvent>) {
    let stream = match dial(&shared.config) {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!("failed to connect to validator at {}: {err}", shared.config.address);
            let _ = events.send(TransportEvent::Disconnected);
            return;
        }
    };
    let _ = stream.set_nodelay(true);

    let writer = match stream.try_clone() {
        Ok(writer) => writer,
        Err(err) => {
            tracing::warn!("failed to clone validator socket: {err}");
            let _ = stream.shutdown(Shutdown::Both);
            let _ = events.send(TransportEvent::Disconnected);
            return;
        }
    };
    if !shared.mark_connected(writer) {
        let _ = stream.shutdown(Shutdown::Both);
        let _ = events.send(TransportEvent::Disconnected);
        return;
    }
    let _ = events.send(TransportEvent::Connected);

    run_receive_loop(&shared, stream);
    let _ = events.send(TransportEvent::Disconnected);
}

fn run_receive_loop(shared: &Shared, stream: TcpStream) {
    let mut frames = FrameReader::new(stream, shared.config.max_frame_bytes);
    loop {
        match frames.read_next() {
            Ok(Some(body)) => match Message::decode(&body) {
                Ok(message) => shared.dispatch(message),
                Err(err) => tracing::warn!("dropping malformed message from validator: {err}"),
            },
            Ok(None) => {
                if !shared.is_closed() {
                    tracing::info!("validator closed the connection");
                }
                return;
            }
            Err(err) if err.is_recoverable() => {
                tracing::warn!("dropping malformed frame from validator: {err}");
            }
            Err(err) => {
                if !shared.is_closed() {
                    tracing::warn!("validator connection failed: {err}");
                }
                return;
            }
        }
    }
}

fn run_disconnect_monitor(shared: Arc<Shared>, events: Receiver<TransportEvent>) {
    for event in events.iter() {
        match event {
            TransportEvent::Connected => {
                tracing::info!("connected to validator at {}", shared.config.address);
            }
            TransportEvent::Disconnected => {
                let poisoned = shared.handle_disconnect();
                tracing::info!(poisoned, "validator connection down");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;
    use std::collections::HashSet;
    use std::io::Write;
    use std::net::TcpListener;

    const WAIT: Duration = Duration::from_secs(5);

    fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = format!("tcp://{}", listener.local_addr().unwrap());
        (listener, address)
    }

    fn read_message(reader: &mut FrameReader<TcpStream>) -> Message {
        let body = reader.read_next().unwrap().unwrap();
        Message::decode(&body).unwrap()
    }

    fn write_message(writer: &mut FrameWriter<TcpStream>, message: &Message) {
        writer.write_frame(&message.encode().unwrap()).unwrap();
    }

    fn accept(listener: &TcpListener) -> (FrameReader<TcpStream>, FrameWriter<TcpStream>) {
        let (socket, _) = listener.accept().unwrap();
        let reader = FrameReader::new(socket.try_clone().unwrap(), DEFAULT_MAX_FRAME_BYTES);
        let writer = FrameWriter::new(socket, DEFAULT_MAX_FRAME_BYTES);
        (reader, writer)
    }

    #[test]
    fn test_config_strips_tcp_scheme() {
        assert_eq!(
            ChannelConfig::new("tcp://localhost:4004").socket_address(),
            "localhost:4004"
        );
        assert_eq!(
            ChannelConfig::new("localhost:4004").socket_address(),
            "localhost:4004"
        );
    }

    #[test]
    fn test_reply_resolves_future_and_unsolicited_is_queued() {
        let (listener, address) = listen();
        let channel = SocketChannel::connect(address).unwrap();
        let (mut reader, mut writer) = accept(&listener);

        let future = channel
            .send(MessageType::TpRegisterRequest, b"register".to_vec())
            .unwrap();
        let request = read_message(&mut reader);
        assert_eq!(request.message_type, MessageType::TpRegisterRequest);
        assert_eq!(request.content, b"register");

        write_message(
            &mut writer,
            &Message::new(
                MessageType::PingRequest,
                CorrelationId::from("validator-1"),
                b"{}".to_vec(),
            ),
        );
        write_message(
            &mut writer,
            &Message::new(
                MessageType::TpRegisterResponse,
                request.correlation_id.clone(),
                b"ack".to_vec(),
            ),
        );

        assert_eq!(future.result_timeout(WAIT).unwrap(), b"ack");
        assert_eq!(channel.pending_count(), 0);

        let unsolicited = channel.receive_timeout(WAIT).unwrap();
        assert_eq!(unsolicited.message_type, MessageType::PingRequest);
        assert_eq!(unsolicited.correlation_id.as_str(), "validator-1");
    }

    #[test]
    fn test_unsolicited_messages_arrive_in_order() {
        let (listener, address) = listen();
        let channel = SocketChannel::connect(address).unwrap();
        let (_reader, mut writer) = accept(&listener);

        for i in 0..20 {
            write_message(
                &mut writer,
                &Message::new(
                    MessageType::TpProcessRequest,
                    CorrelationId::from_string(format!("req-{i}")),
                    vec![i as u8],
                ),
            );
        }
        for i in 0..20 {
            let message = channel.receive_timeout(WAIT).unwrap();
            assert_eq!(message.correlation_id.as_str(), format!("req-{i}"));
        }
        assert!(matches!(
            channel.receive_timeout(Duration::from_millis(20)),
            Err(ChannelError::Timeout)
        ));
    }

    #[test]
    fn test_send_back_reuses_correlation_id_without_pending_entry() {
        let (listener, address) = listen();
        let channel = SocketChannel::connect(address).unwrap();
        let (mut reader, _writer) = accept(&listener);

        channel
            .send_back(
                MessageType::PingResponse,
                &CorrelationId::from("validator-9"),
                b"{}".to_vec(),
            )
            .unwrap();
        let reply = read_message(&mut reader);
        assert_eq!(reply.message_type, MessageType::PingResponse);
        assert_eq!(reply.correlation_id.as_str(), "validator-9");
        assert_eq!(channel.pending_count(), 0);
    }

    #[test]
    fn test_malformed_frames_are_dropped_without_killing_the_loop() {
        let (listener, address) = listen();
        let channel = SocketChannel::connect(address).unwrap();
        let (socket, _) = listener.accept().unwrap();
        let mut raw = socket.try_clone().unwrap();

        raw.write_all(&encode_frame(b"definitely not json", 1024).unwrap())
            .unwrap();
        let good = Message::new(
            MessageType::PingRequest,
            CorrelationId::from("after-garbage"),
            Vec::new(),
        );
        raw.write_all(&encode_frame(&good.encode().unwrap(), 1024).unwrap())
            .unwrap();

        let message = channel.receive_timeout(WAIT).unwrap();
        assert_eq!(message.correlation_id.as_str(), "after-garbage");
        assert_eq!(channel.state(), ConnectionState::Connected);
        drop(socket);
    }

    #[test]
    fn test_concurrent_sends_get_their_own_replies() {
        let (listener, address) = listen();
        let channel = Arc::new(SocketChannel::connect(address).unwrap());
        let (mut reader, mut writer) = accept(&listener);

        let echo = thread::spawn(move || {
            for _ in 0..32 {
                let request = read_message(&mut reader);
                let reply = Message::new(
                    MessageType::TpStateGetResponse,
                    request.correlation_id,
                    request.content,
                );
                write_message(&mut writer, &reply);
            }
        });

        let senders: Vec<_> = (0..32u32)
            .map(|i| {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    let content = i.to_le_bytes().to_vec();
                    let future = channel
                        .send(MessageType::TpStateGetRequest, content.clone())
                        .unwrap();
                    assert_eq!(future.result_timeout(WAIT).unwrap(), content);
                    future.correlation_id().clone()
                })
            })
            .collect();

        let ids: HashSet<CorrelationId> = senders
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();
        assert_eq!(ids.len(), 32);
        assert_eq!(channel.pending_count(), 0);
        echo.join().unwrap();
    }

    #[test]
    fn test_disconnect_poisons_pending_and_enqueues_one_sentinel() {
        let (listener, address) = listen();
        let channel = SocketChannel::connect(address).unwrap();
        let (mut reader, writer) = accept(&listener);

        let futures: Vec<_> = (0..5)
            .map(|_| {
                channel
                    .send(MessageType::TpStateGetRequest, b"{}".to_vec())
                    .unwrap()
            })
            .collect();
        for _ in 0..5 {
            read_message(&mut reader);
        }
        drop(reader);
        drop(writer);

        assert!(matches!(
            channel.receive_timeout(WAIT),
            Err(ChannelError::Disconnected)
        ));
        for future in &futures {
            assert_eq!(
                future.result_timeout(WAIT),
                Err(crate::FutureError::Disconnected)
            );
        }
        assert_eq!(channel.pending_count(), 0);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(matches!(
            channel.receive_timeout(Duration::from_millis(50)),
            Err(ChannelError::Timeout)
        ));

        // fails fast once the transport is known to be down
        assert!(matches!(
            channel.send(MessageType::TpStateGetRequest, Vec::new()),
            Err(ChannelError::Disconnected)
        ));
    }

    #[test]
    fn test_failed_dial_releases_senders_and_wakes_receiver() {
        let (listener, address) = listen();
        drop(listener);

        let channel = SocketChannel::connect(address).unwrap();
        assert!(matches!(
            channel.send(MessageType::TpRegisterRequest, Vec::new()),
            Err(ChannelError::Disconnected)
        ));
        assert!(matches!(
            channel.receive_timeout(WAIT),
            Err(ChannelError::Disconnected)
        ));
    }

    #[test]
    fn test_reconnect_after_disconnect() {
        let (listener, address) = listen();
        let channel = SocketChannel::connect(address).unwrap();
        let (reader, writer) = accept(&listener);
        assert_eq!(channel.wait_connected(), ConnectionState::Connected);
        drop(reader);
        drop(writer);
        assert!(matches!(
            channel.receive_timeout(WAIT),
            Err(ChannelError::Disconnected)
        ));

        channel.reconnect().unwrap();
        let (mut reader, mut writer) = accept(&listener);
        let future = channel
            .send(MessageType::TpRegisterRequest, b"again".to_vec())
            .unwrap();
        let request = read_message(&mut reader);
        write_message(
            &mut writer,
            &Message::new(
                MessageType::TpRegisterResponse,
                request.correlation_id,
                b"ok".to_vec(),
            ),
        );
        assert_eq!(future.result_timeout(WAIT).unwrap(), b"ok");
    }

    #[test]
    fn test_reconnect_discards_sentinel_from_lost_connection() {
        let (listener, address) = listen();
        let channel = SocketChannel::connect(address).unwrap();
        let (mut reader, writer) = accept(&listener);
        let future = channel
            .send(MessageType::TpRegisterRequest, b"first".to_vec())
            .unwrap();
        read_message(&mut reader);
        drop(reader);
        drop(writer);
        assert_eq!(future.result_timeout(WAIT), Err(crate::FutureError::Disconnected));

        channel.reconnect().unwrap();
        let (_reader, mut writer) = accept(&listener);
        assert!(matches!(
            channel.receive_timeout(Duration::from_millis(100)),
            Err(ChannelError::Timeout)
        ));

        write_message(
            &mut writer,
            &Message::new(
                MessageType::PingRequest,
                CorrelationId::from("after-reconnect"),
                b"{}".to_vec(),
            ),
        );
        let message = channel.receive_timeout(WAIT).unwrap();
        assert_eq!(message.message_type, MessageType::PingRequest);
    }

    #[test]
    fn test_close_is_idempotent_and_terminal() {
        let (listener, address) = listen();
        let channel = SocketChannel::connect(address).unwrap();
        let (_reader, _writer) = accept(&listener);
        assert_eq!(channel.wait_connected(), ConnectionState::Connected);

        channel.close();
        channel.close();
        assert_eq!(channel.state(), ConnectionState::Closed);
        assert!(matches!(
            channel.send(MessageType::PingResponse, Vec::new()),
            Err(ChannelError::Closed)
        ));
        assert!(matches!(channel.reconnect(), Err(ChannelError::Closed)));
    }
}
