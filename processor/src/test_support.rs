//! In-memory [`Stream`] for unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use core_types::CorrelationId;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use messaging::{encode_payload, ChannelError, Message, MessageFuture, MessageType, Stream};
use parking_lot::Mutex;
use serde::Serialize;

type Responder = Box<dyn Fn(MessageType, &[u8]) -> Option<Vec<u8>> + Send + Sync>;

enum Inbound {
    Message(Message),
    Disconnected,
}

/// Answers every `send` through a responder; `None` yields a poisoned
/// future. Unsolicited traffic is pushed by the test.
pub(crate) struct FakeStream {
    responder: Responder,
    sent: Mutex<Vec<(MessageType, Vec<u8>)>>,
    replies: Mutex<Vec<Message>>,
    inbound_tx: Sender<Inbound>,
    inbound_rx: Receiver<Inbound>,
    closed: AtomicBool,
    reconnects: AtomicUsize,
}

impl FakeStream {
    pub(crate) fn with_responder(
        responder: impl Fn(MessageType, &[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    ) -> Self {
        let (inbound_tx, inbound_rx) = channel::unbounded();
        Self {
            responder: Box::new(responder),
            sent: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
            inbound_tx,
            inbound_rx,
            closed: AtomicBool::new(false),
            reconnects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn json<T: Serialize>(reply: &T) -> Self {
        Self::raw(encode_payload(reply).unwrap())
    }

    pub(crate) fn raw(reply: Vec<u8>) -> Self {
        Self::with_responder(move |_, _| Some(reply.clone()))
    }

    pub(crate) fn disconnected() -> Self {
        Self::with_responder(|_, _| None)
    }

    pub(crate) fn push(&self, message: Message) {
        self.inbound_tx.send(Inbound::Message(message)).unwrap();
    }

    pub(crate) fn push_disconnect(&self) {
        self.inbound_tx.send(Inbound::Disconnected).unwrap();
    }

    pub(crate) fn sent(&self) -> Vec<(MessageType, Vec<u8>)> {
        self.sent.lock().clone()
    }

    pub(crate) fn sent_of(&self, message_type: MessageType) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|(kind, _)| *kind == message_type)
            .count()
    }

    pub(crate) fn replies(&self) -> Vec<Message> {
        self.replies.lock().clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    fn unpack(inbound: Inbound) -> Result<Message, ChannelError> {
        match inbound {
            Inbound::Message(message) => Ok(message),
            Inbound::Disconnected => Err(ChannelError::Disconnected),
        }
    }
}

impl Stream for FakeStream {
    fn send(
        &self,
        message_type: MessageType,
        content: Vec<u8>,
    ) -> Result<Arc<MessageFuture>, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        let reply = (self.responder)(message_type, &content);
        self.sent.lock().push((message_type, content));

        let id = CorrelationId::generate();
        match reply {
            Some(reply) => {
                let future = MessageFuture::new(id);
                future.resolve(reply).unwrap();
                Ok(Arc::new(future))
            }
            None => Ok(Arc::new(MessageFuture::poisoned(id))),
        }
    }

    fn send_back(
        &self,
        message_type: MessageType,
        correlation_id: &CorrelationId,
        content: Vec<u8>,
    ) -> Result<(), ChannelError> {
        self.replies
            .lock()
            .push(Message::new(message_type, correlation_id.clone(), content));
        Ok(())
    }

    fn receive(&self) -> Result<Message, ChannelError> {
        match self.inbound_rx.recv() {
            Ok(inbound) => Self::unpack(inbound),
            Err(_) => Err(ChannelError::Closed),
        }
    }

    fn receive_timeout(&self, timeout: Duration) -> Result<Message, ChannelError> {
        match self.inbound_rx.recv_timeout(timeout) {
            Ok(inbound) => Self::unpack(inbound),
            Err(RecvTimeoutError::Timeout) => Err(ChannelError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(ChannelError::Closed),
        }
    }

    fn reconnect(&self) -> Result<(), ChannelError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
