use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

pub mod websocket;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("channel closed")]
    ChannelClosed,
    #[error("transport setup failed: {0}")]
    Setup(String),
}

/// One message as the socket delivers it, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Binary(Vec<u8>),
    Text(String),
}

/// Channel lifecycle and inbound traffic, delivered strictly in arrival
/// order on a single receiver.
#[derive(Debug)]
pub enum ChannelEvent {
    Opened,
    Message(WireMessage),
    Closed,
    Errored(TransportError),
}

/// Sending half of a channel. `send` is best effort: while the channel is
/// not open it is a silent no-op, never an error. `close` is idempotent and
/// safe to call from teardown paths that may race each other.
#[derive(Clone)]
pub struct ChannelHandle {
    outbound: mpsc::UnboundedSender<WireMessage>,
    open: Arc<AtomicBool>,
    pump: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ChannelHandle {
    fn new(
        outbound: mpsc::UnboundedSender<WireMessage>,
        open: Arc<AtomicBool>,
        pump: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            open,
            pump: Arc::new(Mutex::new(pump)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn send(&self, message: WireMessage) {
        if !self.is_open() {
            trace!(target: "transport::channel", "dropping send on closed channel");
            return;
        }
        if self.outbound.send(message).is_err() {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    pub fn send_bytes(&self, bytes: &[u8]) {
        self.send(WireMessage::Binary(bytes.to_vec()));
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.send(WireMessage::Text(text.into()));
    }

    pub fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            trace!(target: "transport::channel", "channel closed");
        }
        if let Ok(mut guard) = self.pump.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }
}

/// In-memory channel for deterministic tests and embedding: the handle
/// starts open and everything sent through it lands on the returned
/// receiver.
pub fn pair() -> (ChannelHandle, mpsc::UnboundedReceiver<WireMessage>) {
    let (outbound, sent) = mpsc::unbounded_channel();
    let handle = ChannelHandle::new(outbound, Arc::new(AtomicBool::new(true)), None);
    (handle, sent)
}
