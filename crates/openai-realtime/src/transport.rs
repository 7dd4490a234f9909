//! Connection-level abstractions the conversation engine is written against.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),
    #[error("invalid connection request: {0}")]
    InvalidRequest(String),
    #[error("failed to send frame: {0}")]
    Send(String),
    #[error("failed to receive frame: {0}")]
    Receive(String),
    #[error("connection closed")]
    Closed,
}

/// The sending half of an established connection.
///
/// `send` takes one encoded text frame. Implementations serialize concurrent
/// callers so frames are never interleaved.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, frame: String) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// Opens connections. The engine holds one of these so tests can swap the
/// websocket for an in-memory pair.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, TransportError>;
}

type DisconnectHook = Box<dyn FnOnce() + Send>;

/// Inbound frames of one connection, in arrival order.
///
/// `recv` yields `Some(Err(_))` once for a receive failure and `None` after the
/// peer is gone. The disconnect hook fires the first time the stream ends,
/// whichever way it ends.
pub struct Inbound {
    rx: mpsc::Receiver<Result<String, TransportError>>,
    on_disconnect: Option<DisconnectHook>,
    finished: bool,
}

impl Inbound {
    pub fn new(rx: mpsc::Receiver<Result<String, TransportError>>) -> Self {
        Self {
            rx,
            on_disconnect: None,
            finished: false,
        }
    }

    pub fn on_disconnect(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.on_disconnect = Some(Box::new(hook));
    }

    pub async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        if self.finished {
            return None;
        }
        let next = self.rx.recv().await;
        if matches!(next, None | Some(Err(_))) {
            self.finished = true;
            if let Some(hook) = self.on_disconnect.take() {
                hook();
            }
        }
        next
    }
}

impl std::fmt::Debug for Inbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inbound")
            .field("finished", &self.finished)
            .field("has_disconnect_hook", &self.on_disconnect.is_some())
            .finish()
    }
}

pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub inbound: Inbound,
}

impl Connection {
    pub fn new(transport: Arc<dyn Transport>, inbound: Inbound) -> Self {
        Self { transport, inbound }
    }

    pub fn on_disconnect(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.inbound.on_disconnect(hook);
    }
}
