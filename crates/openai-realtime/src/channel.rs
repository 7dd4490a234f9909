//! In-memory transport pair.
//!
//! [`pair`] returns a [`Connection`] for the engine and a [`Peer`] that plays
//! the server: it injects inbound frames and observes every frame sent.

use crate::transport::{Connection, Inbound, Transport, TransportError};
use async_trait::async_trait;
use openai_realtime_types::{ClientEvent, ServerEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

const INBOUND_CAPACITY: usize = 256;

pub fn pair() -> (Connection, Peer) {
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));

    let transport = ChannelTransport {
        sent: sent_tx,
        closed: closed.clone(),
    };
    let connection = Connection::new(Arc::new(transport), Inbound::new(inbound_rx));
    let peer = Peer {
        inbound: Some(inbound_tx),
        sent: sent_rx,
        closed,
    };
    (connection, peer)
}

struct ChannelTransport {
    sent: mpsc::UnboundedSender<String>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.sent.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// The server side of an in-memory connection.
pub struct Peer {
    inbound: Option<mpsc::Sender<Result<String, TransportError>>>,
    sent: mpsc::UnboundedReceiver<String>,
    closed: Arc<AtomicBool>,
}

impl Peer {
    /// Delivers one raw text frame to the client.
    pub async fn push(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        let inbound = self.inbound.as_ref().ok_or(TransportError::Closed)?;
        inbound
            .send(Ok(frame.into()))
            .await
            .map_err(|_| TransportError::Closed)
    }

    pub async fn push_event(&self, event: &ServerEvent) -> Result<(), TransportError> {
        let frame = serde_json::to_string(event).map_err(|e| TransportError::Send(e.to_string()))?;
        self.push(frame).await
    }

    /// Delivers a receive failure. The client's inbound stream ends after it.
    pub async fn fail(&mut self, reason: impl Into<String>) {
        if let Some(inbound) = self.inbound.take() {
            let _ = inbound.send(Err(TransportError::Receive(reason.into()))).await;
        }
    }

    /// Ends the inbound stream without an error.
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    pub async fn next_sent(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    /// The next frame the client sent, decoded. Frames that are not client
    /// events are skipped.
    pub async fn next_sent_event(&mut self) -> Option<ClientEvent> {
        while let Some(frame) = self.sent.recv().await {
            if let Ok(event) = serde_json::from_str(&frame) {
                return Some(event);
            }
        }
        None
    }

    pub fn try_next_sent(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
