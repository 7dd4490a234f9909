//! Websocket transport to the hosted realtime endpoint.

use crate::transport::{Connection, Connector, Inbound, Transport, TransportError};
use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

pub const DEFAULT_URL: &str = "wss://api.openai.com/v1/realtime";
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";

const INBOUND_CAPACITY: usize = 256;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// What the connection is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Intent {
    #[default]
    Conversation,
    Transcription,
}

#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    model: String,
    api_key: SecretString,
    intent: Intent,
}

impl WebSocketConnector {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key,
            intent: Intent::Conversation,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        self.intent = intent;
        self
    }

    pub fn endpoint(&self) -> String {
        let base = self.url.trim_end_matches('/');
        let sep = if base.contains('?') { '&' } else { '?' };
        match self.intent {
            Intent::Conversation => format!("{base}{sep}model={}", self.model),
            Intent::Transcription => format!("{base}{sep}intent=transcription"),
        }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Connection, TransportError> {
        let endpoint = self.endpoint();
        let mut request = endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        let bearer = format!("Bearer {}", self.api_key.expose_secret())
            .parse()
            .map_err(|_| TransportError::InvalidRequest("api key is not a valid header value".into()))?;
        request.headers_mut().insert("Authorization", bearer);
        request.headers_mut().insert(
            "OpenAI-Beta",
            "realtime=v1"
                .parse()
                .map_err(|_| TransportError::InvalidRequest("invalid beta header".into()))?,
        );

        let (ws_stream, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (sink, mut stream) = ws_stream.split();
        info!(endpoint = %endpoint, "Connected to realtime endpoint.");

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => {
                        if tx.send(Ok(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(frame)) => {
                        debug!(?frame, "Realtime endpoint closed the connection.");
                        break;
                    }
                    Ok(WsMessage::Binary(data)) => {
                        warn!(len = data.len(), "Ignoring unexpected binary frame.");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx.send(Err(TransportError::Receive(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        let transport = WebSocketTransport {
            sink: Mutex::new(sink),
            reader,
        };
        Ok(Connection::new(Arc::new(transport), Inbound::new(rx)))
    }
}

struct WebSocketTransport {
    sink: Mutex<WsSink>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: String) -> Result<(), TransportError> {
        self.sink
            .lock()
            .await
            .send(WsMessage::Text(frame.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        let result = self
            .sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| TransportError::Send(e.to_string()));
        self.reader.abort();
        result
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connector() -> WebSocketConnector {
        WebSocketConnector::new(SecretString::from("sk-test".to_string()))
    }

    #[test]
    fn test_endpoint_for_conversation() {
        let connector = connector().with_model("gpt-4o-realtime-preview-2024-12-17");
        assert_eq!(
            connector.endpoint(),
            "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview-2024-12-17"
        );
    }

    #[test]
    fn test_endpoint_for_transcription() {
        let connector = connector()
            .with_url("wss://example.test/v1/realtime/")
            .with_intent(Intent::Transcription);
        assert_eq!(
            connector.endpoint(),
            "wss://example.test/v1/realtime?intent=transcription"
        );
    }

    #[test]
    fn test_endpoint_keeps_existing_query() {
        let connector = connector().with_url("wss://proxy.test/realtime?region=eu");
        assert_eq!(
            connector.endpoint(),
            format!("wss://proxy.test/realtime?region=eu&model={DEFAULT_MODEL}")
        );
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let rendered = format!("{:?}", connector());
        assert!(!rendered.contains("sk-test"));
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        // nothing listens on port 9 locally
        let connector = connector().with_url("ws://127.0.0.1:9/v1/realtime");
        match connector.connect().await {
            Err(TransportError::Connect(_)) => {}
            Err(other) => panic!("expected Connect, got {other:?}"),
            Ok(_) => panic!("expected a connection failure"),
        }
    }
}
