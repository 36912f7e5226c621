//! Event stream transport
//!
//! Plugins publish their event streams over WebSocket with JSON text
//! frames. The transport layer only connects, receives and sends; envelope
//! decoding belongs to the event loop.

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::debug;

use crate::error::{NodeError, Result};

#[async_trait]
pub trait EventTransport: Send {
    /// Next text frame; `None` when the stream has closed.
    async fn recv(&mut self) -> Result<Option<String>>;

    async fn send(&mut self, text: String) -> Result<()>;
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// WebSocket-backed event transport.
pub struct WsTransport {
    sink: WsSink,
    stream: WsStream,
}

impl WsTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        debug!(url = %url, "Connecting to plugin event stream");
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| NodeError::EventStream(format!("WebSocket connect failed: {e}")))?;
        let (sink, stream) = ws.split();
        debug!(url = %url, "Plugin event stream connected");
        Ok(Self { sink, stream })
    }
}

#[async_trait]
impl EventTransport for WsTransport {
    async fn recv(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
                Some(Ok(Message::Close(_))) => return Ok(None),
                // Ping/pong are handled by tungstenite; skip binary frames.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(NodeError::EventStream(format!("WebSocket error: {e}")))
                }
                None => return Ok(None),
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<()> {
        self.sink
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| NodeError::EventStream(format!("WebSocket send failed: {e}")))
    }
}
