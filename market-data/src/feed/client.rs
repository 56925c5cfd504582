//! WebSocket client for exchange streams
//!
//! Handles connection, keep-alive frames and message reception.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::error::{MarketDataError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What a single read from the socket produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Text or binary payload
    Data(String),
    /// Ping or pong; proves the peer is alive
    Control,
    /// The peer closed the connection or the stream ended
    Closed(String),
}

/// WebSocket client for a single connection
pub struct WebSocketClient {
    stream: Option<WsStream>,
    url: String,
}

impl WebSocketClient {
    /// Connect to `url`
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url = %url, "Connecting to WebSocket");

        let (ws_stream, response) = connect_async(url).await?;

        info!(status = ?response.status(), "WebSocket connected");
        Ok(Self {
            stream: Some(ws_stream),
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Receive the next frame
    ///
    /// Pings are answered before returning. After `Closed` every further call
    /// returns `Closed` again.
    pub async fn recv(&mut self) -> Result<Frame> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Frame::Closed("not connected".to_string()));
        };

        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(len = text.len(), "Received text message");
                Ok(Frame::Data(text))
            }
            Some(Ok(Message::Binary(data))) => {
                let text = String::from_utf8_lossy(&data).to_string();
                Ok(Frame::Data(text))
            }
            Some(Ok(Message::Ping(data))) => {
                debug!("Received ping, sending pong");
                stream.send(Message::Pong(data)).await?;
                Ok(Frame::Control)
            }
            Some(Ok(Message::Pong(_))) => {
                debug!("Received pong");
                Ok(Frame::Control)
            }
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "Received close frame");
                self.stream = None;
                let reason = frame
                    .map(|f| format!("{} {}", f.code, f.reason))
                    .unwrap_or_else(|| "close frame".to_string());
                Ok(Frame::Closed(reason))
            }
            Some(Ok(Message::Frame(_))) => Ok(Frame::Control),
            Some(Err(e)) => {
                self.stream = None;
                Err(e.into())
            }
            None => {
                warn!("WebSocket stream ended");
                self.stream = None;
                Ok(Frame::Closed("stream ended".to_string()))
            }
        }
    }

    /// Send a ping to keep connection alive
    pub async fn ping(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| MarketDataError::ConnectionClosed("not connected".to_string()))?;
        stream
            .send(Message::Ping(vec![]))
            .await
            .map_err(|e| MarketDataError::WebSocketMessage(e.to_string()))
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Close the connection
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!(error = %e, "Error while closing WebSocket");
            }
        }
    }
}
