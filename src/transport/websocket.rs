//! WebSocket dialer and frame pump
//!
//! The [`Connector`]/[`Socket`] pair is the seam between the channel's
//! reconnect machinery and the actual wire: production code dials with
//! tokio-tungstenite, tests script the socket.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::Endpoint;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// One established bidirectional socket.
#[async_trait]
pub trait Socket: Send {
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Next inbound text frame; `Ok(None)` when the peer closed cleanly.
    async fn recv_frame(&mut self) -> Result<Option<String>>;
}

/// Dials a socket for a logical endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Socket>>;
}

/// Production connector: dials `{ws_base}{endpoint.path()}`.
pub struct WsConnector {
    ws_base: String,
}

impl WsConnector {
    /// `base_url` is the HTTP(S) API origin; the scheme is rewritten to
    /// ws(s) for the socket.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base = base_url.into();
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base
        };
        Self {
            ws_base: ws_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Socket>> {
        let url = format!("{}{}", self.ws_base, endpoint.path());
        tracing::debug!("connecting WebSocket to {}", url);

        let (stream, response) = connect_async(&url)
            .await
            .with_context(|| format!("WebSocket connection to {} failed", endpoint))?;
        tracing::info!("WebSocket connected to {} (status={})", endpoint, response.status());

        Ok(Box::new(TungsteniteSocket { stream }))
    }
}

struct TungsteniteSocket {
    stream: WsStream,
}

#[async_trait]
impl Socket for TungsteniteSocket {
    async fn send_text(&mut self, text: &str) -> Result<()> {
        self.stream
            .send(Message::Text(text.to_string()))
            .await
            .context("Failed to send WebSocket message")
    }

    async fn recv_frame(&mut self) -> Result<Option<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Ping(data))) => {
                    self.stream
                        .send(Message::Pong(data))
                        .await
                        .context("Failed to send pong")?;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!("WebSocket closed by peer: {:?}", frame);
                    return Ok(None);
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => return Err(e).context("WebSocket receive error"),
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_base_scheme_rewrite() {
        assert_eq!(WsConnector::new("https://chat.test/").ws_base, "wss://chat.test");
        assert_eq!(WsConnector::new("http://localhost:8000").ws_base, "ws://localhost:8000");
    }
}
