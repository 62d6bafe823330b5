//! Socket seam between the controller and the network.
//!
//! The controller only sees [`Connector`] and [`ChatSocket`]; production code
//! plugs in [`TungsteniteConnector`], tests plug in in-memory channels.

use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::session::CloseReason;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("websocket connect failed: {0}")]
    Connect(String),
    #[error("websocket send failed: {0}")]
    Send(String),
    #[error("websocket close failed: {0}")]
    Close(String),
}

/// What a live socket reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Frame(String),
    Error(String),
    Closed(CloseReason),
}

#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Open a socket. Resolving successfully means the socket is open.
    async fn connect(&self, url: &str) -> Result<Box<dyn ChatSocket>, TransportError>;
}

#[async_trait::async_trait]
pub trait ChatSocket: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound event. Must be cancel-safe: the controller races it
    /// against commands and timers. After `Closed` the socket is dropped.
    async fn next_event(&mut self) -> SocketEvent;

    async fn close(&mut self) -> Result<(), TransportError>;
}

/// `{ws_url}/?token={access_token}`.
#[must_use]
pub fn socket_url(ws_url: &str, access_token: &str) -> String {
    format!("{}/?token={access_token}", ws_url.trim_end_matches('/'))
}

// =============================================================================
// TUNGSTENITE
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait::async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn ChatSocket>, TransportError> {
        let (stream, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Box::new(TungsteniteSocket { stream, pending_close: None }))
    }
}

struct TungsteniteSocket {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    /// Close reported on the call after a transport error, the same order a
    /// browser fires `error` then `close`.
    pending_close: Option<CloseReason>,
}

#[async_trait::async_trait]
impl ChatSocket for TungsteniteSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn next_event(&mut self) -> SocketEvent {
        if let Some(reason) = self.pending_close.take() {
            return SocketEvent::Closed(reason);
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return SocketEvent::Frame(text.as_str().to_owned()),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return SocketEvent::Frame(text),
                    Err(_) => tracing::debug!(len = bytes.len(), "non-UTF-8 binary frame skipped"),
                },
                Some(Ok(Message::Close(frame))) => return SocketEvent::Closed(close_reason(frame)),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => {
                    self.pending_close = Some(CloseReason::abnormal(e.to_string()));
                    return SocketEvent::Error(e.to_string());
                }
                None => return SocketEvent::Closed(CloseReason::abnormal("connection ended")),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream
            .close(Some(CloseFrame { code: CloseCode::Normal, reason: String::new().into() }))
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}

fn close_reason(frame: Option<CloseFrame>) -> CloseReason {
    match frame {
        Some(frame) => CloseReason::new(u16::from(frame.code), frame.reason.as_str()),
        None => CloseReason::new(u16::from(CloseCode::Status), ""),
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
