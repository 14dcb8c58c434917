#![forbid(unsafe_code)]

// Duplex text transport to the IDE server

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::TransportError;

/// A persistent text-message connection.
///
/// `recv` yields `None` once the peer has closed the connection.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, message: String) -> Result<(), TransportError>;

    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    async fn close(&mut self) -> Result<(), TransportError>;
}

pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (stream, response) = connect_async(url).await?;
        tracing::debug!("WebSocket handshake to {} returned {}", url, response.status());
        Ok(Self { stream })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, message: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(message.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    tracing::debug!("server closed the connection: {:?}", frame);
                    return None;
                }
                // Pings are answered by tungstenite itself
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
                Ok(Message::Binary(data)) => {
                    tracing::debug!("ignoring {} byte binary frame", data.len());
                }
                Err(tungstenite::Error::ConnectionClosed) => return None,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
