//! WebSocket client for the Parimex streaming feed
//!
//! Handles connection, stream authentication, and message reception. The
//! write half sits behind a mutex so the coordinator and keep-alive task can
//! send concurrently with the read loop.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::StreamSender;
use crate::codec::OutboundMessage;
use crate::error::{AdapterError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client for a single streaming connection
pub struct MarketStreamClient {
    endpoint: String,
    api_key: String,
    writer: Mutex<Option<SplitSink<WsStream, Message>>>,
    reader: Mutex<Option<SplitStream<WsStream>>>,
    connected: AtomicBool,
}

impl MarketStreamClient {
    /// Create a new stream client
    pub fn new(endpoint: &str, api_key: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            api_key: api_key.to_string(),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Connect and authenticate against an open venue session
    pub async fn connect(&self, session_token: &str) -> Result<()> {
        info!(url = %self.endpoint, "Connecting to Parimex stream");

        let (ws_stream, response) = connect_async(&self.endpoint).await.map_err(|e| {
            AdapterError::Transport(format!("Failed to connect: {}", e))
        })?;

        info!(status = ?response.status(), "Stream connected");

        let (mut write, read) = ws_stream.split();

        // Authenticate before anything queued behind the writer lock goes out
        let auth = OutboundMessage::Authenticate {
            api_key: self.api_key.clone(),
            session: session_token.to_string(),
        };
        write
            .send(Message::Text(auth.encode()?))
            .await
            .map_err(|e| AdapterError::Transport(format!("Failed to authenticate: {}", e)))?;

        *self.writer.lock().await = Some(write);
        *self.reader.lock().await = Some(read);
        self.connected.store(true, Ordering::SeqCst);

        Ok(())
    }

    /// Receive the next text frame
    ///
    /// `Ok(None)` covers control frames the caller should skip.
    pub async fn recv(&self) -> Result<Option<String>> {
        let mut guard = self.reader.lock().await;
        let stream = guard.as_mut().ok_or(AdapterError::NotConnected)?;

        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(len = text.len(), "Received text frame");
                Ok(Some(text))
            }
            Some(Ok(Message::Binary(data))) => {
                let text = String::from_utf8_lossy(&data).to_string();
                Ok(Some(text))
            }
            Some(Ok(Message::Ping(data))) => {
                debug!("Received ping, sending pong");
                let mut writer = self.writer.lock().await;
                if let Some(sink) = writer.as_mut() {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Ok(None)
            }
            Some(Ok(Message::Pong(_))) => {
                debug!("Received pong");
                Ok(None)
            }
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "Received close frame");
                *guard = None;
                self.connected.store(false, Ordering::SeqCst);
                Err(AdapterError::Transport("Connection closed".to_string()))
            }
            Some(Ok(Message::Frame(_))) => Ok(None),
            Some(Err(e)) => {
                error!(error = %e, "Stream error");
                *guard = None;
                self.connected.store(false, Ordering::SeqCst);
                Err(AdapterError::Transport(e.to_string()))
            }
            None => {
                warn!("Stream ended");
                *guard = None;
                self.connected.store(false, Ordering::SeqCst);
                Err(AdapterError::Transport("Stream ended".to_string()))
            }
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Close the write half; the read side observes the close in turn
    pub async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);

        let mut guard = self.writer.lock().await;
        if let Some(mut sink) = guard.take() {
            sink.close()
                .await
                .map_err(|e| AdapterError::Transport(e.to_string()))?;
        }

        Ok(())
    }
}

#[async_trait]
impl StreamSender for MarketStreamClient {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let text = message.encode()?;

        let mut guard = self.writer.lock().await;
        let sink = guard.as_mut().ok_or(AdapterError::NotConnected)?;

        if let Err(e) = sink.send(Message::Text(text)).await {
            error!(error = %e, "Failed to send on stream");
            *guard = None;
            self.connected.store(false, Ordering::SeqCst);
            return Err(AdapterError::Transport(e.to_string()));
        }

        Ok(())
    }
}
