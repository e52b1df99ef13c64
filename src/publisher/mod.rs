//! Publisher module for IPC communication
//!
//! Publishes normalized engine messages to other system components.

use std::path::Path;

use bytes::{BufMut, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::data::EngineMessage;
use crate::error::{AdapterError, Result};

/// Publisher for sending engine messages via Unix socket
///
/// Messages are MessagePack-encoded and framed with a big-endian u32 length
/// prefix. Transport failures never propagate out of
/// [`publish`](Self::publish); the next call reconnects.
pub struct Publisher {
    socket_path: String,
    stream: Mutex<Option<UnixStream>>,
}

impl Publisher {
    /// Create a new publisher
    pub async fn new(socket_path: &str) -> Result<Self> {
        let publisher = Self {
            socket_path: socket_path.to_string(),
            stream: Mutex::new(None),
        };

        // Initial connection may fail if the consumer isn't up yet
        if let Err(e) = publisher.connect().await {
            warn!(error = %e, "Initial IPC connection failed, will retry on publish");
        }

        Ok(publisher)
    }

    /// Connect to the Unix socket
    async fn connect(&self) -> Result<()> {
        let path = Path::new(&self.socket_path);

        if !path.exists() {
            return Err(AdapterError::Ipc(format!(
                "Socket path does not exist: {}",
                self.socket_path
            )));
        }

        let stream = UnixStream::connect(path).await.map_err(|e| {
            AdapterError::Ipc(format!("Failed to connect to {}: {}", self.socket_path, e))
        })?;

        let mut guard = self.stream.lock().await;
        *guard = Some(stream);

        info!(path = %self.socket_path, "Connected to IPC socket");
        Ok(())
    }

    /// Publish one engine message
    pub async fn publish(&self, message: &EngineMessage) -> Result<()> {
        let data = rmp_serde::to_vec(message)
            .map_err(|e| AdapterError::Serialization(format!("Failed to serialize: {}", e)))?;

        let mut framed = BytesMut::with_capacity(4 + data.len());
        framed.put_u32(data.len() as u32);
        framed.put_slice(&data);

        let mut guard = self.stream.lock().await;

        if guard.is_none() {
            drop(guard);
            if let Err(e) = self.connect().await {
                debug!(error = %e, "Failed to reconnect to IPC socket");
                return Ok(()); // Don't fail on publish errors
            }
            guard = self.stream.lock().await;
        }

        if let Some(stream) = guard.as_mut() {
            match stream.write_all(&framed).await {
                Ok(_) => {
                    debug!(bytes = data.len(), "Published engine message");
                }
                Err(e) => {
                    warn!(error = %e, "Failed to write to IPC socket");
                    *guard = None; // Mark as disconnected
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::InstrumentSearchResponse;
    use crate::types::RequestId;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    fn scratch_socket_path(tag: &str) -> String {
        std::env::temp_dir()
            .join(format!("parimex-md-test-{}-{}.sock", tag, std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    fn sample_message() -> EngineMessage {
        EngineMessage::Response {
            request_id: RequestId(3),
            response: InstrumentSearchResponse {
                instruments: Vec::new(),
                ts_event: 42,
                ts_init: 42,
            },
        }
    }

    #[tokio::test]
    async fn test_publish_without_consumer_is_silent() {
        let publisher = Publisher::new("/nonexistent/parimex.sock").await.unwrap();

        publisher.publish(&sample_message()).await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_frames_messagepack_payload() {
        let path = scratch_socket_path("frame");
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();

        let publisher = Publisher::new(&path).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();

        publisher.publish(&sample_message()).await.unwrap();

        let len = server.read_u32().await.unwrap() as usize;
        let mut payload = vec![0u8; len];
        server.read_exact(&mut payload).await.unwrap();

        let decoded: EngineMessage = rmp_serde::from_slice(&payload).unwrap();
        assert_eq!(decoded, sample_message());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_publish_reconnects_after_consumer_restart() {
        let path = scratch_socket_path("reconnect");
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();

        let publisher = Publisher::new(&path).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        // Consumer goes away; the next writes fail and mark the stream dead
        drop(server);
        drop(listener);
        publisher.publish(&sample_message()).await.unwrap();
        publisher.publish(&sample_message()).await.unwrap();

        // Consumer comes back; publish reconnects and delivers
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        publisher.publish(&sample_message()).await.unwrap();

        let (mut server, _) = listener.accept().await.unwrap();
        let len = server.read_u32().await.unwrap() as usize;
        let mut payload = vec![0u8; len];
        server.read_exact(&mut payload).await.unwrap();

        let decoded: EngineMessage = rmp_serde::from_slice(&payload).unwrap();
        assert_eq!(decoded, sample_message());

        let _ = std::fs::remove_file(&path);
    }
}
