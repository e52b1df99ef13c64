//! Error types for the market data adapter

use thiserror::Error;

use crate::types::InstrumentId;

/// Market data adapter errors
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Venue session error: {0}")]
    Session(String),

    #[error("Failed to decode frame: {0}")]
    Decode(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Stream unrecoverable: {0}; automatic reconnect is not implemented")]
    UnrecoverableStream(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Client is still connected")]
    StillConnected,

    #[error("Unknown instrument: {0}")]
    UnknownInstrument(InstrumentId),

    #[error("Instrument directory error: {0}")]
    Directory(String),

    #[error("Unsupported request: {0}")]
    UnsupportedRequest(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for AdapterError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AdapterError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::Decode(err.to_string())
    }
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        AdapterError::Session(err.to_string())
    }
}

impl From<std::io::Error> for AdapterError {
    fn from(err: std::io::Error) -> Self {
        AdapterError::Ipc(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
