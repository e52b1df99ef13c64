//! Streaming transport for the Parimex feed

mod client;

pub use client::MarketStreamClient;

use async_trait::async_trait;

use crate::codec::OutboundMessage;
use crate::error::Result;

/// Outbound half of the streaming connection
///
/// The subscription coordinator and the keep-alive task write through this
/// seam; tests substitute a recording implementation.
#[async_trait]
pub trait StreamSender: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<()>;
}
