//! Downstream delivery seams
//!
//! The adapter never talks to the engine directly; it hands normalized data
//! to a [`DataSink`] and delegates unknown request kinds to a
//! [`RequestHandler`]. The channel implementations here back the binary.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::data::{DataEvent, DataRequest, EngineMessage, InstrumentSearchResponse};
use crate::error::{AdapterError, Result};
use crate::types::RequestId;

/// Downstream consumer of normalized data
pub trait DataSink: Send + Sync {
    /// Deliver one data event
    fn handle_data(&self, event: DataEvent);

    /// Deliver the response to a correlated request
    fn handle_data_response(&self, request_id: RequestId, response: InstrumentSearchResponse);
}

/// Sink forwarding onto an unbounded engine channel
///
/// Delivery is fire-and-forget: a closed channel is logged, never an error,
/// so a consumer shutdown cannot take the stream dispatcher down with it.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<EngineMessage>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<EngineMessage>) -> Self {
        Self { sender }
    }
}

impl DataSink for ChannelSink {
    fn handle_data(&self, event: DataEvent) {
        if self.sender.send(EngineMessage::Data(event)).is_err() {
            warn!("Engine channel closed, dropping data event");
        }
    }

    fn handle_data_response(&self, request_id: RequestId, response: InstrumentSearchResponse) {
        let message = EngineMessage::Response {
            request_id,
            response,
        };
        if self.sender.send(message).is_err() {
            warn!(request_id = %request_id, "Engine channel closed, dropping response");
        }
    }
}

/// Handler for request kinds the adapter does not serve itself
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: DataRequest, request_id: RequestId) -> Result<()>;
}

/// Default handler rejecting every delegated request
pub struct UnroutedRequestHandler;

#[async_trait]
impl RequestHandler for UnroutedRequestHandler {
    async fn handle(&self, request: DataRequest, request_id: RequestId) -> Result<()> {
        warn!(
            request_id = %request_id,
            kind = request.kind_name(),
            "No handler registered for request kind"
        );
        Err(AdapterError::UnsupportedRequest(
            request.kind_name().to_string(),
        ))
    }
}
