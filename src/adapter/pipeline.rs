//! Frame dispatch pipeline and stream health monitoring
//!
//! Every decoded frame passes through here exactly once, in delivery order.
//! Market changes are health-checked, normalized, filtered, and routed; the
//! two notice kinds terminate here.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, error, warn};

use crate::codec::{Frame, MarketChangeMessage, StatusNotice};
use crate::data::{DataEvent, GenericData, NormalizedRecord};
use crate::error::{AdapterError, Result};
use crate::parser::MarketChangeParser;
use crate::sink::DataSink;
use crate::types::{InstrumentId, MUTEX_POISONED};

/// Dispatches decoded frames into the downstream sink
pub struct MarketUpdatePipeline {
    sink: Arc<dyn DataSink>,
    parser: Mutex<MarketChangeParser>,
    subscribed_instruments: Arc<RwLock<HashSet<InstrumentId>>>,
    strict_handling: bool,
    degraded: Arc<AtomicBool>,
}

impl MarketUpdatePipeline {
    pub fn new(
        sink: Arc<dyn DataSink>,
        subscribed_instruments: Arc<RwLock<HashSet<InstrumentId>>>,
        strict_handling: bool,
        degraded: Arc<AtomicBool>,
    ) -> Self {
        Self {
            sink,
            parser: Mutex::new(MarketChangeParser::new()),
            subscribed_instruments,
            strict_handling,
            degraded,
        }
    }

    /// Process one decoded frame
    pub fn process(&self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Connection(notice) => {
                debug!(connection_id = %notice.connection_id, "Stream connection acknowledged");
                Ok(())
            }
            Frame::Status(status) => self.handle_status(&status),
            Frame::MarketChange(message) => {
                self.handle_market_change(&message);
                Ok(())
            }
        }
    }

    /// Only a failure that closed the connection is fatal; everything else
    /// on the status channel is noise
    fn handle_status(&self, status: &StatusNotice) -> Result<()> {
        if status.is_fatal() {
            error!(
                error_code = ?status.error_code,
                error_message = ?status.error_message,
                "Venue reported a failure and closed the connection"
            );
            let detail = status
                .error_code
                .clone()
                .unwrap_or_else(|| "unspecified failure".to_string());
            return Err(AdapterError::UnrecoverableStream(detail));
        }

        debug!(id = ?status.id, "Stream status ok");
        Ok(())
    }

    fn handle_market_change(&self, message: &MarketChangeMessage) {
        self.check_stream_health(message);

        let records = self.parser.lock().expect(MUTEX_POISONED).parse(message);
        for record in records {
            self.route(record);
        }
    }

    /// Raise the degrade signal on the unreliable marker, warn per conflated
    /// market; neither stops the frame from being processed
    fn check_stream_health(&self, message: &MarketChangeMessage) {
        if message.is_stream_unreliable() {
            warn!("Stream unreliable, waiting for recovery");
            self.degraded.store(true, Ordering::SeqCst);
        }

        for market in &message.markets {
            if market.conflated {
                warn!(
                    market_id = %market.market_id,
                    "Market updates conflated by venue, forwarding anyway"
                );
            }
        }
    }

    fn route(&self, record: NormalizedRecord) {
        match record {
            NormalizedRecord::Primary(data) => {
                // Valid data for an instrument nobody asked for is dropped
                // without logging; at stream rates that would be pure spam.
                if self.strict_handling && !self.is_subscribed(data.instrument_id()) {
                    return;
                }
                self.sink.handle_data(DataEvent::Market(data));
            }
            NormalizedRecord::Auxiliary(aux) => {
                self.sink
                    .handle_data(DataEvent::Generic(GenericData::wrap(aux)));
            }
            NormalizedRecord::Event(event) => {
                warn!(event = ?event, "Venue event channel not wired, dropping");
            }
        }
    }

    fn is_subscribed(&self, instrument_id: &InstrumentId) -> bool {
        self.subscribed_instruments
            .read()
            .expect(MUTEX_POISONED)
            .contains(instrument_id)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}
