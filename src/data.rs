//! Normalized market data records
//!
//! Everything the adapter hands downstream is one of the closed enums in this
//! module. Dispatch over them is exhaustive by construction; a frame that
//! does not map onto them is rejected at the codec or pipeline layer instead
//! of leaking through as an "unknown" record.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{Instrument, InstrumentFilter, InstrumentId, MarketId, RequestId};

/// Side of a betting-exchange ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Back,
    Lay,
}

/// Book mutation kind; a zero-size level is a deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookAction {
    Update,
    Delete,
}

/// Single order book level mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookDelta {
    pub side: Side,
    pub action: BookAction,
    pub price: Decimal,
    pub size: Decimal,
}

/// Batch of book mutations for one instrument, in venue order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookDeltas {
    pub instrument_id: InstrumentId,
    /// Replaces any previously delivered book state
    pub is_snapshot: bool,
    pub deltas: Vec<BookDelta>,
    pub ts_event: u64,
}

/// Matched trade increment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeTick {
    pub instrument_id: InstrumentId,
    pub price: Decimal,
    pub size: Decimal,
    /// Deterministic id derived from publish time, price, and size
    pub trade_id: String,
    pub ts_event: u64,
}

/// Top-level market quote summary for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTicker {
    pub instrument_id: InstrumentId,
    pub last_traded_price: Option<Decimal>,
    pub total_matched: Option<Decimal>,
    pub starting_price_near: Option<Decimal>,
    pub starting_price_far: Option<Decimal>,
    pub ts_event: u64,
}

/// Trading phase of an instrument, derived from the market definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentPhase {
    PreOpen,
    Open,
    Paused,
    Closed,
}

/// Instrument trading status update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentStatus {
    pub instrument_id: InstrumentId,
    pub phase: InstrumentPhase,
    pub ts_event: u64,
}

/// Instrument settlement on market close
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentClose {
    pub instrument_id: InstrumentId,
    /// 1.0 for a winning runner, 0.0 for a losing one
    pub settlement_price: Decimal,
    pub ts_event: u64,
}

/// Primary market data, routed to the main data channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrimaryData {
    Deltas(OrderBookDeltas),
    Trade(TradeTick),
    Ticker(MarketTicker),
    Status(InstrumentStatus),
    Close(InstrumentClose),
}

impl PrimaryData {
    /// The instrument this record belongs to
    pub fn instrument_id(&self) -> &InstrumentId {
        match self {
            PrimaryData::Deltas(d) => &d.instrument_id,
            PrimaryData::Trade(t) => &t.instrument_id,
            PrimaryData::Ticker(t) => &t.instrument_id,
            PrimaryData::Status(s) => &s.instrument_id,
            PrimaryData::Close(c) => &c.instrument_id,
        }
    }
}

/// Actual starting price assigned when the market turns in-play
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartingPriceRecord {
    pub instrument_id: InstrumentId,
    pub starting_price: Decimal,
    pub ts_event: u64,
}

/// Starting-price ladder mutations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartingPriceDeltas {
    pub instrument_id: InstrumentId,
    pub deltas: Vec<BookDelta>,
    pub ts_event: u64,
}

/// Auxiliary venue-specific data, routed to the generic channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AuxiliaryData {
    StartingPrice(StartingPriceRecord),
    StartingPriceDeltas(StartingPriceDeltas),
}

impl AuxiliaryData {
    pub fn instrument_id(&self) -> &InstrumentId {
        match self {
            AuxiliaryData::StartingPrice(r) => &r.instrument_id,
            AuxiliaryData::StartingPriceDeltas(d) => &d.instrument_id,
        }
    }

    /// Stable type tag carried on the generic channel
    pub fn type_tag(&self) -> &'static str {
        match self {
            AuxiliaryData::StartingPrice(_) => "starting_price",
            AuxiliaryData::StartingPriceDeltas(_) => "starting_price_deltas",
        }
    }
}

/// Auxiliary record wrapped for the generic channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericData {
    pub data_type: String,
    pub instrument_id: InstrumentId,
    pub data: AuxiliaryData,
}

impl GenericData {
    pub fn wrap(data: AuxiliaryData) -> Self {
        Self {
            data_type: data.type_tag().to_string(),
            instrument_id: data.instrument_id().clone(),
            data,
        }
    }
}

/// Venue event that has no data-channel representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DomainEvent {
    MarketNotice {
        market_id: MarketId,
        notice: String,
        ts_event: u64,
    },
}

/// One record produced by normalizing a market change frame
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedRecord {
    Primary(PrimaryData),
    Auxiliary(AuxiliaryData),
    Event(DomainEvent),
}

/// Data delivered to the downstream engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataEvent {
    /// Directory entry pushed at connect time
    Instrument(Instrument),
    Market(PrimaryData),
    Generic(GenericData),
}

/// Response to an instrument search request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSearchResponse {
    pub instruments: Vec<Instrument>,
    pub ts_event: u64,
    pub ts_init: u64,
}

/// Request kinds the engine may issue against this adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataRequest {
    /// Reload the directory with the filter and return matching instruments
    InstrumentSearch { filter: InstrumentFilter },

    /// Current book state; not served by this adapter
    BookSnapshot { instrument_id: InstrumentId },
}

impl DataRequest {
    pub fn kind_name(&self) -> &'static str {
        match self {
            DataRequest::InstrumentSearch { .. } => "instrument_search",
            DataRequest::BookSnapshot { .. } => "book_snapshot",
        }
    }
}

/// Envelope crossing the engine channel and the IPC boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineMessage {
    Data(DataEvent),
    Response {
        request_id: RequestId,
        response: InstrumentSearchResponse,
    },
}
