//! Wire codec for the Parimex streaming protocol
//!
//! Decodes inbound JSON text frames into a closed [`Frame`] enum and encodes
//! the outbound operations the adapter is allowed to send.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::str::FromStr;

use crate::error::{AdapterError, Result};
use crate::types::MarketId;

/// Frame-level status value the venue uses to flag an unreliable stream
const STREAM_UNRELIABLE_STATUS: u16 = 503;

/// Inbound frame, tagged by the `op` field
#[derive(Debug, Clone)]
pub enum Frame {
    /// Stream connection acknowledgement
    Connection(ConnectionNotice),

    /// Operation status report, also used for fatal stream errors
    Status(StatusNotice),

    /// Market change message carrying data for one or more markets
    MarketChange(MarketChangeMessage),
}

/// Decode a raw text frame
///
/// Malformed JSON is a decode error; a structurally valid frame with a
/// missing or unrecognized `op` is a protocol violation.
pub fn decode(raw: &str) -> Result<Frame> {
    #[derive(Deserialize)]
    struct OpProbe {
        #[serde(default)]
        op: Option<String>,
    }

    let probe: OpProbe = serde_json::from_str(raw)?;
    let op = probe
        .op
        .ok_or_else(|| AdapterError::ProtocolViolation("frame missing op field".to_string()))?;

    match op.as_str() {
        "connection" => Ok(Frame::Connection(serde_json::from_str(raw)?)),
        "status" => Ok(Frame::Status(serde_json::from_str(raw)?)),
        "mcm" => Ok(Frame::MarketChange(serde_json::from_str(raw)?)),
        other => Err(AdapterError::ProtocolViolation(format!(
            "unrecognized frame kind: {}",
            other
        ))),
    }
}

/// Connection acknowledgement sent once after the socket opens
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionNotice {
    /// Venue-assigned connection identifier
    #[serde(rename = "connection_id")]
    pub connection_id: String,
}

/// Status report for a prior request or for the connection itself
#[derive(Debug, Clone, Deserialize)]
pub struct StatusNotice {
    /// Client request id this status answers, if any
    #[serde(default)]
    pub id: Option<u64>,

    /// Outcome code
    pub status_code: StatusCode,

    /// Venue error code (e.g. "MAX_CONNECTION_LIMIT_EXCEEDED")
    #[serde(default)]
    pub error_code: Option<String>,

    /// Human-readable error description
    #[serde(default)]
    pub error_message: Option<String>,

    /// Whether the venue closed the connection alongside this status
    #[serde(default)]
    pub connection_closed: bool,
}

impl StatusNotice {
    /// A failure that also closed the connection is unrecoverable
    pub fn is_fatal(&self) -> bool {
        self.status_code == StatusCode::Failure && self.connection_closed
    }
}

/// Status outcome code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusCode {
    Success,
    Failure,
}

/// Market change message (`op == "mcm"`)
#[derive(Debug, Clone, Deserialize)]
pub struct MarketChangeMessage {
    /// Client request id the venue echoes back
    #[serde(default)]
    pub id: Option<u64>,

    /// Venue publish time in Unix milliseconds
    pub publish_time: u64,

    /// How this message relates to the subscription stream
    #[serde(default)]
    pub change_type: Option<ChangeType>,

    /// Frame-level status; 503 marks the stream unreliable
    #[serde(default)]
    pub status: Option<u16>,

    /// Per-market change sets; empty on stream heartbeats
    #[serde(default)]
    pub markets: Vec<MarketChange>,
}

impl MarketChangeMessage {
    /// Whether the venue flagged this stream as currently unreliable
    pub fn is_stream_unreliable(&self) -> bool {
        self.status == Some(STREAM_UNRELIABLE_STATUS)
    }
}

/// Relation of a market change message to the subscription stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Full image following a subscription
    SubImage,
    /// Full image following a resubscription
    ResubImage,
    /// Stream-level heartbeat, carries no market data
    Heartbeat,
}

/// Change set for a single market
#[derive(Debug, Clone, Deserialize)]
pub struct MarketChange {
    pub market_id: MarketId,

    /// Whether this change replaces prior state rather than deltaing it
    #[serde(default)]
    pub image: bool,

    /// Whether the venue merged updates for this market before sending
    #[serde(default)]
    pub conflated: bool,

    /// Total amount matched on the market
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub total_matched: Option<Decimal>,

    /// Venue notice text attached to the market
    #[serde(default)]
    pub notice: Option<String>,

    /// Market definition, present on images and definition changes
    #[serde(default)]
    pub market_definition: Option<MarketDefinition>,

    /// Per-runner changes
    #[serde(default)]
    pub runner_changes: Vec<RunnerChange>,
}

/// Market definition as carried on the stream
#[derive(Debug, Clone, Deserialize)]
pub struct MarketDefinition {
    pub status: MarketStatus,

    #[serde(default)]
    pub in_play: bool,

    #[serde(default)]
    pub market_type: Option<String>,

    #[serde(default)]
    pub event_type_id: Option<String>,

    #[serde(default)]
    pub runners: Vec<RunnerDefinition>,
}

/// Market trading status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Inactive,
    Open,
    Suspended,
    Closed,
}

/// Runner entry within a market definition
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerDefinition {
    pub runner_id: u64,

    pub status: RunnerStatus,

    #[serde(default)]
    pub sort_priority: Option<u32>,
}

/// Runner settlement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Active,
    Winner,
    Loser,
    Removed,
}

/// Per-runner change set
#[derive(Debug, Clone, Deserialize)]
pub struct RunnerChange {
    pub runner_id: u64,

    /// Last traded price
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub last_traded_price: Option<Decimal>,

    /// Total volume matched on this runner
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub total_matched: Option<Decimal>,

    /// Projected starting price (near)
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub starting_price_near: Option<Decimal>,

    /// Projected starting price (far)
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub starting_price_far: Option<Decimal>,

    /// Actual starting price, present once the market turns in-play
    #[serde(default, deserialize_with = "deserialize_opt_decimal")]
    pub starting_price: Option<Decimal>,

    /// Available-to-back ladder levels
    #[serde(default, deserialize_with = "deserialize_ladder")]
    pub bids: Vec<PriceSize>,

    /// Available-to-lay ladder levels
    #[serde(default, deserialize_with = "deserialize_ladder")]
    pub asks: Vec<PriceSize>,

    /// Cumulative traded volume per price
    #[serde(default, deserialize_with = "deserialize_ladder")]
    pub traded: Vec<PriceSize>,

    /// Starting-price back ladder
    #[serde(default, deserialize_with = "deserialize_ladder")]
    pub starting_price_back: Vec<PriceSize>,

    /// Starting-price lay ladder
    #[serde(default, deserialize_with = "deserialize_ladder")]
    pub starting_price_lay: Vec<PriceSize>,
}

/// Price level (price, size pair)
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSize {
    pub price: Decimal,
    pub size: Decimal,
}

/// Outbound operation, tagged by the `op` field
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Replace-semantics subscription covering every listed market
    Subscribe { market_ids: Vec<MarketId> },

    /// Application-level keep-alive
    Heartbeat,

    /// Stream session authentication, sent once after connect
    Authenticate { api_key: String, session: String },
}

impl OutboundMessage {
    /// Encode to the JSON text representation sent on the wire
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| AdapterError::Serialization(e.to_string()))
    }
}

/// Custom deserializer for optional Decimal from string
fn deserialize_opt_decimal<'de, D>(deserializer: D) -> std::result::Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<&str> = Deserialize::deserialize(deserializer)?;
    raw.map(|s| Decimal::from_str(s).map_err(serde::de::Error::custom))
        .transpose()
}

/// Custom deserializer for ladders from arrays of string pairs
fn deserialize_ladder<'de, D>(deserializer: D) -> std::result::Result<Vec<PriceSize>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Vec<String>> = Deserialize::deserialize(deserializer)?;
    raw.into_iter()
        .map(|pair| {
            if pair.len() != 2 {
                return Err(serde::de::Error::custom("Invalid ladder level format"));
            }
            Ok(PriceSize {
                price: Decimal::from_str(&pair[0]).map_err(serde::de::Error::custom)?,
                size: Decimal::from_str(&pair[1]).map_err(serde::de::Error::custom)?,
            })
        })
        .collect()
}
