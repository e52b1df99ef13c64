//! Core identifier and instrument types shared across the adapter

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message for lock-poisoning expects; a poisoned lock means another thread
/// already panicked mid-update and the process state is unsound.
pub(crate) const MUTEX_POISONED: &str = "mutex poisoned";

/// Venue market identifier (e.g. "1.180737206")
///
/// Many instruments map onto one market: the streaming protocol subscribes
/// per market, while downstream consumers address individual instruments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(pub String);

impl MarketId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique instrument identifier, formatted `<market_id>-<runner_id>`
///
/// Constructible from a market change without a directory lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(pub String);

impl InstrumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build the canonical id for a runner within a market
    pub fn from_market_runner(market_id: &MarketId, runner_id: u64) -> Self {
        Self(format!("{}-{}", market_id, runner_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Engine-assigned correlation id for data requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order book granularity requested by a subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookType {
    /// Top of book only
    L1,
    /// Aggregated price levels
    L2,
    /// Individual orders (not offered by the venue; the feed carries
    /// aggregated ladders regardless of the requested granularity)
    L3,
}

/// A tradeable runner within a market, as listed by the venue catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub id: InstrumentId,
    pub market_id: MarketId,
    pub runner_id: u64,
    pub runner_name: String,
    pub market_name: String,
    pub event_type_id: String,
    pub market_start_time: Option<DateTime<Utc>>,
}

/// Search filter over the instrument catalogue
///
/// All populated fields must match. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentFilter {
    pub event_type_ids: Option<Vec<String>>,
    pub market_ids: Option<Vec<MarketId>>,
    /// Case-insensitive substring match on market or runner name
    pub text: Option<String>,
}

impl InstrumentFilter {
    /// Filter restricted to a single event type
    pub fn event_type(id: impl Into<String>) -> Self {
        Self {
            event_type_ids: Some(vec![id.into()]),
            ..Self::default()
        }
    }

    /// Whether an instrument satisfies every populated field
    pub fn matches(&self, instrument: &Instrument) -> bool {
        if let Some(event_type_ids) = &self.event_type_ids {
            if !event_type_ids.contains(&instrument.event_type_id) {
                return false;
            }
        }
        if let Some(market_ids) = &self.market_ids {
            if !market_ids.contains(&instrument.market_id) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            let needle = text.to_lowercase();
            if !instrument.market_name.to_lowercase().contains(&needle)
                && !instrument.runner_name.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

/// Current wall-clock time as Unix nanoseconds
pub fn unix_nanos_now() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default()
        .max(0) as u64
}
