//! Normalization of market change messages
//!
//! Expands one decoded market change frame into zero or more normalized
//! records, preserving venue order: definition-derived records first, then
//! per-runner data in ladder order.

use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::codec::{
    MarketChange, MarketChangeMessage, MarketDefinition, MarketStatus, PriceSize, RunnerChange,
    RunnerStatus,
};
use crate::data::{
    AuxiliaryData, BookAction, BookDelta, DomainEvent, InstrumentClose, InstrumentPhase,
    InstrumentStatus, MarketTicker, NormalizedRecord, OrderBookDeltas, PrimaryData, Side,
    StartingPriceDeltas, StartingPriceRecord, TradeTick,
};
use crate::types::{InstrumentId, MarketId};

const NANOS_PER_MILLI: u64 = 1_000_000;

/// Stateful market change normalizer
///
/// Traded ladders on the wire are cumulative per price; the parser keeps the
/// last seen totals per instrument and emits only increments, so repeated
/// deliveries of the same ladder never produce duplicate trades.
pub struct MarketChangeParser {
    traded_totals: HashMap<InstrumentId, HashMap<Decimal, Decimal>>,
}

impl MarketChangeParser {
    pub fn new() -> Self {
        Self {
            traded_totals: HashMap::new(),
        }
    }

    /// Expand a market change message into normalized records
    pub fn parse(&mut self, message: &MarketChangeMessage) -> Vec<NormalizedRecord> {
        // publish_time comes off the wire; saturate rather than trust it
        let ts_event = message.publish_time.saturating_mul(NANOS_PER_MILLI);
        let mut records = Vec::new();

        for market in &message.markets {
            self.parse_market(market, message.publish_time, ts_event, &mut records);
        }

        records
    }

    fn parse_market(
        &mut self,
        market: &MarketChange,
        publish_time: u64,
        ts_event: u64,
        out: &mut Vec<NormalizedRecord>,
    ) {
        if let Some(definition) = &market.market_definition {
            parse_definition(&market.market_id, definition, ts_event, out);
        }

        if let Some(notice) = &market.notice {
            out.push(NormalizedRecord::Event(DomainEvent::MarketNotice {
                market_id: market.market_id.clone(),
                notice: notice.clone(),
                ts_event,
            }));
        }

        for rc in &market.runner_changes {
            self.parse_runner(market, rc, publish_time, ts_event, out);
        }
    }

    fn parse_runner(
        &mut self,
        market: &MarketChange,
        rc: &RunnerChange,
        publish_time: u64,
        ts_event: u64,
        out: &mut Vec<NormalizedRecord>,
    ) {
        let instrument_id = InstrumentId::from_market_runner(&market.market_id, rc.runner_id);

        // An image restates the world from scratch, including traded totals.
        if market.image {
            self.traded_totals.remove(&instrument_id);
        }

        if !rc.bids.is_empty() || !rc.asks.is_empty() {
            let mut deltas = Vec::with_capacity(rc.bids.len() + rc.asks.len());
            push_ladder(&mut deltas, &rc.bids, Side::Back);
            push_ladder(&mut deltas, &rc.asks, Side::Lay);

            out.push(NormalizedRecord::Primary(PrimaryData::Deltas(
                OrderBookDeltas {
                    instrument_id: instrument_id.clone(),
                    is_snapshot: market.image,
                    deltas,
                    ts_event,
                },
            )));
        }

        for level in &rc.traded {
            if let Some(tick) = self.trade_increment(&instrument_id, level, publish_time, ts_event)
            {
                out.push(NormalizedRecord::Primary(PrimaryData::Trade(tick)));
            }
        }

        if rc.last_traded_price.is_some()
            || rc.total_matched.is_some()
            || rc.starting_price_near.is_some()
            || rc.starting_price_far.is_some()
        {
            out.push(NormalizedRecord::Primary(PrimaryData::Ticker(MarketTicker {
                instrument_id: instrument_id.clone(),
                last_traded_price: rc.last_traded_price,
                total_matched: rc.total_matched,
                starting_price_near: rc.starting_price_near,
                starting_price_far: rc.starting_price_far,
                ts_event,
            })));
        }

        if !rc.starting_price_back.is_empty() || !rc.starting_price_lay.is_empty() {
            let mut deltas =
                Vec::with_capacity(rc.starting_price_back.len() + rc.starting_price_lay.len());
            push_ladder(&mut deltas, &rc.starting_price_back, Side::Back);
            push_ladder(&mut deltas, &rc.starting_price_lay, Side::Lay);

            out.push(NormalizedRecord::Auxiliary(
                AuxiliaryData::StartingPriceDeltas(StartingPriceDeltas {
                    instrument_id: instrument_id.clone(),
                    deltas,
                    ts_event,
                }),
            ));
        }

        if let Some(starting_price) = rc.starting_price {
            out.push(NormalizedRecord::Auxiliary(AuxiliaryData::StartingPrice(
                StartingPriceRecord {
                    instrument_id,
                    starting_price,
                    ts_event,
                },
            )));
        }
    }

    /// Convert a cumulative traded level into the newly matched increment
    fn trade_increment(
        &mut self,
        instrument_id: &InstrumentId,
        level: &PriceSize,
        publish_time: u64,
        ts_event: u64,
    ) -> Option<TradeTick> {
        let totals = self
            .traded_totals
            .entry(instrument_id.clone())
            .or_default();
        let previous = totals.get(&level.price).copied().unwrap_or_default();
        totals.insert(level.price, level.size);

        let increment = level.size - previous;
        if increment <= Decimal::ZERO {
            return None;
        }

        Some(TradeTick {
            instrument_id: instrument_id.clone(),
            price: level.price,
            size: increment,
            trade_id: make_trade_id(publish_time, &level.price, &increment),
            ts_event,
        })
    }
}

impl Default for MarketChangeParser {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_definition(
    market_id: &MarketId,
    definition: &MarketDefinition,
    ts_event: u64,
    out: &mut Vec<NormalizedRecord>,
) {
    let phase = match definition.status {
        MarketStatus::Inactive | MarketStatus::Closed => InstrumentPhase::Closed,
        MarketStatus::Open if definition.in_play => InstrumentPhase::Open,
        MarketStatus::Open => InstrumentPhase::PreOpen,
        MarketStatus::Suspended => InstrumentPhase::Paused,
    };

    for runner in &definition.runners {
        out.push(NormalizedRecord::Primary(PrimaryData::Status(
            InstrumentStatus {
                instrument_id: InstrumentId::from_market_runner(market_id, runner.runner_id),
                phase,
                ts_event,
            },
        )));
    }

    if definition.status == MarketStatus::Closed {
        for runner in &definition.runners {
            let settlement_price = match runner.status {
                RunnerStatus::Winner => Decimal::ONE,
                RunnerStatus::Loser => Decimal::ZERO,
                // Removed runners are voided, not settled
                RunnerStatus::Active | RunnerStatus::Removed => continue,
            };

            out.push(NormalizedRecord::Primary(PrimaryData::Close(
                InstrumentClose {
                    instrument_id: InstrumentId::from_market_runner(market_id, runner.runner_id),
                    settlement_price,
                    ts_event,
                },
            )));
        }
    }
}

fn push_ladder(out: &mut Vec<BookDelta>, levels: &[PriceSize], side: Side) {
    for level in levels {
        let action = if level.size.is_zero() {
            BookAction::Delete
        } else {
            BookAction::Update
        };
        out.push(BookDelta {
            side,
            action,
            price: level.price,
            size: level.size,
        });
    }
}

/// Deterministic trade id: publish time in millis, price, and size
fn make_trade_id(publish_time: u64, price: &Decimal, size: &Decimal) -> String {
    format!("{}-{}-{}", publish_time, price, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, Frame};
    use rust_decimal_macros::dec;

    fn market_change(raw: &str) -> MarketChangeMessage {
        match decode(raw).unwrap() {
            Frame::MarketChange(msg) => msg,
            other => panic!("Expected MarketChange, got {:?}", other),
        }
    }

    #[test]
    fn test_sub_image_statuses_before_book() {
        let raw = r#"{
            "op": "mcm",
            "publish_time": 1667288437852,
            "change_type": "sub_image",
            "markets": [{
                "market_id": "1.180737206",
                "image": true,
                "market_definition": {
                    "status": "open",
                    "in_play": false,
                    "runners": [
                        {"runner_id": 19248890, "status": "active"},
                        {"runner_id": 237486, "status": "active"}
                    ]
                },
                "runner_changes": [{
                    "runner_id": 19248890,
                    "bids": [["3.2", "100.5"]],
                    "asks": [["3.25", "75.0"]]
                }]
            }]
        }"#;

        let mut parser = MarketChangeParser::new();
        let records = parser.parse(&market_change(raw));

        assert_eq!(records.len(), 3);
        for record in &records[..2] {
            match record {
                NormalizedRecord::Primary(PrimaryData::Status(status)) => {
                    assert_eq!(status.phase, InstrumentPhase::PreOpen);
                    assert_eq!(status.ts_event, 1667288437852 * NANOS_PER_MILLI);
                }
                other => panic!("Expected Status, got {:?}", other),
            }
        }

        match &records[2] {
            NormalizedRecord::Primary(PrimaryData::Deltas(deltas)) => {
                assert!(deltas.is_snapshot);
                assert_eq!(deltas.instrument_id.as_str(), "1.180737206-19248890");
                assert_eq!(deltas.deltas.len(), 2);
                assert_eq!(deltas.deltas[0].side, Side::Back);
                assert_eq!(deltas.deltas[1].side, Side::Lay);
            }
            other => panic!("Expected Deltas, got {:?}", other),
        }
    }

    #[test]
    fn test_in_play_definition_is_open() {
        let raw = r#"{
            "op": "mcm",
            "publish_time": 1,
            "markets": [{
                "market_id": "1.1",
                "market_definition": {
                    "status": "open",
                    "in_play": true,
                    "runners": [{"runner_id": 7, "status": "active"}]
                }
            }]
        }"#;

        let records = MarketChangeParser::new().parse(&market_change(raw));
        match &records[0] {
            NormalizedRecord::Primary(PrimaryData::Status(status)) => {
                assert_eq!(status.phase, InstrumentPhase::Open);
            }
            other => panic!("Expected Status, got {:?}", other),
        }
    }

    #[test]
    fn test_suspended_definition_is_paused() {
        let raw = r#"{
            "op": "mcm",
            "publish_time": 1,
            "markets": [{
                "market_id": "1.1",
                "market_definition": {
                    "status": "suspended",
                    "in_play": true,
                    "runners": [{"runner_id": 7, "status": "active"}]
                }
            }]
        }"#;

        let records = MarketChangeParser::new().parse(&market_change(raw));
        match &records[0] {
            NormalizedRecord::Primary(PrimaryData::Status(status)) => {
                assert_eq!(status.phase, InstrumentPhase::Paused);
            }
            other => panic!("Expected Status, got {:?}", other),
        }
    }

    #[test]
    fn test_closed_market_settlement() {
        let raw = r#"{
            "op": "mcm",
            "publish_time": 1667288437852,
            "markets": [{
                "market_id": "1.180737206",
                "market_definition": {
                    "status": "closed",
                    "in_play": true,
                    "runners": [
                        {"runner_id": 1, "status": "winner"},
                        {"runner_id": 2, "status": "loser"},
                        {"runner_id": 3, "status": "removed"}
                    ]
                }
            }]
        }"#;

        let records = MarketChangeParser::new().parse(&market_change(raw));

        let statuses: Vec<_> = records
            .iter()
            .filter(|r| matches!(r, NormalizedRecord::Primary(PrimaryData::Status(_))))
            .collect();
        assert_eq!(statuses.len(), 3);

        let closes: Vec<_> = records
            .iter()
            .filter_map(|r| match r {
                NormalizedRecord::Primary(PrimaryData::Close(close)) => Some(close),
                _ => None,
            })
            .collect();
        assert_eq!(closes.len(), 2);
        assert_eq!(closes[0].instrument_id.as_str(), "1.180737206-1");
        assert_eq!(closes[0].settlement_price, dec!(1));
        assert_eq!(closes[1].instrument_id.as_str(), "1.180737206-2");
        assert_eq!(closes[1].settlement_price, dec!(0));
    }

    #[test]
    fn test_zero_size_level_is_delete() {
        let raw = r#"{
            "op": "mcm",
            "publish_time": 1,
            "markets": [{
                "market_id": "1.1",
                "runner_changes": [{
                    "runner_id": 7,
                    "bids": [["3.2", "0"]]
                }]
            }]
        }"#;

        let records = MarketChangeParser::new().parse(&market_change(raw));
        match &records[0] {
            NormalizedRecord::Primary(PrimaryData::Deltas(deltas)) => {
                assert!(!deltas.is_snapshot);
                assert_eq!(deltas.deltas[0].action, BookAction::Delete);
            }
            other => panic!("Expected Deltas, got {:?}", other),
        }
    }

    #[test]
    fn test_trades_deduplicated_across_frames() {
        let first = r#"{
            "op": "mcm",
            "publish_time": 1000,
            "markets": [{
                "market_id": "1.1",
                "runner_changes": [{"runner_id": 7, "traded": [["3.2", "120.5"]]}]
            }]
        }"#;
        let repeat = r#"{
            "op": "mcm",
            "publish_time": 2000,
            "markets": [{
                "market_id": "1.1",
                "runner_changes": [{"runner_id": 7, "traded": [["3.2", "120.5"]]}]
            }]
        }"#;
        let grown = r#"{
            "op": "mcm",
            "publish_time": 3000,
            "markets": [{
                "market_id": "1.1",
                "runner_changes": [{"runner_id": 7, "traded": [["3.2", "150.5"]]}]
            }]
        }"#;

        let mut parser = MarketChangeParser::new();

        let records = parser.parse(&market_change(first));
        assert_eq!(records.len(), 1);
        match &records[0] {
            NormalizedRecord::Primary(PrimaryData::Trade(tick)) => {
                assert_eq!(tick.size, dec!(120.5));
                assert_eq!(tick.trade_id, "1000-3.2-120.5");
            }
            other => panic!("Expected Trade, got {:?}", other),
        }

        assert!(parser.parse(&market_change(repeat)).is_empty());

        let records = parser.parse(&market_change(grown));
        assert_eq!(records.len(), 1);
        match &records[0] {
            NormalizedRecord::Primary(PrimaryData::Trade(tick)) => {
                assert_eq!(tick.size, dec!(30.0));
            }
            other => panic!("Expected Trade, got {:?}", other),
        }
    }

    #[test]
    fn test_image_resets_traded_totals() {
        let delta = r#"{
            "op": "mcm",
            "publish_time": 1000,
            "markets": [{
                "market_id": "1.1",
                "runner_changes": [{"runner_id": 7, "traded": [["3.2", "120.5"]]}]
            }]
        }"#;
        let image = r#"{
            "op": "mcm",
            "publish_time": 2000,
            "markets": [{
                "market_id": "1.1",
                "image": true,
                "runner_changes": [{"runner_id": 7, "traded": [["3.2", "120.5"]]}]
            }]
        }"#;

        let mut parser = MarketChangeParser::new();
        assert_eq!(parser.parse(&market_change(delta)).len(), 1);
        // Same total restated by the image is replayed, not suppressed
        assert_eq!(parser.parse(&market_change(image)).len(), 1);
    }

    #[test]
    fn test_ticker_from_quote_fields() {
        let raw = r#"{
            "op": "mcm",
            "publish_time": 1,
            "markets": [{
                "market_id": "1.1",
                "runner_changes": [{
                    "runner_id": 7,
                    "last_traded_price": "3.2",
                    "total_matched": "920.5",
                    "starting_price_near": "2.8",
                    "starting_price_far": "3.0"
                }]
            }]
        }"#;

        let records = MarketChangeParser::new().parse(&market_change(raw));
        assert_eq!(records.len(), 1);
        match &records[0] {
            NormalizedRecord::Primary(PrimaryData::Ticker(ticker)) => {
                assert_eq!(ticker.last_traded_price, Some(dec!(3.2)));
                assert_eq!(ticker.total_matched, Some(dec!(920.5)));
                assert_eq!(ticker.starting_price_near, Some(dec!(2.8)));
                assert_eq!(ticker.starting_price_far, Some(dec!(3.0)));
            }
            other => panic!("Expected Ticker, got {:?}", other),
        }
    }

    #[test]
    fn test_starting_price_records_are_auxiliary() {
        let raw = r#"{
            "op": "mcm",
            "publish_time": 1,
            "markets": [{
                "market_id": "1.1",
                "runner_changes": [{
                    "runner_id": 7,
                    "starting_price": "2.9",
                    "starting_price_back": [["2.9", "10.0"]],
                    "starting_price_lay": [["3.1", "5.0"]]
                }]
            }]
        }"#;

        let records = MarketChangeParser::new().parse(&market_change(raw));
        assert_eq!(records.len(), 2);

        match &records[0] {
            NormalizedRecord::Auxiliary(AuxiliaryData::StartingPriceDeltas(deltas)) => {
                assert_eq!(deltas.deltas.len(), 2);
                assert_eq!(deltas.deltas[0].side, Side::Back);
                assert_eq!(deltas.deltas[1].side, Side::Lay);
            }
            other => panic!("Expected StartingPriceDeltas, got {:?}", other),
        }

        match &records[1] {
            NormalizedRecord::Auxiliary(AuxiliaryData::StartingPrice(record)) => {
                assert_eq!(record.starting_price, dec!(2.9));
            }
            other => panic!("Expected StartingPrice, got {:?}", other),
        }
    }

    #[test]
    fn test_market_notice_is_event() {
        let raw = r#"{
            "op": "mcm",
            "publish_time": 1,
            "markets": [{"market_id": "1.1", "notice": "Race delayed"}]
        }"#;

        let records = MarketChangeParser::new().parse(&market_change(raw));
        match &records[0] {
            NormalizedRecord::Event(DomainEvent::MarketNotice { notice, .. }) => {
                assert_eq!(notice, "Race delayed");
            }
            other => panic!("Expected MarketNotice, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_heartbeat_yields_nothing() {
        let raw = r#"{"op": "mcm", "publish_time": 1, "change_type": "heartbeat"}"#;
        assert!(MarketChangeParser::new().parse(&market_change(raw)).is_empty());
    }

    #[test]
    fn test_huge_publish_time_saturates() {
        let raw = r#"{
            "op": "mcm",
            "publish_time": 18446744073709551615,
            "markets": [{
                "market_id": "1.1",
                "runner_changes": [{"runner_id": 7, "bids": [["3.2", "100.0"]]}]
            }]
        }"#;

        let records = MarketChangeParser::new().parse(&market_change(raw));
        match &records[0] {
            NormalizedRecord::Primary(PrimaryData::Deltas(deltas)) => {
                assert_eq!(deltas.ts_event, u64::MAX);
            }
            other => panic!("Expected Deltas, got {:?}", other),
        }
    }
}
