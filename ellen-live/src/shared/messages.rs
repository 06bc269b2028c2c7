//! Typed stream payloads and their decoding.
//!
//! Any payload that does not decode (server greetings, missing fields, unparsable timestamps)
//! is reported as [`SyncError::MalformedMessage`] and dropped by the owning channel.

use crate::shared::{
    error::SyncError,
    types::{Candle, EntityId, LogEntry, PricePoint, Signal, Symbol, TradePoint},
    websocket::StreamMessage,
};
use chrono::Utc;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;

/// Trade blotter delta from `ws/trades/`
#[derive(Debug, Clone, PartialEq)]
pub enum TradeDelta {
    /// Full trade row, new or updated (including status transitions)
    Upsert(TradePoint),
    /// Explicit deletion, `{"deleted": true, "id": ..}`
    Delete(EntityId),
}

/// Live price board delta from `ws/live-prices/`: one or more symbol prices, stamped on receipt
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTick(pub Vec<PricePoint>);

/// Account balance delta from `ws/portfolio/`
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BalanceUpdate {
    pub usd_balance: Decimal,
}

/// Decode a JSON payload, mapping any failure to a malformed message
pub fn decode_json<T: DeserializeOwned>(payload: &str) -> Result<T, SyncError> {
    serde_json::from_str(payload).map_err(|error| SyncError::MalformedMessage(error.to_string()))
}

impl StreamMessage for Candle {
    fn decode(payload: &str) -> Result<Self, SyncError> {
        decode_json(payload)
    }
}

impl StreamMessage for Signal {
    fn decode(payload: &str) -> Result<Self, SyncError> {
        decode_json(payload)
    }
}

impl StreamMessage for LogEntry {
    fn decode(payload: &str) -> Result<Self, SyncError> {
        decode_json(payload)
    }
}

impl StreamMessage for BalanceUpdate {
    fn decode(payload: &str) -> Result<Self, SyncError> {
        decode_json(payload)
    }
}

impl StreamMessage for TradeDelta {
    fn decode(payload: &str) -> Result<Self, SyncError> {
        let value: Value = decode_json(payload)?;

        let deleted = value
            .get("deleted")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if deleted {
            let id = value
                .get("id")
                .cloned()
                .ok_or_else(|| SyncError::MalformedMessage("deletion without id".to_string()))?;
            serde_json::from_value(id)
                .map(TradeDelta::Delete)
                .map_err(|error| SyncError::MalformedMessage(error.to_string()))
        } else {
            serde_json::from_value(value)
                .map(TradeDelta::Upsert)
                .map_err(|error| SyncError::MalformedMessage(error.to_string()))
        }
    }
}

impl StreamMessage for PriceTick {
    fn decode(payload: &str) -> Result<Self, SyncError> {
        let prices: IndexMap<Symbol, Decimal> = decode_json(payload)?;
        let timestamp = Utc::now();

        Ok(PriceTick(
            prices
                .into_iter()
                .map(|(symbol, price)| PricePoint {
                    symbol,
                    price,
                    timestamp,
                })
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::types::TradeStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trade_delta_upsert_and_delete() {
        let upsert = TradeDelta::decode(
            r#"{"id":7,"symbol":"BTCUSD","direction":"buy","price":"64000","notional":"640",
                "stop_loss":null,"take_profit":"66000","trailing_stop_level":null,"pnl":"12.5",
                "status":"CLOSED","executed_at":"2024-05-01T10:00:00Z",
                "closed_at":"2024-05-01T11:00:00Z"}"#,
        )
        .unwrap();

        match upsert {
            TradeDelta::Upsert(trade) => {
                assert_eq!(trade.id, EntityId::from(7));
                assert_eq!(trade.status, TradeStatus::Closed);
                assert_eq!(trade.pnl, Some(dec!(12.5)));
            }
            other => panic!("expected upsert, got {other:?}"),
        }

        assert_eq!(
            TradeDelta::decode(r#"{"deleted":true,"id":7}"#).unwrap(),
            TradeDelta::Delete(EntityId::from(7))
        );
    }

    #[test]
    fn test_malformed_payloads() {
        struct TestCase {
            payload: &'static str,
        }

        let tests = vec![
            // TC0: not JSON
            TestCase { payload: "ping" },
            // TC1: server greeting
            TestCase {
                payload: r#"{"message":"connected"}"#,
            },
            // TC2: deletion without id
            TestCase {
                payload: r#"{"deleted":true}"#,
            },
            // TC3: trade missing required fields
            TestCase {
                payload: r#"{"id":1,"symbol":"BTCUSD"}"#,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert!(
                matches!(
                    TradeDelta::decode(test.payload),
                    Err(SyncError::MalformedMessage(_))
                ),
                "TC{} failed",
                index
            );
        }
    }

    #[test]
    fn test_candle_with_unparsable_timestamp_is_malformed() {
        let result = Candle::decode(
            r#"{"ticker":"BTCUSD","timestamp":"yesterday","open":1,"high":1,"low":1,"close":1}"#,
        );
        assert!(matches!(result, Err(SyncError::MalformedMessage(_))));
    }

    #[test]
    fn test_price_tick_keeps_symbol_order() {
        let PriceTick(points) =
            PriceTick::decode(r#"{"ETHUSD": 3100.5, "BTCUSD": "64000", "SOLUSD": 150}"#).unwrap();

        let symbols: Vec<&str> = points.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["ETHUSD", "BTCUSD", "SOLUSD"]);
        assert_eq!(points[1].price, dec!(64000));
        assert!(points.iter().all(|p| p.timestamp == points[0].timestamp));
    }

    #[test]
    fn test_balance_update() {
        let update = BalanceUpdate::decode(r#"{"usd_balance": 10250.75}"#).unwrap();
        assert_eq!(update.usd_balance, dec!(10250.75));
        assert!(BalanceUpdate::decode(r#"{"balance": 1}"#).is_err());
    }
}
