//! Core data model for the dashboard views
//!
//! These types match the JSON payloads of the REST snapshot endpoints and the WebSocket
//! streams at ws://localhost:8000/ws/*. Both sides are decoded leniently: ids and decimals may
//! arrive as numbers or strings, and timestamps come in several textual shapes.

use chrono::{DateTime, NaiveDateTime, Utc};
use derive_more::{Display, From};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Instrument symbol, eg/ "BTCUSD"
pub type Symbol = SmolStr;

/// Opaque, stable entity identifier (trade id, signal id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Serialize, Deserialize)]
#[serde(from = "IdRepr")]
pub struct EntityId(pub SmolStr);

#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Number(i64),
    Text(String),
}

impl From<IdRepr> for EntityId {
    fn from(value: IdRepr) -> Self {
        match value {
            IdRepr::Number(id) => Self(SmolStr::new(id.to_string())),
            IdRepr::Text(id) => Self(SmolStr::new(id)),
        }
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        Self(SmolStr::new(value))
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        Self(SmolStr::new(value.to_string()))
    }
}

/// Trade direction or signal action
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "BUY", alias = "Buy")]
    Buy,
    #[serde(alias = "SELL", alias = "Sell")]
    Sell,
}

impl Side {
    /// Convert to display string
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// Check if this is a buy
    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }

    /// Check if this is a sell
    pub fn is_sell(&self) -> bool {
        matches!(self, Side::Sell)
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a trade
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Executed,
    Closed,
}

/// OHLC candle keyed by its start time (whole seconds)
///
/// REST snapshots carry the key as `start_time`, stream deltas as `timestamp`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Candle {
    #[serde(
        rename = "start_time",
        alias = "timestamp",
        deserialize_with = "timestamp::deserialize_seconds"
    )]
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// A trade row of the blotter
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TradePoint {
    pub id: EntityId,
    pub symbol: Symbol,
    pub direction: Side,
    pub price: Decimal,
    pub notional: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub trailing_stop_level: Option<Decimal>,
    pub pnl: Option<Decimal>,
    pub status: TradeStatus,
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub executed_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "label::deserialize_option")]
    pub strategy: Option<String>,
    #[serde(default, deserialize_with = "label::deserialize_option")]
    pub timeframe: Option<String>,
    pub quantity: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub max_drawdown: Option<Decimal>,
    pub live_price: Option<Decimal>,
    pub confidence_score: Option<f64>,
}

impl TradePoint {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Executed
    }

    pub fn is_closed(&self) -> bool {
        self.status == TradeStatus::Closed
    }

    /// Realised (or marked) pnl, missing treated as zero
    pub fn pnl_or_zero(&self) -> Decimal {
        self.pnl.unwrap_or(Decimal::ZERO)
    }
}

/// Latest known price for one symbol
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PricePoint {
    pub symbol: Symbol,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Symbol listing row, the REST seed for the live price board
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: Symbol,
    pub live_price: Option<Decimal>,
}

impl SymbolInfo {
    /// Listed symbols without a live price have no slot on the board yet
    pub fn into_price(self, timestamp: DateTime<Utc>) -> Option<PricePoint> {
        let price = self.live_price?;
        Some(PricePoint {
            symbol: self.symbol,
            price,
            timestamp,
        })
    }
}

/// Strategy signal
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "RawSignal")]
pub struct Signal {
    pub id: EntityId,
    pub symbol: Symbol,
    pub action: Side,
    pub strategy: String,
    pub confidence: f64,
    pub received_at: DateTime<Utc>,
}

/// Wire shape of a signal: REST uses `signal`/`confidence_score`/`created_at`, the stream
/// uses `direction`/`confidence`/`received_at`.
#[derive(Debug, Deserialize)]
struct RawSignal {
    id: EntityId,
    symbol: Symbol,
    signal: Option<Side>,
    direction: Option<Side>,
    #[serde(default, deserialize_with = "label::deserialize_option")]
    strategy: Option<String>,
    confidence_score: Option<f64>,
    confidence: Option<f64>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    received_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    created_at: Option<DateTime<Utc>>,
}

impl TryFrom<RawSignal> for Signal {
    type Error = String;

    fn try_from(raw: RawSignal) -> Result<Self, Self::Error> {
        let action = raw
            .signal
            .or(raw.direction)
            .ok_or_else(|| format!("signal {} has no action", raw.id))?;
        let received_at = raw
            .received_at
            .or(raw.created_at)
            .ok_or_else(|| format!("signal {} has no timestamp", raw.id))?;

        Ok(Self {
            id: raw.id,
            symbol: raw.symbol,
            action,
            strategy: raw.strategy.unwrap_or_default(),
            confidence: raw.confidence_score.or(raw.confidence).unwrap_or_default(),
            received_at,
        })
    }
}

/// Severity of a system log line
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    #[serde(alias = "WARN")]
    Warning,
    Error,
}

/// System log line emitted by the backend
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LogEntry {
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
}

/// Open position inside the portfolio snapshot
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Position {
    pub symbol: Symbol,
    pub qty: Decimal,
    pub avg_price: Decimal,
    pub current_price: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
}

/// Portfolio snapshot: cash balance plus open positions
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PortfolioSnapshot {
    pub name: Option<String>,
    pub usd_balance: Decimal,
    #[serde(default)]
    pub positions: Vec<Position>,
}

/// Derived point of the equity curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EquityPoint {
    pub date: DateTime<Utc>,
    pub balance: Decimal,
}

/// Parse the timestamp shapes emitted by the backend.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]+HH:MM` and naive `YYYY-MM-DD[T ]HH:MM:SS[.f]`,
/// the latter interpreted as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
        return Some(time.with_timezone(&Utc));
    }

    if let Ok(time) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(time.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Truncate an instant to whole seconds
pub fn truncate_to_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or(time)
}

pub(crate) mod timestamp {
    use super::{parse_timestamp, truncate_to_seconds};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, de};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw)
            .ok_or_else(|| de::Error::custom(format!("unparsable timestamp: {raw}")))
    }

    pub fn deserialize_seconds<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize(deserializer).map(truncate_to_seconds)
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(None),
            Some(raw) => parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("unparsable timestamp: {raw}"))),
        }
    }
}

/// Free-form labels (strategy, timeframe) arrive as names or as numeric foreign keys.
pub(crate) mod label {
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Value>::deserialize(deserializer)? {
            Some(Value::String(label)) if !label.is_empty() => Some(label),
            Some(Value::Number(number)) => Some(number.to_string()),
            _ => None,
        })
    }
}
