//! Concrete dashboard views and the read-only filters applied to their published data.
//!
//! | View | Snapshot | Feeds | Container |
//! |---|---|---|---|
//! | [`CandleChart`] | candles for symbol + timeframe | `ws/market/{symbol}/` | full history |
//! | [`LiveLineChart`] | recent candles for symbol | `ws/market/{symbol}/` | last N candles |
//! | [`TradeDashboard`] | trades, balance, symbol prices | `ws/trades/`, `ws/portfolio/`, `ws/live-prices/` | trades by id, prices by symbol |
//! | [`PortfolioOverview`] | balance and positions | `ws/portfolio/` | positions by symbol |
//! | [`SignalFeed`] | latest signals | `ws/signals/` | newest first, capped |
//! | [`LogFeed`] | latest logs for one source | `ws/logs/` | newest first, capped |

use crate::shared::{
    config::DashboardConfig,
    driver::{DeltaStream, LiveView},
    error::SyncError,
    messages::{BalanceUpdate, PriceTick, TradeDelta},
    metrics::TradeMetrics,
    reconciler::Materialize,
    series::{BoundedSeries, RecentList, SeriesUpdate},
    snapshot::{RestClient, SnapshotLoader},
    table::EntityTable,
    types::{
        Candle, LogEntry, LogLevel, PortfolioSnapshot, Position, PricePoint, Signal, Symbol,
        TradePoint,
    },
    websocket::{StreamChannel, StreamMessage},
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use futures::StreamExt;
use rust_decimal::Decimal;
use smol_str::SmolStr;
use std::convert::identity;
use tracing::debug;
use url::Url;

/// Log stream entries older than this (relative to receipt) are dropped
pub const LOG_RETENTION_SECS: i64 = 24 * 60 * 60;

/// Open one stream channel and map its messages into a view's delta type
fn delta_stream<T, D>(config: &DashboardConfig, url: Url, into: fn(T) -> D) -> DeltaStream<D>
where
    T: StreamMessage,
    D: Send + 'static,
{
    StreamChannel::<T>::open(config.stream_config(&url))
        .map(move |event| event.map(into))
        .boxed()
}

// -------------------------------------------------------------------------------------------
// Candle charts
// -------------------------------------------------------------------------------------------

/// Candle series ordered by start time
#[derive(Debug, Clone)]
pub struct CandleSeries(BoundedSeries<Candle>);

impl CandleSeries {
    pub fn unbounded() -> Self {
        Self(BoundedSeries::unbounded())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(BoundedSeries::new(capacity))
    }
}

impl Materialize for CandleSeries {
    type Snapshot = Vec<Candle>;
    type Delta = Candle;
    type View = Vec<Candle>;

    fn replace_all(&mut self, snapshot: Vec<Candle>) {
        self.0.replace_all(snapshot);
    }

    fn apply(&mut self, candle: Candle) -> bool {
        self.0.append_or_update(candle) != SeriesUpdate::Ignored
    }

    fn view(&self) -> Vec<Candle> {
        self.0.to_vec()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChartParams {
    pub symbol: Symbol,
    pub timeframe: SmolStr,
}

impl ChartParams {
    pub fn new(symbol: impl Into<Symbol>, timeframe: impl Into<SmolStr>) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe: timeframe.into(),
        }
    }
}

/// Full-history candle chart for one symbol and timeframe
#[derive(Debug, Clone)]
pub struct CandleChart {
    client: RestClient,
}

impl CandleChart {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SnapshotLoader for CandleChart {
    type Params = ChartParams;
    type Output = Vec<Candle>;

    async fn load(&self, params: &ChartParams) -> Result<Vec<Candle>, SyncError> {
        self.client
            .fetch_candles(&params.symbol, &params.timeframe)
            .await
    }
}

impl LiveView for CandleChart {
    type Container = CandleSeries;

    fn container(&self, _: &ChartParams) -> CandleSeries {
        CandleSeries::unbounded()
    }

    fn streams(&self, params: &ChartParams) -> Result<Vec<DeltaStream<Candle>>, SyncError> {
        let config = self.client.config();
        Ok(vec![delta_stream::<Candle, Candle>(
            config,
            config.market_stream_url(&params.symbol)?,
            identity,
        )])
    }
}

/// Single-series chart of the most recent candles for one symbol
#[derive(Debug, Clone)]
pub struct LiveLineChart {
    client: RestClient,
}

impl LiveLineChart {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SnapshotLoader for LiveLineChart {
    type Params = Symbol;
    type Output = Vec<Candle>;

    async fn load(&self, symbol: &Symbol) -> Result<Vec<Candle>, SyncError> {
        self.client.fetch_live_chart(symbol).await
    }
}

impl LiveView for LiveLineChart {
    type Container = CandleSeries;

    fn container(&self, _: &Symbol) -> CandleSeries {
        CandleSeries::with_capacity(self.client.config().live_chart_capacity)
    }

    fn streams(&self, symbol: &Symbol) -> Result<Vec<DeltaStream<Candle>>, SyncError> {
        let config = self.client.config();
        Ok(vec![delta_stream::<Candle, Candle>(
            config,
            config.market_stream_url(symbol)?,
            identity,
        )])
    }
}

// -------------------------------------------------------------------------------------------
// Trade dashboard
// -------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TradeDashboardSnapshot {
    pub trades: Vec<TradePoint>,
    pub usd_balance: Decimal,
    pub prices: Vec<PricePoint>,
}

/// Deltas of the three independent trade dashboard feeds
#[derive(Debug, Clone, PartialEq)]
pub enum TradeDashboardDelta {
    Trade(TradeDelta),
    Balance(BalanceUpdate),
    Prices(PriceTick),
}

/// Trade rows by id, price slots by symbol and the account balance
#[derive(Debug, Default)]
pub struct TradeBook {
    trades: EntityTable<TradePoint>,
    prices: EntityTable<PricePoint>,
    usd_balance: Option<Decimal>,
}

impl Materialize for TradeBook {
    type Snapshot = TradeDashboardSnapshot;
    type Delta = TradeDashboardDelta;
    type View = TradeDashboardView;

    fn replace_all(&mut self, snapshot: TradeDashboardSnapshot) {
        self.trades.replace_all(snapshot.trades);
        self.prices.replace_all(snapshot.prices);
        self.usd_balance = Some(snapshot.usd_balance);
    }

    fn apply(&mut self, delta: TradeDashboardDelta) -> bool {
        match delta {
            TradeDashboardDelta::Trade(TradeDelta::Upsert(trade)) => {
                self.trades.upsert(trade);
                true
            }
            TradeDashboardDelta::Trade(TradeDelta::Delete(id)) => {
                let removed = self.trades.remove(&id).is_some();
                if !removed {
                    debug!(%id, "deletion for unknown trade");
                }
                removed
            }
            TradeDashboardDelta::Balance(update) => {
                self.usd_balance = Some(update.usd_balance);
                true
            }
            TradeDashboardDelta::Prices(PriceTick(points)) => {
                let changed = !points.is_empty();
                for point in points {
                    self.prices.upsert(point);
                }
                changed
            }
        }
    }

    fn view(&self) -> TradeDashboardView {
        let trades = self.trades.to_vec();
        TradeDashboardView {
            metrics: TradeMetrics::compute(&trades),
            trades,
            prices: self.prices.to_vec(),
            usd_balance: self.usd_balance,
        }
    }
}

/// Published trade dashboard: rows in order of first appearance plus analytics over them
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeDashboardView {
    pub trades: Vec<TradePoint>,
    pub prices: Vec<PricePoint>,
    pub usd_balance: Option<Decimal>,
    pub metrics: TradeMetrics,
}

impl TradeDashboardView {
    pub fn open_trades(&self) -> impl Iterator<Item = &TradePoint> {
        self.trades.iter().filter(|trade| trade.is_open())
    }

    pub fn closed_trades(&self) -> impl Iterator<Item = &TradePoint> {
        self.trades.iter().filter(|trade| trade.is_closed())
    }

    /// Trades passing `filter`, in view order
    pub fn filtered<'a>(&'a self, filter: &'a TradeFilter) -> impl Iterator<Item = &'a TradePoint> {
        self.trades.iter().filter(move |trade| filter.matches(trade))
    }

    /// Latest price slot for `symbol`
    pub fn price_of(&self, symbol: &str) -> Option<Decimal> {
        self.prices
            .iter()
            .find(|point| point.symbol == symbol)
            .map(|point| point.price)
    }

    /// Price shown next to a trade: the live slot for its symbol, else the price carried on the
    /// trade itself
    pub fn display_price(&self, trade: &TradePoint) -> Option<Decimal> {
        self.price_of(&trade.symbol).or(trade.live_price)
    }
}

/// Trade blotter with live prices, balance and analytics
#[derive(Debug, Clone)]
pub struct TradeDashboard {
    client: RestClient,
}

impl TradeDashboard {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SnapshotLoader for TradeDashboard {
    type Params = ();
    type Output = TradeDashboardSnapshot;

    async fn load(&self, _: &()) -> Result<TradeDashboardSnapshot, SyncError> {
        let (trades, portfolio, symbols) = futures::try_join!(
            self.client.fetch_trades(),
            self.client.fetch_trade_portfolio(),
            self.client.fetch_symbols(),
        )?;

        let fetched_at = Utc::now();
        Ok(TradeDashboardSnapshot {
            trades,
            usd_balance: portfolio.usd_balance,
            prices: symbols
                .into_iter()
                .filter_map(|info| info.into_price(fetched_at))
                .collect(),
        })
    }
}

impl LiveView for TradeDashboard {
    type Container = TradeBook;

    fn container(&self, _: &()) -> TradeBook {
        TradeBook::default()
    }

    fn streams(&self, _: &()) -> Result<Vec<DeltaStream<TradeDashboardDelta>>, SyncError> {
        let config = self.client.config();
        Ok(vec![
            delta_stream::<TradeDelta, _>(
                config,
                config.trades_stream_url()?,
                TradeDashboardDelta::Trade,
            ),
            delta_stream::<BalanceUpdate, _>(
                config,
                config.portfolio_stream_url()?,
                TradeDashboardDelta::Balance,
            ),
            delta_stream::<PriceTick, _>(
                config,
                config.live_prices_stream_url()?,
                TradeDashboardDelta::Prices,
            ),
        ])
    }
}

/// Blotter filter: symbol substring (case-insensitive) and inclusive execution date range
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeFilter {
    pub symbol: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl TradeFilter {
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_from(mut self, from: NaiveDate) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_to(mut self, to: NaiveDate) -> Self {
        self.to = Some(to);
        self
    }

    pub fn matches(&self, trade: &TradePoint) -> bool {
        let executed = trade.executed_at.date_naive();

        self.symbol
            .as_deref()
            .is_none_or(|query| contains_ignore_case(&trade.symbol, query))
            && self.from.is_none_or(|from| executed >= from)
            && self.to.is_none_or(|to| executed <= to)
    }
}

// -------------------------------------------------------------------------------------------
// Portfolio
// -------------------------------------------------------------------------------------------

/// Open positions by symbol plus the account balance
#[derive(Debug, Default)]
pub struct PortfolioBook {
    name: Option<String>,
    usd_balance: Option<Decimal>,
    positions: EntityTable<Position>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortfolioView {
    pub name: Option<String>,
    pub usd_balance: Option<Decimal>,
    pub positions: Vec<Position>,
}

impl Materialize for PortfolioBook {
    type Snapshot = PortfolioSnapshot;
    type Delta = BalanceUpdate;
    type View = PortfolioView;

    fn replace_all(&mut self, snapshot: PortfolioSnapshot) {
        self.name = snapshot.name;
        self.usd_balance = Some(snapshot.usd_balance);
        self.positions.replace_all(snapshot.positions);
    }

    fn apply(&mut self, update: BalanceUpdate) -> bool {
        self.usd_balance = Some(update.usd_balance);
        true
    }

    fn view(&self) -> PortfolioView {
        PortfolioView {
            name: self.name.clone(),
            usd_balance: self.usd_balance,
            positions: self.positions.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortfolioOverview {
    client: RestClient,
}

impl PortfolioOverview {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SnapshotLoader for PortfolioOverview {
    type Params = ();
    type Output = PortfolioSnapshot;

    async fn load(&self, _: &()) -> Result<PortfolioSnapshot, SyncError> {
        self.client.fetch_portfolio().await
    }
}

impl LiveView for PortfolioOverview {
    type Container = PortfolioBook;

    fn container(&self, _: &()) -> PortfolioBook {
        PortfolioBook::default()
    }

    fn streams(&self, _: &()) -> Result<Vec<DeltaStream<BalanceUpdate>>, SyncError> {
        let config = self.client.config();
        Ok(vec![delta_stream::<BalanceUpdate, _>(
            config,
            config.portfolio_stream_url()?,
            identity,
        )])
    }
}

// -------------------------------------------------------------------------------------------
// Signal and log feeds
// -------------------------------------------------------------------------------------------

/// Newest-first signal list
#[derive(Debug, Clone)]
pub struct SignalBook(RecentList<Signal>);

impl SignalBook {
    pub fn new(capacity: usize) -> Self {
        Self(RecentList::new(capacity))
    }
}

impl Materialize for SignalBook {
    type Snapshot = Vec<Signal>;
    type Delta = Signal;
    type View = Vec<Signal>;

    fn replace_all(&mut self, mut snapshot: Vec<Signal>) {
        sort_newest_first(&mut snapshot, |signal| signal.received_at);
        self.0.replace_all(snapshot);
    }

    fn apply(&mut self, signal: Signal) -> bool {
        self.0.push(signal);
        true
    }

    fn view(&self) -> Vec<Signal> {
        self.0.to_vec()
    }
}

#[derive(Debug, Clone)]
pub struct SignalFeed {
    client: RestClient,
}

impl SignalFeed {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SnapshotLoader for SignalFeed {
    type Params = ();
    type Output = Vec<Signal>;

    async fn load(&self, _: &()) -> Result<Vec<Signal>, SyncError> {
        self.client
            .fetch_signals(self.client.config().signal_capacity)
            .await
    }
}

impl LiveView for SignalFeed {
    type Container = SignalBook;

    fn container(&self, _: &()) -> SignalBook {
        SignalBook::new(self.client.config().signal_capacity)
    }

    fn streams(&self, _: &()) -> Result<Vec<DeltaStream<Signal>>, SyncError> {
        let config = self.client.config();
        Ok(vec![delta_stream::<Signal, Signal>(
            config,
            config.signals_stream_url()?,
            identity,
        )])
    }
}

/// Signals whose symbol contains `query` (case-insensitive); an empty query keeps everything
pub fn filter_signals<'a>(signals: &'a [Signal], query: &str) -> Vec<&'a Signal> {
    signals
        .iter()
        .filter(|signal| contains_ignore_case(&signal.symbol, query))
        .collect()
}

/// Newest-first log list for one source
#[derive(Debug, Clone)]
pub struct LogBook {
    entries: RecentList<LogEntry>,
    source: String,
}

impl LogBook {
    pub fn new(capacity: usize, source: impl Into<String>) -> Self {
        Self {
            entries: RecentList::new(capacity),
            source: source.into(),
        }
    }
}

impl Materialize for LogBook {
    type Snapshot = Vec<LogEntry>;
    type Delta = LogEntry;
    type View = Vec<LogEntry>;

    fn replace_all(&mut self, mut snapshot: Vec<LogEntry>) {
        sort_newest_first(&mut snapshot, |entry| entry.timestamp);
        self.entries.replace_all(snapshot);
    }

    fn apply(&mut self, entry: LogEntry) -> bool {
        if !entry.source.eq_ignore_ascii_case(&self.source) {
            return false;
        }
        if !is_recent(&entry, Utc::now()) {
            debug!(timestamp = %entry.timestamp, "dropping log entry outside retention");
            return false;
        }
        self.entries.push(entry);
        true
    }

    fn view(&self) -> Vec<LogEntry> {
        self.entries.to_vec()
    }
}

/// Whether `entry` is within the log retention window at `now`
pub fn is_recent(entry: &LogEntry, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(entry.timestamp) <= TimeDelta::seconds(LOG_RETENTION_SECS)
}

/// System log feed; parameterised by log source
#[derive(Debug, Clone)]
pub struct LogFeed {
    client: RestClient,
}

impl LogFeed {
    pub fn new(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SnapshotLoader for LogFeed {
    type Params = String;
    type Output = Vec<LogEntry>;

    async fn load(&self, source: &String) -> Result<Vec<LogEntry>, SyncError> {
        self.client
            .fetch_logs(self.client.config().log_capacity, source)
            .await
    }
}

impl LiveView for LogFeed {
    type Container = LogBook;

    fn container(&self, source: &String) -> LogBook {
        LogBook::new(self.client.config().log_capacity, source.as_str())
    }

    fn streams(&self, _: &String) -> Result<Vec<DeltaStream<LogEntry>>, SyncError> {
        let config = self.client.config();
        Ok(vec![delta_stream::<LogEntry, LogEntry>(
            config,
            config.logs_stream_url()?,
            identity,
        )])
    }
}

/// Log filter: exact level (optional) and case-insensitive search over the message
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFilter {
    pub level: Option<LogLevel>,
    pub search: String,
}

impl LogFilter {
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn matches(&self, entry: &LogEntry) -> bool {
        self.level.is_none_or(|level| entry.level == level)
            && contains_ignore_case(&entry.message, &self.search)
    }

    pub fn apply<'a>(&self, entries: &'a [LogEntry]) -> Vec<&'a LogEntry> {
        entries.iter().filter(|entry| self.matches(entry)).collect()
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    needle.is_empty() || haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Stable sort, newest first
fn sort_newest_first<T, F>(items: &mut [T], time: F)
where
    F: Fn(&T) -> DateTime<Utc>,
{
    items.sort_by_key(|item| std::cmp::Reverse(time(item)));
}
