/// Ellen Live - Dashboard State Synchronisation
///
/// This library keeps the trading dashboard views consistent with the backend:
/// - candle charts: full history per symbol/timeframe and a capped live line chart
/// - trade dashboard: blotter, live prices, balance and analytics
/// - portfolio overview, signal feed and system log feed
///
/// Every view is built from one REST snapshot plus one or more WebSocket delta feeds. Deltas
/// that arrive before the snapshot are buffered and replayed on top of it, and results from a
/// superseded mount are discarded.
pub mod shared;

// Re-export commonly used types for convenience
pub use shared::types::{
    Candle, EntityId, EquityPoint, LogEntry, LogLevel, PortfolioSnapshot, Position, PricePoint,
    Side, Signal, Symbol, TradePoint, TradeStatus,
};

pub use shared::config::DashboardConfig;
pub use shared::error::SyncError;
pub use shared::websocket::{ConnectionStatus, StreamChannel, StreamConfig};

// Synchronisation engine
pub use shared::driver::{LiveView, ViewDriver, watch_view};
pub use shared::reconciler::{Epoch, Materialize, Reconciler, ViewSnapshot, ViewState};
pub use shared::snapshot::{RestClient, SnapshotLoader};

// Views and analytics
pub use shared::metrics::TradeMetrics;
pub use shared::views::{
    CandleChart, ChartParams, LiveLineChart, LogFeed, LogFilter, PortfolioOverview, SignalFeed,
    TradeDashboard, TradeDashboardView, TradeFilter,
};
