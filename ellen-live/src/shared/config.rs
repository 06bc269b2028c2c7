//! Dashboard configuration: backend endpoints, view capacities and stream tuning.
//!
//! Every value can be overridden from the environment, unparsable values fall back to the
//! defaults.

use crate::shared::{error::SyncError, types::Symbol, websocket::StreamConfig};
use std::{str::FromStr, time::Duration};
use url::Url;

/// Default REST base url of the backend
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default WebSocket base url of the backend
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000";

#[derive(Debug, Clone, PartialEq)]
pub struct DashboardConfig {
    /// REST base url (env: API_URL)
    pub api_url: String,
    /// WebSocket base url (env: WS_URL)
    pub ws_url: String,
    /// Points kept by the live single-series chart (env: LIVE_CHART_CAPACITY)
    pub live_chart_capacity: usize,
    /// Signals kept by the signal feed (env: SIGNAL_CAPACITY)
    pub signal_capacity: usize,
    /// Entries kept by the log feed (env: LOG_CAPACITY)
    pub log_capacity: usize,
    /// Deltas buffered while a view waits for its snapshot (env: MAX_PENDING_DELTAS)
    pub max_pending_deltas: usize,
    /// Per-channel event buffer (env: WS_BUFFER_SIZE)
    pub ws_buffer_size: usize,
    /// Keep-alive ping interval for stream channels
    pub ping_interval: Duration,
    /// Timeout applied to each snapshot request
    pub request_timeout: Duration,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            live_chart_capacity: 50,
            signal_capacity: 30,
            log_capacity: 500,
            max_pending_deltas: 10_000,
            ws_buffer_size: 1000,
            ping_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl DashboardConfig {
    /// Build a configuration from environment variables on top of the defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_url: std::env::var("API_URL").unwrap_or(defaults.api_url),
            ws_url: std::env::var("WS_URL").unwrap_or(defaults.ws_url),
            live_chart_capacity: env_or("LIVE_CHART_CAPACITY", defaults.live_chart_capacity),
            signal_capacity: env_or("SIGNAL_CAPACITY", defaults.signal_capacity),
            log_capacity: env_or("LOG_CAPACITY", defaults.log_capacity),
            max_pending_deltas: env_or("MAX_PENDING_DELTAS", defaults.max_pending_deltas),
            ws_buffer_size: env_or("WS_BUFFER_SIZE", defaults.ws_buffer_size),
            ..defaults
        }
    }

    /// Set the REST base url
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Set the WebSocket base url
    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    /// Set the live chart capacity
    pub fn with_live_chart_capacity(mut self, capacity: usize) -> Self {
        self.live_chart_capacity = capacity;
        self
    }

    /// Set the signal feed capacity
    pub fn with_signal_capacity(mut self, capacity: usize) -> Self {
        self.signal_capacity = capacity;
        self
    }

    /// Set the log feed capacity
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    /// Set the pending delta cap
    pub fn with_max_pending_deltas(mut self, max: usize) -> Self {
        self.max_pending_deltas = max;
        self
    }

    /// Set the per-channel event buffer
    pub fn with_ws_buffer_size(mut self, size: usize) -> Self {
        self.ws_buffer_size = size;
        self
    }

    /// Set the stream ping interval
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the snapshot request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Stream channel settings for one WebSocket endpoint
    pub fn stream_config(&self, url: &Url) -> StreamConfig {
        StreamConfig::new(url.as_str())
            .with_ping_interval(self.ping_interval)
            .with_channel_buffer_size(self.ws_buffer_size)
    }

    pub fn candles_url(&self, symbol: &Symbol, timeframe: &str) -> Result<Url, SyncError> {
        endpoint(
            &self.api_url,
            &format!("core/api/market_data/{symbol}/"),
            &[("tf", timeframe)],
        )
    }

    pub fn live_chart_url(&self, symbol: &Symbol) -> Result<Url, SyncError> {
        endpoint(&self.api_url, &format!("api/market_data/{symbol}/"), &[])
    }

    pub fn trades_url(&self) -> Result<Url, SyncError> {
        endpoint(&self.api_url, "trades/api/trades/", &[])
    }

    /// Account balance as seen by the trade blotter
    pub fn trade_portfolio_url(&self) -> Result<Url, SyncError> {
        endpoint(&self.api_url, "trades/api/portfolio/", &[])
    }

    /// Account balance plus open positions
    pub fn portfolio_url(&self) -> Result<Url, SyncError> {
        endpoint(&self.api_url, "core/api/portfolio/", &[])
    }

    pub fn symbols_url(&self) -> Result<Url, SyncError> {
        endpoint(&self.api_url, "core/api/symbols/", &[])
    }

    pub fn signals_url(&self, limit: usize) -> Result<Url, SyncError> {
        let limit = limit.to_string();
        endpoint(&self.api_url, "signals/api/signals/", &[("limit", limit.as_str())])
    }

    pub fn logs_url(&self, limit: usize, source: &str) -> Result<Url, SyncError> {
        let limit = limit.to_string();
        endpoint(
            &self.api_url,
            "api/monitoring/logs/",
            &[("limit", limit.as_str()), ("source", source)],
        )
    }

    pub fn market_stream_url(&self, symbol: &Symbol) -> Result<Url, SyncError> {
        endpoint(&self.ws_url, &format!("ws/market/{symbol}/"), &[])
    }

    pub fn trades_stream_url(&self) -> Result<Url, SyncError> {
        endpoint(&self.ws_url, "ws/trades/", &[])
    }

    pub fn portfolio_stream_url(&self) -> Result<Url, SyncError> {
        endpoint(&self.ws_url, "ws/portfolio/", &[])
    }

    pub fn live_prices_stream_url(&self) -> Result<Url, SyncError> {
        endpoint(&self.ws_url, "ws/live-prices/", &[])
    }

    pub fn signals_stream_url(&self) -> Result<Url, SyncError> {
        endpoint(&self.ws_url, "ws/signals/", &[])
    }

    pub fn logs_stream_url(&self) -> Result<Url, SyncError> {
        endpoint(&self.ws_url, "ws/logs/", &[])
    }
}

/// Join `path` onto `base` (keeping any path prefix of the base) and append the query pairs
fn endpoint(base: &str, path: &str, query: &[(&str, &str)]) -> Result<Url, SyncError> {
    let mut url = Url::parse(&format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    ))?;

    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }

    Ok(url)
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DashboardConfig::default();
        assert_eq!(config.api_url, "http://localhost:8000");
        assert_eq!(config.ws_url, "ws://localhost:8000");
        assert_eq!(config.live_chart_capacity, 50);
        assert_eq!(config.signal_capacity, 30);
        assert_eq!(config.log_capacity, 500);
        assert_eq!(config.max_pending_deltas, 10_000);
    }

    #[test]
    fn test_config_builder() {
        let config = DashboardConfig::default()
            .with_api_url("http://10.0.0.5:9000")
            .with_ws_url("wss://feed.example.com")
            .with_signal_capacity(10)
            .with_ping_interval(Duration::from_secs(5));

        assert_eq!(config.api_url, "http://10.0.0.5:9000");
        assert_eq!(config.ws_url, "wss://feed.example.com");
        assert_eq!(config.signal_capacity, 10);
        assert_eq!(config.ping_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_endpoint_urls() {
        let config = DashboardConfig::default();
        let symbol = Symbol::new("BTCUSD");

        assert_eq!(
            config.candles_url(&symbol, "5m").unwrap().as_str(),
            "http://localhost:8000/core/api/market_data/BTCUSD/?tf=5m"
        );
        assert_eq!(
            config.logs_url(500, "trading").unwrap().as_str(),
            "http://localhost:8000/api/monitoring/logs/?limit=500&source=trading"
        );
        assert_eq!(
            config.live_prices_stream_url().unwrap().as_str(),
            "ws://localhost:8000/ws/live-prices/"
        );
        assert_eq!(
            config.market_stream_url(&symbol).unwrap().as_str(),
            "ws://localhost:8000/ws/market/BTCUSD/"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path_prefix() {
        let config = DashboardConfig::default().with_api_url("http://gateway:8080/ellen/");

        assert_eq!(
            config.trades_url().unwrap().as_str(),
            "http://gateway:8080/ellen/trades/api/trades/"
        );
    }

    #[test]
    fn test_invalid_base_url_is_network_error() {
        let config = DashboardConfig::default().with_api_url("not a url");

        assert!(matches!(config.symbols_url(), Err(SyncError::Network(_))));
    }
}
