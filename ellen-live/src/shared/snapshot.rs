//! One-shot authoritative snapshot fetches over REST.

use crate::shared::{
    config::DashboardConfig,
    error::SyncError,
    types::{Candle, LogEntry, PortfolioSnapshot, Signal, Symbol, SymbolInfo, TradePoint},
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::{fmt::Debug, sync::Arc};
use tracing::debug;
use url::Url;

/// Fetches the authoritative state a view is built from.
///
/// A failed load never touches the view: the owning reconciler keeps whatever it already shows
/// and moves to `Degraded`.
#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    type Params: Clone + Debug + Send + Sync + 'static;
    type Output: Send + 'static;

    async fn load(&self, params: &Self::Params) -> Result<Self::Output, SyncError>;
}

/// REST client for the dashboard backend
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    config: Arc<DashboardConfig>,
}

impl RestClient {
    pub fn new(config: Arc<DashboardConfig>) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// GET `url` and decode the JSON body.
    ///
    /// Transport failures and non-2xx statuses map to [`SyncError::Network`], a body that does
    /// not match `T` maps to [`SyncError::Decode`].
    pub async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SyncError> {
        debug!(%url, "fetching snapshot");

        let response = self
            .http
            .get(url)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SyncError::Network(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body = response.bytes().await?;

        serde_json::from_slice(&body)
            .map_err(|e| SyncError::Decode(format!("JSON parse failed: {}", e)))
    }

    pub async fn fetch_candles(
        &self,
        symbol: &Symbol,
        timeframe: &str,
    ) -> Result<Vec<Candle>, SyncError> {
        self.get_json(self.config.candles_url(symbol, timeframe)?).await
    }

    pub async fn fetch_live_chart(&self, symbol: &Symbol) -> Result<Vec<Candle>, SyncError> {
        self.get_json(self.config.live_chart_url(symbol)?).await
    }

    pub async fn fetch_trades(&self) -> Result<Vec<TradePoint>, SyncError> {
        self.get_json(self.config.trades_url()?).await
    }

    pub async fn fetch_trade_portfolio(&self) -> Result<PortfolioSnapshot, SyncError> {
        self.get_json(self.config.trade_portfolio_url()?).await
    }

    pub async fn fetch_portfolio(&self) -> Result<PortfolioSnapshot, SyncError> {
        self.get_json(self.config.portfolio_url()?).await
    }

    pub async fn fetch_symbols(&self) -> Result<Vec<SymbolInfo>, SyncError> {
        self.get_json(self.config.symbols_url()?).await
    }

    pub async fn fetch_signals(&self, limit: usize) -> Result<Vec<Signal>, SyncError> {
        self.get_json(self.config.signals_url(limit)?).await
    }

    pub async fn fetch_logs(&self, limit: usize, source: &str) -> Result<Vec<LogEntry>, SyncError> {
        self.get_json(self.config.logs_url(limit, source)?).await
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    use std::sync::Arc;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    /// Canned response: request path prefix, status, JSON body
    pub type Route = (&'static str, u16, &'static str);

    /// Serve canned HTTP/1.1 responses routed by path prefix, one connection per request, and
    /// return the base url to point a client at. Unknown paths get a 404.
    pub async fn serve(routes: Vec<Route>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes = Arc::new(routes);

        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let routes = Arc::clone(&routes);
                tokio::spawn(async move {
                    let mut request = vec![0u8; 8192];
                    let read = stream.read(&mut request).await.unwrap_or(0);
                    let request = String::from_utf8_lossy(&request[..read]);
                    let path = request.split_whitespace().nth(1).unwrap_or("/");

                    let (status, body) = routes
                        .iter()
                        .find(|(prefix, _, _)| path.starts_with(prefix))
                        .map(|(_, status, body)| (*status, *body))
                        .unwrap_or((404, r#"{"detail":"not found"}"#));

                    let response = format!(
                        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n{body}",
                        reason = if status < 400 { "OK" } else { "Error" },
                        len = body.len(),
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        format!("http://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn client(base: String) -> RestClient {
        RestClient::new(Arc::new(DashboardConfig::default().with_api_url(base)))
    }

    #[tokio::test]
    async fn test_fetch_candles() {
        let base = test_server::serve(vec![(
            "/core/api/market_data/BTCUSD/",
            200,
            r#"[{"start_time":"2024-05-01T12:00:00Z","open":1,"high":2,"low":0.5,"close":1.5},
                {"start_time":"2024-05-01T12:01:00Z","open":1.5,"high":2,"low":1,"close":1.75}]"#,
        )])
        .await;

        let candles = client(base)
            .fetch_candles(&Symbol::new("BTCUSD"), "1m")
            .await
            .unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, dec!(1.75));
    }

    #[tokio::test]
    async fn test_fetch_errors() {
        struct TestCase {
            status: u16,
            body: &'static str,
            network: bool,
        }

        let tests = vec![
            // TC0: non-2xx is a network error
            TestCase {
                status: 502,
                body: r#"{"detail":"bad gateway"}"#,
                network: true,
            },
            // TC1: 2xx with the wrong shape is a decode error
            TestCase {
                status: 200,
                body: r#"{"usd_balance":"oops"}"#,
                network: false,
            },
            // TC2: 2xx with truncated JSON is a decode error
            TestCase {
                status: 200,
                body: r#"{"usd_balance": 10"#,
                network: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let base =
                test_server::serve(vec![("/core/api/portfolio/", test.status, test.body)]).await;
            let error = client(base).fetch_portfolio().await.unwrap_err();

            match (test.network, error) {
                (true, SyncError::Network(_)) | (false, SyncError::Decode(_)) => {}
                (_, error) => panic!("TC{} failed: {:?}", index, error),
            }
        }
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let error = client(format!("http://{addr}")).fetch_trades().await.unwrap_err();
        assert!(matches!(error, SyncError::Network(_)));
    }
}
