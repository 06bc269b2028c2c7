//! Headless market monitor: follows the candle charts for one symbol plus the portfolio.
//!
//! Environment:
//! - `API_URL` / `WS_URL`: backend base urls
//! - `SYMBOL`: chart symbol (default: BTCUSD)
//! - `TIMEFRAME`: candle timeframe of the full chart (default: 1m)
//! - `RUST_LOG`: tracing filter (default: info)

use ellen_live::{
    Candle, CandleChart, ChartParams, DashboardConfig, LiveLineChart, PortfolioOverview,
    RestClient, Symbol, ViewDriver, watch_view,
};
use rustls::crypto::ring::default_provider;
use std::{error::Error, sync::Arc};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = default_provider().install_default();
    init_logging();

    let config = Arc::new(DashboardConfig::from_env());
    let symbol = Symbol::new(std::env::var("SYMBOL").unwrap_or_else(|_| "BTCUSD".to_string()));
    let timeframe = std::env::var("TIMEFRAME").unwrap_or_else(|_| "1m".to_string());

    info!(
        %symbol,
        %timeframe,
        api = %config.api_url,
        ws = %config.ws_url,
        "Starting market monitor"
    );

    let client = RestClient::new(Arc::clone(&config));
    let max_pending = config.max_pending_deltas;

    let chart = ViewDriver::spawn(
        CandleChart::new(client.clone()),
        ChartParams::new(symbol.clone(), timeframe),
        max_pending,
    );
    let line = ViewDriver::spawn(LiveLineChart::new(client.clone()), symbol, max_pending);
    let portfolio = ViewDriver::spawn(PortfolioOverview::new(client), (), max_pending);

    let watchers = [
        watch_view("chart", chart.subscribe(), summarize_candles),
        watch_view("line", line.subscribe(), summarize_candles),
        watch_view("portfolio", portfolio.subscribe(), |view| {
            format!(
                "{} balance {}, {} positions",
                view.name.as_deref().unwrap_or("portfolio"),
                view.usd_balance
                    .map(|balance| balance.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                view.positions.len()
            )
        }),
    ];

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    chart.close().await;
    line.close().await;
    portfolio.close().await;
    for watcher in watchers {
        let _ = watcher.await;
    }

    Ok(())
}

fn summarize_candles(candles: &Vec<Candle>) -> String {
    match candles.last() {
        Some(last) => format!(
            "{} candles, last {} close {}",
            candles.len(),
            last.time,
            last.close
        ),
        None => "no candles".to_string(),
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
