//! Headless trade monitor: keeps the trade dashboard, signal feed and one log source live and
//! logs every published revision.
//!
//! Environment:
//! - `API_URL` / `WS_URL`: backend base urls
//! - `LOG_SOURCE`: log source to follow (default: trading)
//! - `RUST_LOG`: tracing filter (default: info)

use ellen_live::{
    DashboardConfig, LogFeed, RestClient, SignalFeed, TradeDashboard, TradeDashboardView,
    ViewDriver, shared::views::filter_signals, watch_view,
};
use rustls::crypto::ring::default_provider;
use std::{error::Error, sync::Arc};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = default_provider().install_default();
    init_logging();

    let config = Arc::new(DashboardConfig::from_env());
    let log_source = std::env::var("LOG_SOURCE").unwrap_or_else(|_| "trading".to_string());
    let signal_query = std::env::var("SIGNAL_FILTER").unwrap_or_default();

    info!(api = %config.api_url, ws = %config.ws_url, "Starting trade monitor");

    let client = RestClient::new(Arc::clone(&config));
    let max_pending = config.max_pending_deltas;

    let trades = ViewDriver::spawn(TradeDashboard::new(client.clone()), (), max_pending);
    let signals = ViewDriver::spawn(SignalFeed::new(client.clone()), (), max_pending);
    let logs = ViewDriver::spawn(LogFeed::new(client), log_source.clone(), max_pending);

    let watchers = [
        watch_view("trades", trades.subscribe(), summarize_trades),
        watch_view("signals", signals.subscribe(), move |signals| {
            format!(
                "{} signals ({} matching {:?})",
                signals.len(),
                filter_signals(signals, &signal_query).len(),
                signal_query
            )
        }),
        watch_view("logs", logs.subscribe(), move |entries| {
            format!("{} entries from {}", entries.len(), log_source)
        }),
    ];

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    trades.close().await;
    signals.close().await;
    logs.close().await;
    for watcher in watchers {
        let _ = watcher.await;
    }

    Ok(())
}

fn summarize_trades(view: &TradeDashboardView) -> String {
    let metrics = &view.metrics;
    format!(
        "{} open / {} closed, balance {}, pnl {} ({:.1}% win rate), max drawdown {}",
        view.open_trades().count(),
        view.closed_trades().count(),
        view.usd_balance
            .map(|balance| balance.to_string())
            .unwrap_or_else(|| "-".to_string()),
        metrics.total_pnl,
        metrics.win_rate_pct(),
        metrics.max_drawdown,
    )
}


fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
