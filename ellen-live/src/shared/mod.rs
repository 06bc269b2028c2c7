/// Shared modules for the Ellen live views
pub mod config;
pub mod driver;
pub mod error;
pub mod messages;
pub mod metrics;
pub mod reconciler;
pub mod series;
pub mod snapshot;
pub mod table;
pub mod types;
pub mod views;
pub mod websocket;
