//! WebSocket stream channel for one live-update feed
//!
//! One transport per channel, no automatic reconnection: when the connection drops the channel
//! reports `Disconnected` and its event sequence ends. Payloads that fail to decode are dropped
//! without interrupting the feed.

use crate::shared::error::SyncError;
use futures::{SinkExt, Stream, StreamExt};
use std::{
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    sync::{mpsc, oneshot},
    time::{Instant, interval_at},
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Longest raw payload prefix written to the log when a message is dropped
const MAX_LOGGED_PAYLOAD: usize = 256;

/// Stream channel configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// WebSocket endpoint URL
    pub url: String,
    /// Ping interval to keep connection alive
    pub ping_interval: Duration,
    /// Maximum channel buffer size for events
    pub channel_buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8000".to_string(),
            ping_interval: Duration::from_secs(30),
            channel_buffer_size: 1000,
        }
    }
}

impl StreamConfig {
    /// Create a new configuration with custom URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set ping interval
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set channel buffer size
    pub fn with_channel_buffer_size(mut self, size: usize) -> Self {
        self.channel_buffer_size = size;
        self
    }
}

/// Connection status updates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Event delivered by a [`StreamChannel`] to its owner, in transport order
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent<T> {
    Message(T),
    Status(ConnectionStatus),
    Error(SyncError),
}

impl<T> ChannelEvent<T> {
    /// Map the message payload, leaving status and error events untouched
    pub fn map<U, F>(self, op: F) -> ChannelEvent<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            ChannelEvent::Message(message) => ChannelEvent::Message(op(message)),
            ChannelEvent::Status(status) => ChannelEvent::Status(status),
            ChannelEvent::Error(error) => ChannelEvent::Error(error),
        }
    }
}

/// Typed payload of a stream channel, decoded from one text frame
pub trait StreamMessage: Sized + Send + 'static {
    fn decode(payload: &str) -> Result<Self, SyncError>;
}

/// Handle to one open feed.
///
/// Consumed either with [`StreamChannel::next`] or as a [`futures::Stream`]. Closing is
/// idempotent and also happens on drop; once closed the handle yields nothing more, including
/// events already buffered.
#[derive(Debug)]
pub struct StreamChannel<T> {
    url: String,
    events: mpsc::Receiver<ChannelEvent<T>>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl<T> StreamChannel<T>
where
    T: StreamMessage,
{
    /// Open the transport in the background and return the handle immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: StreamConfig) -> Self {
        let (event_tx, events) = mpsc::channel(config.channel_buffer_size.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let url = config.url.clone();

        tokio::spawn(run_stream_loop::<T>(config, event_tx, shutdown_rx));

        Self {
            url,
            events,
            shutdown: Some(shutdown_tx),
        }
    }
}

impl<T> StreamChannel<T> {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_none()
    }

    /// Next event in transport order, `None` once closed or once the transport has ended
    pub async fn next(&mut self) -> Option<ChannelEvent<T>> {
        if self.is_closed() {
            return None;
        }
        self.events.recv().await
    }

    /// Stop the transport. Safe to call repeatedly or after the transport already failed.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            debug!(url = %self.url, "closing stream channel");
            let _ = shutdown.send(());
            self.events.close();
        }
    }
}

impl<T> Drop for StreamChannel<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> Stream for StreamChannel<T> {
    type Item = ChannelEvent<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.is_closed() {
            return Poll::Ready(None);
        }
        this.events.poll_recv(cx)
    }
}

/// Connect once, then forward decoded messages until the server closes, the transport fails,
/// the owner closes the channel or the owner drops the receiver.
async fn run_stream_loop<T>(
    config: StreamConfig,
    event_tx: mpsc::Sender<ChannelEvent<T>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) where
    T: StreamMessage,
{
    let url = config.url.as_str();
    let _ = event_tx
        .send(ChannelEvent::Status(ConnectionStatus::Connecting))
        .await;

    let connection = tokio::select! {
        result = connect_async(url) => result,
        _ = &mut shutdown_rx => {
            debug!(%url, "stream channel closed before connecting");
            return;
        }
    };

    let ws_stream = match connection {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            error!("Failed to connect to {}: {}", url, e);
            let _ = event_tx.send(ChannelEvent::Error(SyncError::from(e))).await;
            let _ = event_tx
                .send(ChannelEvent::Status(ConnectionStatus::Disconnected))
                .await;
            return;
        }
    };

    info!("Connected to stream at {}", url);
    let _ = event_tx
        .send(ChannelEvent::Status(ConnectionStatus::Connected))
        .await;

    let (mut write, mut read) = ws_stream.split();
    let mut ping = interval_at(Instant::now() + config.ping_interval, config.ping_interval);

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!(%url, "stream channel closed by owner");
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            _ = ping.tick() => {
                if write.send(Message::Ping(vec![].into())).await.is_err() {
                    debug!("Failed to send ping, connection likely dead");
                }
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => match T::decode(text.as_str()) {
                    Ok(message) => {
                        if event_tx.send(ChannelEvent::Message(message)).await.is_err() {
                            warn!(%url, "Event receiver dropped, stopping channel");
                            break;
                        }
                    }
                    Err(error) => {
                        debug!(
                            %url,
                            %error,
                            payload = truncate_payload(text.as_str()),
                            "dropping malformed stream message"
                        );
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("Server closed stream at {}", url);
                    break;
                }
                Some(Ok(_)) => {
                    // Ping/Pong/Binary frames carry no feed data
                }
                Some(Err(e)) => {
                    error!("WebSocket error on {}: {}", url, e);
                    let _ = event_tx.send(ChannelEvent::Error(SyncError::from(e))).await;
                    break;
                }
            }
        }
    }

    let _ = event_tx
        .send(ChannelEvent::Status(ConnectionStatus::Disconnected))
        .await;
}

fn truncate_payload(payload: &str) -> &str {
    match payload.char_indices().nth(MAX_LOGGED_PAYLOAD) {
        Some((index, _)) => &payload[..index],
        None => payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Tick {
        seq: u32,
    }

    impl StreamMessage for Tick {
        fn decode(payload: &str) -> Result<Self, SyncError> {
            serde_json::from_str(payload)
                .map_err(|error| SyncError::MalformedMessage(error.to_string()))
        }
    }

    /// Serve one client: send `frames`, then hold the connection until the client leaves
    async fn serve(frames: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            for frame in frames {
                ws.send(Message::text(frame)).await.unwrap();
            }
            while let Some(Ok(_)) = ws.next().await {}
        });

        format!("ws://{addr}")
    }

    async fn next_event<T: StreamMessage>(
        channel: &mut StreamChannel<T>,
    ) -> Option<ChannelEvent<T>> {
        tokio::time::timeout(Duration::from_secs(5), channel.next())
            .await
            .expect("timed out waiting for channel event")
    }

    #[test]
    fn test_config_builder() {
        let config = StreamConfig::new("ws://localhost:8080/ws/trades/")
            .with_ping_interval(Duration::from_secs(15))
            .with_channel_buffer_size(500);

        assert_eq!(config.url, "ws://localhost:8080/ws/trades/");
        assert_eq!(config.ping_interval, Duration::from_secs(15));
        assert_eq!(config.channel_buffer_size, 500);
    }

    #[test]
    fn test_truncate_payload() {
        let long = "x".repeat(1000);
        assert_eq!(truncate_payload(&long).len(), MAX_LOGGED_PAYLOAD);
        assert_eq!(truncate_payload("{}"), "{}");
    }

    #[tokio::test]
    async fn test_malformed_messages_are_dropped_and_channel_survives() {
        let url = serve(vec![
            r#"{"message":"connected to market group"}"#,
            r#"{"seq":1}"#,
            "not json at all",
            r#"{"seq":"two"}"#,
            r#"{"seq":2}"#,
        ])
        .await;

        let mut channel = StreamChannel::<Tick>::open(StreamConfig::new(url));
        let mut received = Vec::new();

        while received.len() < 2 {
            match next_event(&mut channel).await {
                Some(ChannelEvent::Message(tick)) => received.push(tick.seq),
                Some(ChannelEvent::Status(_)) => {}
                Some(ChannelEvent::Error(error)) => panic!("unexpected error event: {error}"),
                None => panic!("channel ended early"),
            }
        }

        assert_eq!(received, vec![1, 2]);
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_ends_sequence() {
        let url = serve(vec![r#"{"seq":1}"#]).await;
        let mut channel = StreamChannel::<Tick>::open(StreamConfig::new(url));

        assert_eq!(
            next_event(&mut channel).await,
            Some(ChannelEvent::Status(ConnectionStatus::Connecting))
        );

        channel.close();
        channel.close();

        assert!(channel.is_closed());
        assert_eq!(channel.next().await, None);
    }

    #[tokio::test]
    async fn test_connection_failure_is_reported_without_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut channel = StreamChannel::<Tick>::open(StreamConfig::new(format!("ws://{addr}")));

        assert_eq!(
            next_event(&mut channel).await,
            Some(ChannelEvent::Status(ConnectionStatus::Connecting))
        );
        assert!(matches!(
            next_event(&mut channel).await,
            Some(ChannelEvent::Error(SyncError::Network(_)))
        ));
        assert_eq!(
            next_event(&mut channel).await,
            Some(ChannelEvent::Status(ConnectionStatus::Disconnected))
        );
        assert_eq!(next_event(&mut channel).await, None);
    }

    #[tokio::test]
    async fn test_channel_as_stream_preserves_order() {
        let url = serve(vec![r#"{"seq":1}"#, r#"{"seq":2}"#, r#"{"seq":3}"#]).await;
        let channel = StreamChannel::<Tick>::open(StreamConfig::new(url));

        let received: Vec<u32> = channel
            .filter_map(|event| async move {
                match event {
                    ChannelEvent::Message(tick) => Some(tick.seq),
                    _ => None,
                }
            })
            .take(3)
            .collect()
            .await;

        assert_eq!(received, vec![1, 2, 3]);
    }
}
