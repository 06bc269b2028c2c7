//! Async driver running one view on a single task.
//!
//! The snapshot load and the view's stream channels are started together; their results and
//! messages, plus commands from the owner, are multiplexed with `select!` and fed to the
//! [`Reconciler`] one at a time. A parameter switch drops the channels, aborts the load and
//! remounts under the next epoch.

use crate::shared::{
    error::SyncError,
    reconciler::{Epoch, Materialize, Reconciler, ViewReceiver, ViewSnapshot, ViewState},
    snapshot::SnapshotLoader,
    websocket::ChannelEvent,
};
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

/// Typed delta feed of a view, usually a mapped
/// [`StreamChannel`](crate::shared::websocket::StreamChannel)
pub type DeltaStream<D> = BoxStream<'static, ChannelEvent<D>>;

pub type DeltaOf<V> = <<V as LiveView>::Container as Materialize>::Delta;
pub type ViewOf<V> = <<V as LiveView>::Container as Materialize>::View;

/// A dashboard view: how to load it, what it materializes into and which feeds update it.
pub trait LiveView: SnapshotLoader + Clone + 'static {
    type Container: Materialize<Snapshot = Self::Output> + Send + 'static;

    /// Empty container for one mount
    fn container(&self, params: &Self::Params) -> Self::Container;

    /// Open the delta feeds for one mount; dropping them closes the channels
    fn streams(&self, params: &Self::Params) -> Result<Vec<DeltaStream<DeltaOf<Self>>>, SyncError>;
}

#[derive(Debug)]
pub enum ViewCommand<P> {
    /// Close the current mount and remount with new parameters
    Switch(P),
    /// Re-issue the snapshot of a degraded (or live) view
    Retry,
    Close,
}

/// Owner handle of a running view. Dropping it closes the view.
pub struct ViewDriver<V: LiveView> {
    commands: mpsc::UnboundedSender<ViewCommand<V::Params>>,
    views: ViewReceiver<ViewOf<V>>,
    task: JoinHandle<()>,
}

impl<V> ViewDriver<V>
where
    V: LiveView,
{
    /// Mount `view` with `params` on a new task
    pub fn spawn(view: V, params: V::Params, max_pending: usize) -> Self {
        let reconciler = Reconciler::new(view.container(&params), max_pending);
        let views = reconciler.subscribe();
        let (commands, command_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_view(view, params, reconciler, command_rx));

        Self {
            commands,
            views,
            task,
        }
    }

    pub fn subscribe(&self) -> ViewReceiver<ViewOf<V>> {
        self.views.clone()
    }

    pub fn current(&self) -> Arc<ViewSnapshot<ViewOf<V>>> {
        self.views.borrow().clone()
    }

    /// Returns false if the view task has already stopped
    pub fn switch(&self, params: V::Params) -> bool {
        self.commands.send(ViewCommand::Switch(params)).is_ok()
    }

    /// Returns false if the view task has already stopped
    pub fn retry(&self) -> bool {
        self.commands.send(ViewCommand::Retry).is_ok()
    }

    /// Close the view and wait for its task to finish
    pub async fn close(self) {
        let _ = self.commands.send(ViewCommand::Close);
        if let Err(e) = self.task.await {
            error!("View task failed: {}", e);
        }
    }
}

/// Log every published revision of a view until it closes.
///
/// `summarize` renders the data of a `Live` publish into the log line.
pub fn watch_view<W, F>(
    name: &'static str,
    mut views: ViewReceiver<W>,
    summarize: F,
) -> JoinHandle<()>
where
    W: Send + Sync + 'static,
    F: Fn(&W) -> String + Send + 'static,
{
    tokio::spawn(async move {
        while views.changed().await.is_ok() {
            let snapshot = Arc::clone(&views.borrow_and_update());
            match &snapshot.state {
                ViewState::Live => info!(
                    view = name,
                    epoch = %snapshot.epoch,
                    revision = snapshot.revision,
                    "{}",
                    summarize(&snapshot.data)
                ),
                ViewState::Degraded(error) => {
                    warn!(view = name, epoch = %snapshot.epoch, %error, "view degraded")
                }
                ViewState::Closed => break,
                state => info!(view = name, epoch = %snapshot.epoch, ?state, "view state"),
            }
        }
    })
}

/// In-flight work of one epoch
struct Mount<D> {
    epoch: Epoch,
    loader: JoinHandle<()>,
    streams: SelectAll<DeltaStream<D>>,
}

impl<D> Mount<D> {
    fn stop(self) {
        self.loader.abort();
        drop(self.streams);
        debug!(epoch = %self.epoch, "mount stopped");
    }
}

type SnapshotResult<V> = (Epoch, Result<<V as SnapshotLoader>::Output, SyncError>);

async fn run_view<V>(
    view: V,
    mut params: V::Params,
    mut reconciler: Reconciler<V::Container>,
    mut commands: mpsc::UnboundedReceiver<ViewCommand<V::Params>>,
) where
    V: LiveView,
{
    let (result_tx, mut results) = mpsc::unbounded_channel::<SnapshotResult<V>>();

    let epoch = reconciler.mount();
    let mut mount = start_mount(&view, &params, epoch, &result_tx);

    loop {
        tokio::select! {
            Some((epoch, result)) = results.recv() => {
                let _ = reconciler.on_snapshot(epoch, result);
            }
            Some(event) = mount.streams.next() => match event {
                ChannelEvent::Message(delta) => {
                    let _ = reconciler.on_delta(mount.epoch, delta);
                }
                ChannelEvent::Status(status) => {
                    debug!(epoch = %mount.epoch, ?status, "stream status");
                }
                ChannelEvent::Error(e) => {
                    error!(epoch = %mount.epoch, "Stream error: {}", e);
                }
            },
            command = commands.recv() => match command {
                Some(ViewCommand::Switch(next)) => {
                    info!(from = ?params, to = ?next, "switching view parameters");
                    mount.stop();
                    params = next;
                    let epoch = reconciler.remount(view.container(&params));
                    mount = start_mount(&view, &params, epoch, &result_tx);
                }
                Some(ViewCommand::Retry) => {
                    if let Some(epoch) = reconciler.retry() {
                        mount.loader.abort();
                        mount.loader = spawn_load(&view, &params, epoch, &result_tx);
                    }
                }
                Some(ViewCommand::Close) | None => {
                    mount.stop();
                    reconciler.close();
                    break;
                }
            },
        }
    }
}

/// Start the snapshot load and open the channels concurrently
fn start_mount<V>(
    view: &V,
    params: &V::Params,
    epoch: Epoch,
    results: &mpsc::UnboundedSender<SnapshotResult<V>>,
) -> Mount<DeltaOf<V>>
where
    V: LiveView,
{
    let loader = spawn_load(view, params, epoch, results);

    let streams = match view.streams(params) {
        Ok(streams) => stream::select_all(streams),
        Err(e) => {
            error!(%epoch, "Failed to open view streams: {}", e);
            SelectAll::new()
        }
    };

    Mount {
        epoch,
        loader,
        streams,
    }
}

fn spawn_load<V>(
    view: &V,
    params: &V::Params,
    epoch: Epoch,
    results: &mpsc::UnboundedSender<SnapshotResult<V>>,
) -> JoinHandle<()>
where
    V: LiveView,
{
    let loader = view.clone();
    let params = params.clone();
    let results = results.clone();

    tokio::spawn(async move {
        let result = loader.load(&params).await;
        if results.send((epoch, result)).is_err() {
            debug!(%epoch, "view task gone, dropping snapshot");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::reconciler::test_support::{Item, ItemTable, item};
    use async_trait::async_trait;
    use futures::channel::mpsc as feed;
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };
    use tokio::sync::Semaphore;

    type Feed = feed::UnboundedSender<ChannelEvent<Item>>;

    /// Loads `[param, B, C]` once the gate hands out a permit; one queued feed per mount
    #[derive(Clone)]
    struct FakeView {
        gate: Arc<Semaphore>,
        failing: Arc<AtomicBool>,
        feeds: Arc<Mutex<VecDeque<feed::UnboundedReceiver<ChannelEvent<Item>>>>>,
    }

    impl FakeView {
        fn new(permits: usize) -> Self {
            Self {
                gate: Arc::new(Semaphore::new(permits)),
                failing: Arc::new(AtomicBool::new(false)),
                feeds: Arc::new(Mutex::new(VecDeque::new())),
            }
        }

        fn add_feed(&self) -> Feed {
            let (tx, rx) = feed::unbounded();
            self.feeds.lock().unwrap().push_back(rx);
            tx
        }
    }

    #[async_trait]
    impl SnapshotLoader for FakeView {
        type Params = char;
        type Output = Vec<Item>;

        async fn load(&self, params: &char) -> Result<Vec<Item>, SyncError> {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| SyncError::Network(e.to_string()))?;
            permit.forget();

            if self.failing.load(Ordering::SeqCst) {
                return Err(SyncError::Network("HTTP error: 500 Internal Server Error".to_string()));
            }
            Ok(vec![item(*params, 1), item('B', 1), item('C', 1)])
        }
    }

    impl LiveView for FakeView {
        type Container = ItemTable;

        fn container(&self, _: &char) -> ItemTable {
            ItemTable::default()
        }

        fn streams(&self, _: &char) -> Result<Vec<DeltaStream<Item>>, SyncError> {
            Ok(self
                .feeds
                .lock()
                .unwrap()
                .pop_front()
                .into_iter()
                .map(|rx| rx.boxed())
                .collect())
        }
    }

    async fn wait_until(
        views: &mut ViewReceiver<Vec<(char, u32)>>,
        predicate: impl FnMut(&Arc<ViewSnapshot<Vec<(char, u32)>>>) -> bool,
    ) -> Arc<ViewSnapshot<Vec<(char, u32)>>> {
        tokio::time::timeout(Duration::from_secs(5), views.wait_for(predicate))
            .await
            .expect("timed out waiting for view")
            .expect("view task stopped")
            .clone()
    }

    #[tokio::test]
    async fn test_deltas_before_snapshot_are_replayed_in_order() {
        let view = FakeView::new(0);
        let feed = view.add_feed();
        let driver = ViewDriver::spawn(view.clone(), 'A', 100);
        let mut views = driver.subscribe();

        feed.unbounded_send(ChannelEvent::Message(item('B', 2))).unwrap();
        feed.unbounded_send(ChannelEvent::Message(item('D', 1))).unwrap();
        view.gate.add_permits(1);

        let snapshot = wait_until(&mut views, |v| v.state.is_live() && v.data.len() == 4).await;
        assert_eq!(snapshot.data, vec![('A', 1), ('B', 2), ('C', 1), ('D', 1)]);

        driver.close().await;
    }

    #[tokio::test]
    async fn test_switch_remounts_under_next_epoch() {
        let view = FakeView::new(10);
        let first_feed = view.add_feed();
        let _second_feed = view.add_feed();
        let driver = ViewDriver::spawn(view.clone(), 'A', 100);
        let mut views = driver.subscribe();

        let first = wait_until(&mut views, |v| v.state.is_live()).await;
        assert_eq!(first.epoch, Epoch::INITIAL);

        assert!(driver.switch('Q'));
        let second =
            wait_until(&mut views, |v| v.epoch > Epoch::INITIAL && v.state.is_live()).await;

        assert_eq!(second.data, vec![('Q', 1), ('B', 1), ('C', 1)]);
        // Channels of the previous mount are gone
        assert!(first_feed
            .unbounded_send(ChannelEvent::Message(item('Z', 1)))
            .is_err());

        driver.close().await;
    }

    #[tokio::test]
    async fn test_degraded_view_recovers_on_retry() {
        let view = FakeView::new(10);
        view.failing.store(true, Ordering::SeqCst);
        let driver = ViewDriver::spawn(view.clone(), 'A', 100);
        let mut views = driver.subscribe();

        let degraded = wait_until(&mut views, |v| v.state.error().is_some()).await;
        assert!(matches!(degraded.state, ViewState::Degraded(SyncError::Network(_))));
        assert!(degraded.data.is_empty());

        view.failing.store(false, Ordering::SeqCst);
        assert!(driver.retry());

        let live = wait_until(&mut views, |v| v.state.is_live()).await;
        assert_eq!(live.epoch, degraded.epoch);
        assert_eq!(live.data.len(), 3);

        driver.close().await;
    }

    #[tokio::test]
    async fn test_close_before_snapshot_stops_all_effects() {
        let view = FakeView::new(0);
        let feed = view.add_feed();
        let driver = ViewDriver::spawn(view.clone(), 'A', 100);
        let mut views = driver.subscribe();

        wait_until(&mut views, |v| v.state == ViewState::Loading).await;
        driver.close().await;

        let last = views.borrow_and_update().clone();
        assert_eq!(last.state, ViewState::Closed);
        assert!(last.data.is_empty());

        view.gate.add_permits(1);
        assert!(feed.unbounded_send(ChannelEvent::Message(item('D', 1))).is_err());
        tokio::task::yield_now().await;

        // Publisher is gone with the task, nothing more can arrive
        assert!(views.has_changed().is_err());
        assert_eq!(views.borrow().revision, last.revision);
    }

    #[tokio::test]
    async fn test_watch_view_stops_when_view_closes() {
        let view = FakeView::new(10);
        let feed = view.add_feed();
        let driver = ViewDriver::spawn(view.clone(), 'A', 100);
        let mut views = driver.subscribe();
        let watcher = watch_view("items", driver.subscribe(), |data: &Vec<(char, u32)>| {
            format!("{} items", data.len())
        });

        wait_until(&mut views, |v| v.state.is_live()).await;
        feed.unbounded_send(ChannelEvent::Message(item('D', 1))).unwrap();
        wait_until(&mut views, |v| v.data.len() == 4).await;

        driver.close().await;

        tokio::time::timeout(Duration::from_secs(5), watcher)
            .await
            .expect("watcher did not stop after close")
            .unwrap();
    }
}
