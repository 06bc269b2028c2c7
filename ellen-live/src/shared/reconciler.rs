//! Per-view state machine merging one snapshot and its live deltas into a materialized view.
//!
//! ```text
//!  Idle ──mount──▶ Loading ──snapshot ok──▶ Live
//!                   │   ▲ ▲                  │
//!      snapshot err │   │ └──────retry───────┘
//!                   ▼   │ retry
//!                 Degraded
//!
//!  any ──close──▶ Closed        any ──remount──▶ Loading (next epoch, empty container)
//! ```
//!
//! The reconciler is synchronous and deterministic: the caller feeds it results tagged with the
//! epoch they were issued under, and every result from another epoch is discarded. Observers
//! read immutable [`ViewSnapshot`]s from a `watch` channel and never touch the container.

use crate::shared::error::SyncError;
use derive_more::Display;
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Container a [`Reconciler`] materializes into.
pub trait Materialize {
    type Snapshot: Send + 'static;
    type Delta: Send + 'static;
    type View: Clone + Send + Sync + 'static;

    /// Replace the whole contents with an authoritative snapshot
    fn replace_all(&mut self, snapshot: Self::Snapshot);

    /// Apply one delta, returning false when it was rejected and nothing changed
    fn apply(&mut self, delta: Self::Delta) -> bool;

    /// Immutable copy of the current contents for observers
    fn view(&self) -> Self::View;
}

/// Generation token of one mount of a view. Strictly increasing across remounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub struct Epoch(pub u64);

impl Epoch {
    pub const INITIAL: Epoch = Epoch(1);

    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ViewState {
    Idle,
    Loading,
    Live,
    /// Snapshot failed; the data shown is whatever was there before the failure
    Degraded(SyncError),
    Closed,
}

impl ViewState {
    pub fn is_live(&self) -> bool {
        matches!(self, ViewState::Live)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, ViewState::Closed)
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            ViewState::Degraded(error) => Some(error),
            _ => None,
        }
    }
}

/// What observers see on every publish
#[derive(Debug, Clone)]
pub struct ViewSnapshot<V> {
    pub epoch: Epoch,
    /// Number of publishes so far, across epochs
    pub revision: u64,
    pub state: ViewState,
    pub data: V,
}

pub type ViewReceiver<V> = watch::Receiver<Arc<ViewSnapshot<V>>>;

pub struct Reconciler<M: Materialize> {
    container: M,
    epoch: Epoch,
    state: ViewState,
    pending: VecDeque<M::Delta>,
    max_pending: usize,
    revision: u64,
    publisher: watch::Sender<Arc<ViewSnapshot<M::View>>>,
}

impl<M> Reconciler<M>
where
    M: Materialize,
{
    /// Create an `Idle` reconciler owning `container`.
    ///
    /// At most `max_pending` deltas are buffered while the snapshot is outstanding; beyond that
    /// the oldest buffered delta is dropped.
    pub fn new(container: M, max_pending: usize) -> Self {
        let initial = ViewSnapshot {
            epoch: Epoch::INITIAL,
            revision: 0,
            state: ViewState::Idle,
            data: container.view(),
        };
        let (publisher, _) = watch::channel(Arc::new(initial));

        Self {
            container,
            epoch: Epoch::INITIAL,
            state: ViewState::Idle,
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
            revision: 0,
            publisher,
        }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn subscribe(&self) -> ViewReceiver<M::View> {
        self.publisher.subscribe()
    }

    /// Last published snapshot
    pub fn current(&self) -> Arc<ViewSnapshot<M::View>> {
        self.publisher.borrow().clone()
    }

    /// `Idle` -> `Loading`. Returns the epoch the snapshot load must be tagged with.
    pub fn mount(&mut self) -> Epoch {
        if self.state == ViewState::Idle {
            self.state = ViewState::Loading;
            info!(epoch = %self.epoch, "view mounted, loading snapshot");
            self.publish();
        }
        self.epoch
    }

    /// Resolve the outstanding snapshot load.
    ///
    /// On success the snapshot replaces the container and every buffered delta is replayed in
    /// arrival order before the single publish. On failure the container is left untouched and
    /// the view turns `Degraded`; buffered deltas are kept for a later retry.
    pub fn on_snapshot(
        &mut self,
        epoch: Epoch,
        result: Result<M::Snapshot, SyncError>,
    ) -> Result<(), SyncError> {
        self.check_epoch(epoch)?;

        if self.state != ViewState::Loading {
            debug!(%epoch, state = ?self.state, "no snapshot outstanding, discarding result");
            return Err(self.stale(epoch));
        }

        match result {
            Ok(snapshot) => {
                self.container.replace_all(snapshot);
                let replayed = self.pending.len();
                for delta in self.pending.drain(..) {
                    self.container.apply(delta);
                }
                self.state = ViewState::Live;
                info!(%epoch, replayed, "view live");
            }
            Err(error) => {
                warn!(%epoch, %error, "snapshot failed, view degraded");
                self.state = ViewState::Degraded(error);
            }
        }

        self.publish();
        Ok(())
    }

    /// Feed one stream delta. Applied and published immediately when `Live`, buffered in
    /// arrival order otherwise. Returns whether a publish happened.
    pub fn on_delta(&mut self, epoch: Epoch, delta: M::Delta) -> Result<bool, SyncError> {
        self.check_epoch(epoch)?;

        if self.state.is_live() {
            if self.container.apply(delta) {
                self.publish();
                return Ok(true);
            }
            return Ok(false);
        }

        if self.pending.len() >= self.max_pending {
            self.pending.pop_front();
            warn!(
                %epoch,
                max_pending = self.max_pending,
                "pending delta buffer full, dropping oldest delta"
            );
        }
        self.pending.push_back(delta);
        Ok(false)
    }

    /// Re-issue the snapshot under the same epoch, from `Degraded` (retry) or `Live` (refresh).
    ///
    /// The container keeps its contents until the new snapshot resolves, and deltas arriving in
    /// the meantime are buffered again. Returns the epoch to tag the load with, `None` when no
    /// load should be issued.
    pub fn retry(&mut self) -> Option<Epoch> {
        match self.state {
            ViewState::Degraded(_) | ViewState::Live => {
                self.state = ViewState::Loading;
                info!(epoch = %self.epoch, pending = self.pending.len(), "reloading snapshot");
                self.publish();
                Some(self.epoch)
            }
            _ => None,
        }
    }

    /// Start over under the next epoch with a fresh container, as for a parameter change.
    ///
    /// Everything still in flight for the previous epoch becomes stale.
    pub fn remount(&mut self, container: M) -> Epoch {
        let previous = self.epoch;
        self.epoch = previous.next();
        self.container = container;
        self.pending.clear();
        self.state = ViewState::Loading;
        info!(%previous, epoch = %self.epoch, "view remounted, loading snapshot");
        self.publish();
        self.epoch
    }

    /// Tear the view down. Later results for any epoch are discarded without a publish.
    pub fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.state = ViewState::Closed;
        self.pending.clear();
        info!(epoch = %self.epoch, "view closed");
        self.publish();
    }

    fn check_epoch(&self, epoch: Epoch) -> Result<(), SyncError> {
        if self.state.is_closed() || epoch != self.epoch {
            debug!(
                received = %epoch,
                current = %self.epoch,
                state = ?self.state,
                "discarding stale result"
            );
            return Err(self.stale(epoch));
        }
        Ok(())
    }

    fn stale(&self, epoch: Epoch) -> SyncError {
        SyncError::StaleResult {
            received: epoch.0,
            current: self.epoch.0,
        }
    }

    fn publish(&mut self) {
        self.revision += 1;
        self.publisher.send_replace(Arc::new(ViewSnapshot {
            epoch: self.epoch,
            revision: self.revision,
            state: self.state.clone(),
            data: self.container.view(),
        }));
    }
}
