//! Broadcast + history progress events.
//!
//! The synchronous `run` contract returns a manifest at the end; this
//! store is the optional event-callback surface layered on top. Late
//! subscribers receive history first, then live updates.

use std::{
    collections::VecDeque,
    sync::RwLock,
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::status::{BatchState, StatusReport};
use crate::task::TaskStatus;

/// Default history size limit (4 MB).
const HISTORY_BYTES: usize = 4 * 1024 * 1024;

/// Progress event emitted while a run is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    /// A batch was shipped to the remote executor.
    Dispatched { batch_id: Uuid, total: usize },
    /// The remote executor reported a task as running.
    TaskStarted { batch_id: Uuid, task_id: String },
    /// A task reached a terminal status.
    TaskFinished {
        batch_id: Uuid,
        task_id: String,
        status: TaskStatus,
    },
    /// A status snapshot was observed and applied.
    SnapshotObserved(StatusReport),
    /// A non-monotonic snapshot was rejected.
    SnapshotRejected { batch_id: Uuid, completed: usize },
    /// The batch reached a terminal aggregate state.
    BatchFinished { batch_id: Uuid, state: BatchState },
}

impl BatchEvent {
    fn approx_bytes(&self) -> usize {
        // Rough accounting for history eviction; exact size is not needed.
        match self {
            Self::TaskStarted { task_id, .. } | Self::TaskFinished { task_id, .. } => {
                64 + task_id.len()
            }
            Self::SnapshotObserved(report) => {
                96 + report.current_task_id.as_ref().map_or(0, String::len)
            }
            Self::Dispatched { .. } | Self::SnapshotRejected { .. } | Self::BatchFinished { .. } => {
                64
            }
        }
    }
}

#[derive(Clone)]
struct StoredEvent {
    event: BatchEvent,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredEvent>,
    total_bytes: usize,
}

/// Event store with broadcast and history support.
pub struct EventStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<BatchEvent>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    /// Create a new event store.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
        }
    }

    /// Push an event to both live listeners and history.
    pub fn push(&self, event: BatchEvent) {
        tracing::trace!(?event, "progress event");
        let _ = self.sender.send(event.clone()); // live listeners
        let bytes = event.approx_bytes();

        let mut inner = self.inner.write().unwrap();
        while inner.total_bytes.saturating_add(bytes) > HISTORY_BYTES {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredEvent { event, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<BatchEvent> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<BatchEvent> {
        self.inner
            .read()
            .unwrap()
            .history
            .iter()
            .map(|s| s.event.clone())
            .collect()
    }

    /// Stream that yields history first, then live updates.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, BatchEvent> {
        let (history, rx) = (self.get_history(), self.get_receiver());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}
