use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::events::ResourceKind;
use crate::Error;

/// A keyed unit of work for the sync queue. The queue processes at most one
/// task per key at a time; ordering across distinct keys is unspecified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncTask {
    pub kind: ResourceKind,
    pub key: String,
}

impl SyncTask {
    pub fn new(kind: ResourceKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

/// Port to the work queue. Dedup, per-key serialization and retry backoff are
/// the queue's concern; this crate only decides what to enqueue and when to
/// hand a task back.
pub trait SyncQueue: Send + Sync {
    fn enqueue(&self, task: SyncTask);
    fn requeue(&self, task: SyncTask, error: Error);
}

const REQUEUE_DELAY: Duration = Duration::from_secs(1);

/// Channel-backed queue used by the binary. Requeued tasks re-enter after a
/// flat delay; escalating backoff belongs to the queue consumer.
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<SyncTask>,
}

impl ChannelQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncTask>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SyncQueue for ChannelQueue {
    fn enqueue(&self, task: SyncTask) {
        if self.tx.send(task).is_err() {
            debug!("sync queue closed, dropping task");
        }
    }

    fn requeue(&self, task: SyncTask, error: Error) {
        warn!(key = %task.key, %error, "requeueing sync task");
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REQUEUE_DELAY).await;
            let _ = tx.send(task);
        });
    }
}
