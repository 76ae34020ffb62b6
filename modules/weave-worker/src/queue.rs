//! Activity queue. In place of a literal Temporal client, the queue is
//! modeled as a trait with an in-process `tokio::sync::mpsc`
//! implementation. This is enough to exercise heartbeats, cooperative
//! cancellation, and graceful drain without fabricating a dependency on
//! an external service SDK.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use weave_types::ids::SyncId;

/// One unit of dispatchable work. `RunSync` is the "workflow" kind spec
/// §4.15 distinguishes from the handful of bookkeeping "activity" kinds.
#[derive(Debug, Clone)]
pub enum Activity {
    RunSync { sync_id: SyncId, force_full_sync: bool },
    CreateJob { sync_id: SyncId },
    MarkCancelled { sync_id: SyncId },
    CleanupStuckJobs,
}

impl Activity {
    /// Metrics/log label — never the sync id itself.
    pub fn kind(&self) -> &'static str {
        match self {
            Activity::RunSync { .. } => "run_sync",
            Activity::CreateJob { .. } => "create_job",
            Activity::MarkCancelled { .. } => "mark_cancelled",
            Activity::CleanupStuckJobs => "cleanup_stuck_jobs",
        }
    }

    /// Whether this is a long-running "workflow" activity (counts
    /// against `workflow_poll_capacity`) or a short bookkeeping one
    /// (counts against `activity_poll_capacity`).
    pub fn is_workflow(&self) -> bool {
        matches!(self, Activity::RunSync { .. })
    }
}

/// A dispatched activity handed to a poller, paired with the
/// cancellation token the orchestrator should observe for this specific
/// unit of work.
pub struct Dispatched {
    pub activity: Activity,
    pub cancel: CancellationToken,
}

#[async_trait]
pub trait ActivityQueue: Send + Sync {
    async fn enqueue(&self, activity: Activity) -> anyhow::Result<()>;
    /// Blocks until an activity is available or the queue is closed
    /// (`None`). Pollers call this in a loop; a drained/closed queue lets
    /// them exit their poll loop cleanly.
    async fn poll(&self) -> Option<Dispatched>;
    /// Cancels a specific in-flight `RunSync` activity by sync id.
    fn cancel_sync(&self, sync_id: SyncId);
}

/// In-process queue backed by an unbounded `mpsc` channel plus a side
/// table of cancellation tokens for activities currently dispatched, so
/// `cancel_sync` can reach a `RunSync` activity already handed to a
/// poller.
pub struct InProcessActivityQueue {
    sender: mpsc::UnboundedSender<Activity>,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<Activity>>,
    in_flight: dashmap::DashMap<SyncId, CancellationToken>,
}

impl InProcessActivityQueue {
    pub fn new() -> std::sync::Arc<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        std::sync::Arc::new(Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            in_flight: dashmap::DashMap::new(),
        })
    }
}

#[async_trait]
impl ActivityQueue for InProcessActivityQueue {
    async fn enqueue(&self, activity: Activity) -> anyhow::Result<()> {
        self.sender.send(activity).map_err(|_| anyhow::anyhow!("activity queue closed"))?;
        Ok(())
    }

    async fn poll(&self) -> Option<Dispatched> {
        let activity = self.receiver.lock().await.recv().await?;
        let cancel = CancellationToken::new();
        if let Activity::RunSync { sync_id, .. } = &activity {
            self.in_flight.insert(*sync_id, cancel.clone());
        }
        Some(Dispatched { activity, cancel })
    }

    fn cancel_sync(&self, sync_id: SyncId) {
        if let Some(token) = self.in_flight.get(&sync_id) {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_poll_round_trips() {
        let queue = InProcessActivityQueue::new();
        let sync_id = SyncId::new();
        queue.enqueue(Activity::RunSync { sync_id, force_full_sync: false }).await.unwrap();
        let dispatched = queue.poll().await.unwrap();
        assert!(matches!(dispatched.activity, Activity::RunSync { .. }));
        assert!(!dispatched.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_sync_cancels_the_dispatched_token() {
        let queue = InProcessActivityQueue::new();
        let sync_id = SyncId::new();
        queue.enqueue(Activity::RunSync { sync_id, force_full_sync: false }).await.unwrap();
        let dispatched = queue.poll().await.unwrap();
        queue.cancel_sync(sync_id);
        assert!(dispatched.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn distinct_sync_ids_get_independent_tokens() {
        let queue = InProcessActivityQueue::new();
        let a = SyncId::new();
        let b = SyncId::new();
        queue.enqueue(Activity::RunSync { sync_id: a, force_full_sync: false }).await.unwrap();
        queue.enqueue(Activity::RunSync { sync_id: b, force_full_sync: false }).await.unwrap();
        let first = queue.poll().await.unwrap();
        let second = queue.poll().await.unwrap();

        queue.cancel_sync(a);
        assert!(first.cancel.is_cancelled());
        assert!(!second.cancel.is_cancelled());
    }
}
