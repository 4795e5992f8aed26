use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::debug;

use super::events::QueueEvent;

const EVENT_CAPACITY: usize = 1024;

/// Fire-and-forget broadcaster for [`QueueEvent`]s.
#[derive(Debug, Clone)]
pub struct StatusNotifier {
    events_tx: broadcast::Sender<QueueEvent>,
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusNotifier {
    /// Creates a notifier with no subscribers.
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { events_tx }
    }

    /// Receives every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events_tx.subscribe()
    }

    /// Publishes the current pending count.
    pub fn queue_update(&self, count: usize) {
        let _ = self.events_tx.send(QueueEvent::QueueUpdate { count });
    }

    /// Publishes the start (`true`) or end (`false`) of a drain pass.
    pub fn sync_state(&self, syncing: bool) {
        let _ = self.events_tx.send(QueueEvent::SyncState { syncing });
    }

    /// Calls `f` with every pending count published from now on.
    ///
    /// Must be called inside a tokio runtime. The task ends when every
    /// notifier clone is dropped or the handle is aborted.
    pub fn on_queue_update<F>(&self, mut f: F) -> JoinHandle<()>
    where
        F: FnMut(usize) + Send + 'static,
    {
        self.listen(move |event| {
            if let QueueEvent::QueueUpdate { count } = event {
                f(count);
            }
        })
    }

    /// Calls `f` whenever a drain pass starts (`true`) or finishes (`false`).
    pub fn on_sync_state<F>(&self, mut f: F) -> JoinHandle<()>
    where
        F: FnMut(bool) + Send + 'static,
    {
        self.listen(move |event| {
            if let QueueEvent::SyncState { syncing } = event {
                f(syncing);
            }
        })
    }

    fn listen<F>(&self, mut f: F) -> JoinHandle<()>
    where
        F: FnMut(QueueEvent) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => f(event),
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "status listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
