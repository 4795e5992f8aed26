//! Status event payloads.

/// Events consumed by a status display.
///
/// Delivery is best effort; listeners should tolerate duplicates and gaps and
/// poll the pending count as a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEvent {
    /// The number of pending operations changed.
    QueueUpdate {
        /// Pending operations at emission time.
        count: usize,
    },
    /// A drain pass started or finished.
    SyncState {
        /// True while a pass is running.
        syncing: bool,
    },
}
