use std::sync::Arc;

use serde::{Deserialize, Deserializer, de::Error as _};
use thiserror::Error;
use tokio::{
    sync::{Mutex, broadcast},
    time::Duration,
};
use tracing::{debug, error, info, warn};

use crate::{
    op::{Operation, OperationDraft, now_ms},
    persist::{OperationStore, PersistError, PersistResult},
    runtime::{events::QueueEvent, notifier::StatusNotifier},
    types::{OpId, OpKind, OpStatus, OwnerId, Payload},
};

use super::traits::{RemoteApply, RemoteError, RemoteRecord};

/// Reason recorded when a pending record is found already over budget.
pub const MAX_RETRIES_REASON: &str = "Max retries exceeded";

/// Errors surfaced by [`OperationQueue`].
#[derive(Debug, Error)]
pub enum QueueError {
    /// The store rejected a call.
    #[error("storage error: {0}")]
    Storage(#[from] PersistError),
    /// A blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Join(String),
}

/// Drain and retry tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Failed attempts allowed before an operation turns terminal. At least 1.
    #[serde(deserialize_with = "deserialize_max_retries")]
    pub max_retries: u32,
    /// Bound on a single remote write; `0` waits forever.
    pub apply_timeout_ms: u64,
    /// Newest error messages kept per operation; `0` keeps all.
    pub max_error_history: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            apply_timeout_ms: 30_000,
            max_error_history: 0,
        }
    }
}

fn deserialize_max_retries<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    match u32::deserialize(deserializer)? {
        0 => Err(D::Error::custom("max_retries must be at least 1")),
        n => Ok(n),
    }
}

/// Outcome counts of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Remote writes attempted.
    pub attempted: usize,
    /// Remote writes confirmed; their records were removed.
    pub succeeded: usize,
    /// Failures that left the operation pending.
    pub retried: usize,
    /// Operations that became terminally failed.
    pub exhausted: usize,
    /// Operations no longer pending when their outcome was recorded,
    /// typically settled by a concurrent drain.
    pub vanished: usize,
}

/// Durable write queue replayed against a [`RemoteApply`] capability.
///
/// Owns its store exclusively. Every store call runs on the blocking pool
/// under one lock acquisition, so each read-modify-write is atomic with
/// respect to concurrent enqueues and drains.
pub struct OperationQueue<S> {
    store: Arc<Mutex<S>>,
    notifier: StatusNotifier,
    config: Arc<QueueConfig>,
}

impl<S> Clone for OperationQueue<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            notifier: self.notifier.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: OperationStore + 'static> OperationQueue<S> {
    /// Wraps `store` with a fresh notifier.
    pub fn new(store: S, config: QueueConfig) -> Self {
        Self::with_notifier(store, config, StatusNotifier::new())
    }

    /// Wraps `store`, publishing through an existing notifier.
    ///
    /// A `max_retries` of 0 is raised to 1 so a fresh operation is always
    /// attempted at least once.
    pub fn with_notifier(store: S, mut config: QueueConfig, notifier: StatusNotifier) -> Self {
        if config.max_retries == 0 {
            warn!("max_retries of 0 raised to 1");
            config.max_retries = 1;
        }
        Self {
            store: Arc::new(Mutex::new(store)),
            notifier,
            config: Arc::new(config),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Notifier used for queue events.
    pub fn notifier(&self) -> &StatusNotifier {
        &self.notifier
    }

    /// Shorthand for `notifier().subscribe()`.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.notifier.subscribe()
    }

    /// Persists a new pending operation and returns its id.
    ///
    /// Never touches the network.
    pub async fn enqueue(
        &self,
        collection: impl Into<String>,
        kind: OpKind,
        payload: Payload,
        owner_id: impl Into<OwnerId>,
    ) -> Result<OpId, QueueError> {
        self.enqueue_draft(OperationDraft {
            collection: collection.into(),
            kind,
            payload,
            owner_id: owner_id.into(),
        })
        .await
    }

    /// Persists a prepared draft as a new pending operation.
    pub async fn enqueue_draft(&self, draft: OperationDraft) -> Result<OpId, QueueError> {
        let op = Operation::from_draft(draft);
        let id = op.id.clone();
        debug!(op_id = %id, collection = %op.collection, kind = %op.kind, "enqueue");

        let count = self
            .with_store(move |store| {
                store.put(&op)?;
                store.count_by_status(OpStatus::Pending)
            })
            .await
            .inspect_err(|err| error!(op_id = %id, %err, "enqueue failed"))?;

        self.notifier.queue_update(count);
        Ok(id)
    }

    /// Reads the store on every call.
    pub async fn pending_count(&self) -> Result<usize, QueueError> {
        self.with_store(|store| store.count_by_status(OpStatus::Pending))
            .await
    }

    /// Operations whose retry budget is exhausted.
    pub async fn failed_count(&self) -> Result<usize, QueueError> {
        self.with_store(|store| store.count_by_status(OpStatus::Failed))
            .await
    }

    /// Pending operations in replay order.
    pub async fn pending_operations(&self) -> Result<Vec<Operation>, QueueError> {
        self.with_store(|store| store.list_by_status(OpStatus::Pending))
            .await
    }

    /// Terminally failed operations, kept for inspection.
    pub async fn failed_operations(&self) -> Result<Vec<Operation>, QueueError> {
        self.with_store(|store| store.list_by_status(OpStatus::Failed))
            .await
    }

    /// Loads one operation in any status.
    pub async fn get(&self, id: impl Into<OpId>) -> Result<Operation, QueueError> {
        let id = id.into();
        self.with_store(move |store| store.get(&id)).await
    }

    /// Forces the store to stable storage.
    pub async fn flush(&self) -> Result<(), QueueError> {
        self.with_store(|store| store.flush()).await
    }

    /// Replays every pending operation once, oldest first.
    ///
    /// A failing operation is recorded and skipped; only a store fault aborts
    /// the pass. The end-of-pass notifications fire either way.
    pub async fn drain<R: RemoteApply>(&self, remote: &R) -> Result<DrainReport, QueueError> {
        self.notifier.sync_state(true);

        let result = self.drain_pass(remote).await;
        match &result {
            Ok(report) => info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                retried = report.retried,
                exhausted = report.exhausted,
                vanished = report.vanished,
                "drain finished"
            ),
            Err(err) => error!(%err, "drain aborted by storage fault"),
        }

        match self.pending_count().await {
            Ok(count) => self.notifier.queue_update(count),
            Err(err) => warn!(%err, "pending count unavailable after drain"),
        }
        self.notifier.sync_state(false);
        result
    }

    async fn drain_pass<R: RemoteApply>(&self, remote: &R) -> Result<DrainReport, QueueError> {
        let ops = self
            .with_store(|store| store.list_by_status(OpStatus::Pending))
            .await?;
        let max_retries = self.config.max_retries;
        let max_history = self.config.max_error_history;
        let mut report = DrainReport::default();
        info!(pending = ops.len(), "drain started");

        for op in ops {
            if op.retry_count >= max_retries {
                let updated = self
                    .update_pending(&op.id, move |op| {
                        op.mark_failed(MAX_RETRIES_REASON.to_string(), max_history)
                    })
                    .await?;
                if updated.is_some() {
                    warn!(op_id = %op.id, retry_count = op.retry_count, "operation over retry budget");
                    report.exhausted += 1;
                    self.publish_count().await?;
                } else {
                    report.vanished += 1;
                }
                continue;
            }

            report.attempted += 1;
            match self.apply_bounded(remote, &op).await {
                Ok(_) => {
                    let id = op.id.clone();
                    let removed = self.with_store(move |store| store.delete(&id)).await?;
                    if removed {
                        debug!(op_id = %op.id, collection = %op.collection, kind = %op.kind, "synced");
                        report.succeeded += 1;
                    } else {
                        debug!(op_id = %op.id, "already removed by a concurrent drain");
                        report.vanished += 1;
                    }
                }
                Err(err) => {
                    let at_ms = now_ms();
                    let message = err.message;
                    let updated = self
                        .update_pending(&op.id, move |op| {
                            op.record_failure(message, at_ms, max_retries, max_history)
                        })
                        .await?;
                    match updated {
                        Some(op) if op.status == OpStatus::Failed => {
                            warn!(
                                op_id = %op.id,
                                collection = %op.collection,
                                retry_count = op.retry_count,
                                "sync failed permanently"
                            );
                            report.exhausted += 1;
                            self.publish_count().await?;
                        }
                        Some(op) => {
                            warn!(
                                op_id = %op.id,
                                collection = %op.collection,
                                retry_count = op.retry_count,
                                max_retries,
                                "sync failed, will retry"
                            );
                            report.retried += 1;
                        }
                        None => report.vanished += 1,
                    }
                }
            }
        }

        Ok(report)
    }

    async fn apply_bounded<R: RemoteApply>(
        &self,
        remote: &R,
        op: &Operation,
    ) -> Result<RemoteRecord, RemoteError> {
        let fut = remote.apply(op.kind, &op.collection, &op.payload);
        let timeout_ms = self.config.apply_timeout_ms;
        if timeout_ms == 0 {
            return fut.await;
        }
        match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::new(format!(
                "remote apply timed out after {timeout_ms}ms"
            ))),
        }
    }

    /// Applies `f` to a still-pending record and persists it in one locked
    /// step. Returns `None` when the record is gone or no longer pending.
    async fn update_pending<F>(&self, id: &str, f: F) -> Result<Option<Operation>, QueueError>
    where
        F: FnOnce(&mut Operation) + Send + 'static,
    {
        let id = id.to_string();
        self.with_store(move |store| {
            let mut op = match store.get(&id) {
                Ok(op) => op,
                Err(PersistError::NotFound(_)) => return Ok(None),
                Err(err) => return Err(err),
            };
            if op.status != OpStatus::Pending {
                return Ok(None);
            }
            f(&mut op);
            store.update(&op)?;
            Ok(Some(op))
        })
        .await
    }

    async fn publish_count(&self) -> Result<usize, QueueError> {
        let count = self.pending_count().await?;
        self.notifier.queue_update(count);
        Ok(count)
    }

    async fn with_store<T, F>(&self, f: F) -> Result<T, QueueError>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> PersistResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || {
            let mut guard = store.blocking_lock();
            f(&mut *guard)
        })
        .await
        .map_err(|e| QueueError::Join(e.to_string()))?
        .map_err(QueueError::from)
    }
}
