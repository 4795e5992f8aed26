use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::json;

use syncqueue::{
    core::store::MemoryStore,
    engine::{
        queue::{DrainReport, MAX_RETRIES_REASON, OperationQueue, QueueConfig, QueueError},
        traits::{RemoteApply, RemoteError, RemoteRecord},
    },
    op::{Operation, OperationDraft},
    persist::{OperationStore, PersistError, PersistResult, sqlite::SqliteOperationStore},
    runtime::events::QueueEvent,
    types::{OpKind, OpStatus, Payload, ANONYMOUS_OWNER},
};

/// Records every call; fails an item as many times as scripted.
#[derive(Default)]
struct ScriptedRemote {
    calls: Mutex<Vec<String>>,
    failures_left: Mutex<HashMap<String, u32>>,
    delay: Option<Duration>,
}

impl ScriptedRemote {
    fn failing(name: &str, times: u32) -> Self {
        let remote = Self::default();
        remote.fail(name, times);
        remote
    }

    fn fail(&self, name: &str, times: u32) {
        self.failures_left
            .lock()
            .expect("lock")
            .insert(name.to_string(), times);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("lock").clone()
    }
}

impl RemoteApply for ScriptedRemote {
    async fn apply(
        &self,
        kind: OpKind,
        _collection: &str,
        payload: &Payload,
    ) -> Result<RemoteRecord, RemoteError> {
        let name = payload["name"].as_str().unwrap_or_default().to_string();
        self.calls.lock().expect("lock").push(name.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        tokio::task::yield_now().await;

        let mut failures = self.failures_left.lock().expect("lock");
        match failures.get_mut(&name) {
            Some(left) if *left > 0 => {
                *left -= 1;
                Err(RemoteError::new(format!("{kind} {name}: 503 service unavailable")))
            }
            _ => Ok(json!({ "id": name })),
        }
    }
}

fn payload(name: &str) -> Payload {
    let mut p = Payload::new();
    p.insert("name".to_string(), json!(name));
    p
}

fn queue() -> OperationQueue<MemoryStore> {
    OperationQueue::new(MemoryStore::new(), QueueConfig::default())
}

async fn enqueue(queue: &OperationQueue<impl OperationStore + 'static>, name: &str) -> String {
    queue
        .enqueue("servicios", OpKind::Insert, payload(name), ANONYMOUS_OWNER)
        .await
        .expect("enqueue")
}

async fn assert_count_consistent(queue: &OperationQueue<impl OperationStore + 'static>) {
    let count = queue.pending_count().await.expect("count");
    let listed = queue.pending_operations().await.expect("list").len();
    assert_eq!(count, listed);
}

#[tokio::test]
async fn attempts_follow_creation_order_regardless_of_outcome() {
    let queue = queue();
    for name in ["A", "B", "C"] {
        enqueue(&queue, name).await;
    }
    let remote = ScriptedRemote::failing("B", 1);

    let report = queue.drain(&remote).await.expect("drain");

    assert_eq!(remote.calls(), vec!["A", "B", "C"]);
    assert_eq!(
        report,
        DrainReport {
            attempted: 3,
            succeeded: 2,
            retried: 1,
            ..DrainReport::default()
        }
    );
}

#[tokio::test]
async fn flaky_operation_is_eventually_removed_exactly_once() {
    let queue = OperationQueue::new(
        SqliteOperationStore::open_in_memory().expect("open"),
        QueueConfig::default(),
    );
    let id = enqueue(&queue, "X").await;
    let remote = ScriptedRemote::failing("X", 2);

    for _ in 0..3 {
        queue.drain(&remote).await.expect("drain");
        assert_count_consistent(&queue).await;
    }

    assert_eq!(remote.calls(), vec!["X", "X", "X"]);
    assert!(matches!(
        queue.get(id).await,
        Err(QueueError::Storage(PersistError::NotFound(_)))
    ));
    assert_eq!(queue.pending_count().await.expect("count"), 0);
    assert_eq!(queue.failed_count().await.expect("count"), 0);
}

#[tokio::test]
async fn retry_budget_exhaustion_is_terminal() {
    let queue = queue();
    let id = enqueue(&queue, "doomed").await;
    let remote = ScriptedRemote::failing("doomed", u32::MAX);

    for pass in 1..=3u32 {
        queue.drain(&remote).await.expect("drain");
        let op = queue.get(id.clone()).await.expect("get");
        assert_eq!(op.retry_count, pass);
    }

    let op = queue.get(id.clone()).await.expect("get");
    assert_eq!(op.status, OpStatus::Failed);
    assert_eq!(op.errors.len(), 3);
    assert!(op.errors[0].contains("503"));

    let report = queue.drain(&remote).await.expect("fourth drain");
    assert_eq!(report, DrainReport::default());
    assert_eq!(remote.calls().len(), 3);
    assert_eq!(queue.failed_operations().await.expect("failed").len(), 1);
    assert_eq!(queue.pending_count().await.expect("count"), 0);
}

#[tokio::test]
async fn one_failure_does_not_block_later_operations() {
    let queue = queue();
    let a = enqueue(&queue, "A").await;
    let b = enqueue(&queue, "B").await;
    let remote = ScriptedRemote::failing("A", 1);

    queue.drain(&remote).await.expect("drain");

    let a = queue.get(a).await.expect("A stays queued");
    assert_eq!(a.status, OpStatus::Pending);
    assert_eq!(a.retry_count, 1);
    assert!(queue.get(b).await.is_err());
    assert_count_consistent(&queue).await;
}

#[tokio::test]
async fn pending_count_tracks_store_after_enqueue_and_drain() {
    let queue = queue();
    assert_count_consistent(&queue).await;
    for name in ["a", "b", "c", "d"] {
        enqueue(&queue, name).await;
        assert_count_consistent(&queue).await;
    }
    let remote = ScriptedRemote::failing("c", 1);
    queue.drain(&remote).await.expect("drain");
    assert_count_consistent(&queue).await;
    assert_eq!(queue.pending_count().await.expect("count"), 1);
}

#[tokio::test]
async fn concurrent_drains_leave_no_orphans() {
    let queue = OperationQueue::new(
        SqliteOperationStore::open_in_memory().expect("open"),
        QueueConfig::default(),
    );
    let names = ["p", "q", "r", "s", "t"];
    for name in names {
        enqueue(&queue, name).await;
    }
    let remote = ScriptedRemote::default();

    let (first, second) = tokio::join!(queue.drain(&remote), queue.drain(&remote));
    let (first, second) = (first.expect("first drain"), second.expect("second drain"));

    assert_eq!(queue.pending_count().await.expect("count"), 0);
    assert_eq!(queue.failed_count().await.expect("count"), 0);
    // At least once: a write may reach the remote from both passes.
    let calls = remote.calls();
    for name in names {
        assert!(calls.iter().any(|c| c == name), "{name} never applied");
    }
    // Each record is removed by exactly one pass; the other sees it vanish.
    assert_eq!(first.succeeded + second.succeeded, names.len());
}

#[tokio::test]
async fn hung_remote_write_counts_as_a_failed_attempt() {
    let queue = OperationQueue::new(
        MemoryStore::new(),
        QueueConfig {
            apply_timeout_ms: 20,
            ..QueueConfig::default()
        },
    );
    let id = enqueue(&queue, "slow").await;
    let remote = ScriptedRemote {
        delay: Some(Duration::from_millis(500)),
        ..ScriptedRemote::default()
    };

    let report = queue.drain(&remote).await.expect("drain");

    assert_eq!(report.retried, 1);
    let op = queue.get(id).await.expect("get");
    assert_eq!(op.retry_count, 1);
    assert_eq!(op.errors, vec!["remote apply timed out after 20ms"]);
}

#[tokio::test]
async fn stale_over_budget_record_is_failed_without_attempt() {
    let mut stale = Operation::from_draft(OperationDraft {
        collection: "torneos".to_string(),
        kind: OpKind::Update,
        payload: payload("stale"),
        owner_id: "u-9".to_string(),
    });
    stale.retry_count = 5;
    let mut store = MemoryStore::new();
    store.put(&stale).expect("put");

    let queue = OperationQueue::new(store, QueueConfig::default());
    let remote = ScriptedRemote::default();
    let report = queue.drain(&remote).await.expect("drain");

    assert_eq!(report.exhausted, 1);
    assert_eq!(report.attempted, 0);
    assert!(remote.calls().is_empty());
    let op = queue.get(stale.id).await.expect("get");
    assert_eq!(op.status, OpStatus::Failed);
    assert_eq!(op.errors, vec![MAX_RETRIES_REASON]);
}

#[tokio::test]
async fn error_history_cap_keeps_latest_messages() {
    let queue = OperationQueue::new(
        MemoryStore::new(),
        QueueConfig {
            max_retries: 10,
            max_error_history: 2,
            ..QueueConfig::default()
        },
    );
    let id = enqueue(&queue, "noisy").await;
    let remote = ScriptedRemote::failing("noisy", u32::MAX);
    for _ in 0..4 {
        queue.drain(&remote).await.expect("drain");
    }
    let op = queue.get(id).await.expect("get");
    assert_eq!(op.retry_count, 4);
    assert_eq!(op.errors.len(), 2);
}

#[tokio::test]
async fn drain_publishes_sync_window_and_counts() {
    let queue = OperationQueue::new(
        MemoryStore::new(),
        QueueConfig {
            max_retries: 1,
            ..QueueConfig::default()
        },
    );
    let mut rx = queue.subscribe();
    enqueue(&queue, "one").await;
    enqueue(&queue, "doomed").await;
    queue
        .drain(&ScriptedRemote::failing("doomed", 1))
        .await
        .expect("drain");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(
        events,
        vec![
            QueueEvent::QueueUpdate { count: 1 },
            QueueEvent::QueueUpdate { count: 2 },
            QueueEvent::SyncState { syncing: true },
            // "doomed" turned terminal mid-pass.
            QueueEvent::QueueUpdate { count: 0 },
            QueueEvent::QueueUpdate { count: 0 },
            QueueEvent::SyncState { syncing: false },
        ]
    );
}

struct BrokenStore;

impl OperationStore for BrokenStore {
    fn put(&mut self, _op: &Operation) -> PersistResult<()> {
        Err(PersistError::Message("disk full".to_string()))
    }
    fn get(&self, id: &str) -> PersistResult<Operation> {
        Err(PersistError::NotFound(id.to_string()))
    }
    fn list_by_status(&self, _status: OpStatus) -> PersistResult<Vec<Operation>> {
        Err(PersistError::Message("database is locked".to_string()))
    }
    fn count_by_status(&self, _status: OpStatus) -> PersistResult<usize> {
        Ok(0)
    }
    fn update(&mut self, op: &Operation) -> PersistResult<()> {
        Err(PersistError::NotFound(op.id.clone()))
    }
    fn delete(&mut self, _id: &str) -> PersistResult<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn storage_faults_surface_to_callers() {
    let queue = OperationQueue::new(BrokenStore, QueueConfig::default());
    let mut rx = queue.subscribe();

    let err = queue
        .enqueue("servicios", OpKind::Insert, payload("x"), ANONYMOUS_OWNER)
        .await
        .expect_err("enqueue must fail");
    assert!(matches!(err, QueueError::Storage(PersistError::Message(_))));

    let err = queue
        .drain(&ScriptedRemote::default())
        .await
        .expect_err("drain must fail");
    assert!(err.to_string().contains("database is locked"));

    let mut last = None;
    while let Ok(event) = rx.try_recv() {
        last = Some(event);
    }
    assert_eq!(last, Some(QueueEvent::SyncState { syncing: false }));
}

#[tokio::test]
async fn shared_counter_sees_every_attempt() {
    let queue = queue();
    enqueue(&queue, "k").await;
    let remote = Arc::new(ScriptedRemote::failing("k", 1));

    queue.drain(&remote).await.expect("drain through Arc");
    queue.drain(&remote).await.expect("drain through Arc");

    assert_eq!(remote.calls(), vec!["k", "k"]);
    assert_eq!(queue.pending_count().await.expect("count"), 0);
}

/// Settles every pending record through a nested drain before confirming,
/// so the outer pass finds its record already gone.
struct SettlingRemote {
    queue: OperationQueue<MemoryStore>,
    inner: ScriptedRemote,
}

impl RemoteApply for SettlingRemote {
    async fn apply(
        &self,
        _kind: OpKind,
        _collection: &str,
        payload: &Payload,
    ) -> Result<RemoteRecord, RemoteError> {
        self.queue
            .drain(&self.inner)
            .await
            .map_err(|err| RemoteError::new(err.to_string()))?;
        Ok(json!(payload))
    }
}

#[tokio::test]
async fn record_removed_by_another_pass_counts_as_vanished() {
    let queue = queue();
    enqueue(&queue, "shared").await;
    let remote = SettlingRemote {
        queue: queue.clone(),
        inner: ScriptedRemote::default(),
    };

    let report = queue.drain(&remote).await.expect("drain");

    assert_eq!(
        report,
        DrainReport {
            attempted: 1,
            vanished: 1,
            ..DrainReport::default()
        }
    );
    assert_eq!(remote.inner.calls(), vec!["shared"]);
    assert_eq!(queue.pending_count().await.expect("count"), 0);
}

#[tokio::test]
async fn zero_retry_budget_still_attempts_once() {
    let queue = OperationQueue::new(
        MemoryStore::new(),
        QueueConfig {
            max_retries: 0,
            ..QueueConfig::default()
        },
    );
    assert_eq!(queue.config().max_retries, 1);
    let id = enqueue(&queue, "once").await;
    let remote = ScriptedRemote::failing("once", 1);

    let report = queue.drain(&remote).await.expect("drain");

    assert_eq!(report.attempted, 1);
    assert_eq!(report.exhausted, 1);
    assert_eq!(remote.calls(), vec!["once"]);
    let op = queue.get(id).await.expect("get");
    assert_eq!(op.status, OpStatus::Failed);
    assert_eq!(op.errors.len(), 1);
}
