#![allow(missing_docs, clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tasklite_core::{Category, NewTask, TaskFields, TaskId, TaskPatch, TaskStatus, UserId};
use tasklite_store::{LocalTaskStore, StoreConfig};
use tasklite_sync::{
    AuthSessionGate, RemoteError, RemoteEvent, RemoteRecord, RemoteStore, RemoteSubscription,
    SyncConfig, SyncEngine, SyncHandle, SyncStatus,
};
use tokio::sync::{mpsc, watch};

// --- fakes -----------------------------------------------------------------

#[derive(Default)]
struct FakeRemoteInner {
    records: HashMap<UserId, HashMap<TaskId, RemoteRecord>>,
    subscribers: Vec<(UserId, mpsc::Sender<RemoteEvent>)>,
    fail_pushes: u32,
    fail_subscribes: u32,
    push_calls: usize,
}

/// In-memory remote store with optimistic revision checks and
/// injectable transport failures.
#[derive(Default)]
struct FakeRemote {
    inner: Mutex<FakeRemoteInner>,
}

impl FakeRemote {
    fn record(&self, user: &UserId, id: TaskId) -> Option<RemoteRecord> {
        self.inner.lock().records.get(user)?.get(&id).cloned()
    }

    fn record_count(&self, user: &UserId) -> usize {
        self.inner
            .lock()
            .records
            .get(user)
            .map_or(0, HashMap::len)
    }

    /// Overwrite a record directly, simulating a concurrent writer.
    fn set_record(&self, user: &UserId, id: TaskId, record: RemoteRecord) {
        self.inner
            .lock()
            .records
            .entry(user.clone())
            .or_default()
            .insert(id, record);
    }

    fn fail_next_pushes(&self, n: u32) {
        self.inner.lock().fail_pushes = n;
    }

    fn fail_next_subscribes(&self, n: u32) {
        self.inner.lock().fail_subscribes = n;
    }

    /// Simulate the remote tearing down every event stream for `user`.
    fn drop_subscribers(&self, user: &UserId) {
        self.inner.lock().subscribers.retain(|(u, _)| u != user);
    }

    fn push_calls(&self) -> usize {
        self.inner.lock().push_calls
    }

    fn subscriber_count(&self, user: &UserId) -> usize {
        self.inner
            .lock()
            .subscribers
            .iter()
            .filter(|(u, tx)| u == user && !tx.is_closed())
            .count()
    }

    /// Deliver an event to every live subscriber of `user`.
    async fn emit(&self, user: &UserId, event: RemoteEvent) {
        let senders: Vec<mpsc::Sender<RemoteEvent>> = self
            .inner
            .lock()
            .subscribers
            .iter()
            .filter(|(u, _)| u == user)
            .map(|(_, tx)| tx.clone())
            .collect();
        for tx in senders {
            let _ = tx.send(event.clone()).await;
        }
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn push(
        &self,
        user: &UserId,
        id: TaskId,
        fields: &TaskFields,
        revision: u64,
    ) -> Result<u64, RemoteError> {
        let mut inner = self.inner.lock();
        inner.push_calls += 1;
        if inner.fail_pushes > 0 {
            inner.fail_pushes -= 1;
            return Err(RemoteError::Transport("injected outage".into()));
        }
        let records = inner.records.entry(user.clone()).or_default();
        if let Some(existing) = records.get(&id)
            && existing.revision >= revision
        {
            return Err(RemoteError::Conflict {
                current: existing.revision,
            });
        }
        records.insert(
            id,
            RemoteRecord {
                fields: fields.clone(),
                revision,
            },
        );
        Ok(revision)
    }

    async fn remove(&self, user: &UserId, id: TaskId, revision: u64) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        let records = inner.records.entry(user.clone()).or_default();
        if let Some(existing) = records.get(&id) {
            if existing.revision >= revision {
                return Err(RemoteError::Conflict {
                    current: existing.revision,
                });
            }
            records.remove(&id);
        }
        Ok(())
    }

    async fn fetch(&self, user: &UserId, id: TaskId) -> Result<Option<RemoteRecord>, RemoteError> {
        Ok(self.record(user, id))
    }

    async fn subscribe(&self, user: &UserId) -> Result<RemoteSubscription, RemoteError> {
        let mut inner = self.inner.lock();
        if inner.fail_subscribes > 0 {
            inner.fail_subscribes -= 1;
            return Err(RemoteError::Transport("injected outage".into()));
        }
        let (tx, rx) = mpsc::channel(32);
        inner.subscribers.push((user.clone(), tx));
        Ok(RemoteSubscription::new(rx))
    }
}

struct FakeAuth {
    tx: watch::Sender<Option<UserId>>,
}

impl FakeAuth {
    fn new(initial: Option<UserId>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    fn set(&self, identity: Option<UserId>) {
        self.tx.send_replace(identity);
    }
}

impl AuthSessionGate for FakeAuth {
    fn current_identity(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    fn watch_identity(&self) -> watch::Receiver<Option<UserId>> {
        self.tx.subscribe()
    }
}

// --- harness ---------------------------------------------------------------

struct Harness {
    store: Arc<LocalTaskStore>,
    remote: Arc<FakeRemote>,
    auth: Arc<FakeAuth>,
    handle: SyncHandle,
}

fn alice() -> UserId {
    UserId::from("alice")
}

fn spawn_harness(initial: Option<UserId>) -> Harness {
    let config = SyncConfig::default();
    let store = Arc::new(LocalTaskStore::new(StoreConfig::default()));
    let remote = Arc::new(FakeRemote::default());
    let auth = Arc::new(FakeAuth::new(initial));
    let handle = SyncEngine::spawn(
        Arc::clone(&store),
        Arc::clone(&remote) as Arc<dyn RemoteStore>,
        Arc::clone(&auth) as Arc<dyn AuthSessionGate>,
        config,
    );
    Harness {
        store,
        remote,
        auth,
        handle,
    }
}

/// Poll until the condition holds; panics after a generous timeout.
/// Tests run under a paused clock, so waiting is cheap.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(120), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

// --- tests -----------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn local_add_is_pushed_and_acknowledged() {
    let h = spawn_harness(Some(alice()));
    wait_until(|| h.remote.subscriber_count(&alice()) == 1).await;

    let task = h.store.add(NewTask::new("title", "body")).expect("valid");
    assert!(task.pending_sync);

    wait_until(|| h.remote.record(&alice(), task.id).is_some()).await;
    wait_until(|| !h.store.get(task.id).expect("lives").pending_sync).await;

    let record = h.remote.record(&alice(), task.id).expect("pushed");
    assert_eq!(record.revision, 0);
    assert_eq!(record.fields.title, "title");

    let status = h.handle.status();
    wait_until(|| *status.borrow() == SyncStatus::Idle).await;
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn local_delete_propagates_to_remote() {
    let h = spawn_harness(Some(alice()));
    wait_until(|| h.remote.subscriber_count(&alice()) == 1).await;

    let task = h.store.add(NewTask::new("title", "body")).expect("valid");
    wait_until(|| h.remote.record(&alice(), task.id).is_some()).await;

    h.store.delete(task.id).expect("exists");
    wait_until(|| h.remote.record(&alice(), task.id).is_none()).await;
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn conflict_merges_disjoint_field_groups() {
    let h = spawn_harness(Some(alice()));
    wait_until(|| h.remote.subscriber_count(&alice()) == 1).await;

    // add Task("Buy milk", "Get 2% milk", 2024-02-26)
    let due = tasklite_core::parse_due_date("2024-02-26").expect("valid date");
    let task = h
        .store
        .add(NewTask::new("Buy milk", "Get 2% milk").with_due_date(due))
        .expect("valid");
    wait_until(|| h.remote.record(&alice(), task.id).is_some()).await;
    assert_eq!(h.store.by_date(due).len(), 1);

    // Concurrent remote writer: revision 2, category changed to Shopping.
    // The local task never touched its category stamp, so the remote
    // category survives the merge while the local status edit wins its
    // own group.
    let base = h.remote.record(&alice(), task.id).expect("synced");
    let mut remote_fields = base.fields.clone();
    remote_fields.category = Category::Shopping;
    h.remote.set_record(
        &alice(),
        task.id,
        RemoteRecord {
            fields: remote_fields,
            revision: 2,
        },
    );

    // Local status edit: the push of revision 1 now conflicts.
    h.store
        .update(
            task.id,
            TaskPatch {
                status: Some(TaskStatus::InProgress),
                ..TaskPatch::default()
            },
        )
        .expect("exists");

    wait_until(|| h.store.get(task.id).is_some_and(|t| t.revision == 3)).await;
    wait_until(|| !h.store.get(task.id).expect("lives").pending_sync).await;

    let merged = h.store.get(task.id).expect("lives");
    assert_eq!(merged.status, TaskStatus::InProgress, "local group replayed");
    assert_eq!(merged.category, Category::Shopping, "remote group kept");
    assert_eq!(merged.due_date, Some(due));

    let record = h.remote.record(&alice(), task.id).expect("re-pushed");
    assert_eq!(record.revision, 3);
    assert_eq!(record.fields.status, TaskStatus::InProgress);
    assert_eq!(record.fields.category, Category::Shopping);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn retries_exhaust_into_failed_status_and_recover() {
    let h = spawn_harness(Some(alice()));
    wait_until(|| h.remote.subscriber_count(&alice()) == 1).await;

    // Initial try plus five backoff retries, all failing.
    h.remote.fail_next_pushes(6);
    let task = h.store.add(NewTask::new("title", "body")).expect("valid");

    let status = h.handle.status();
    wait_until(|| status.borrow().is_failed()).await;

    assert_eq!(h.remote.push_calls(), 6);
    assert!(h.remote.record(&alice(), task.id).is_none());
    // The local edit is retained and still marked pending.
    assert!(h.store.get(task.id).expect("retained").pending_sync);

    // The next successful push clears the failure.
    h.store
        .update(
            task.id,
            TaskPatch {
                status: Some(TaskStatus::Completed),
                ..TaskPatch::default()
            },
        )
        .expect("exists");
    wait_until(|| h.remote.record(&alice(), task.id).is_some()).await;
    wait_until(|| *status.borrow() == SyncStatus::Idle).await;
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn snapshot_pull_populates_prunes_and_stays_idempotent() {
    let h = spawn_harness(Some(alice()));
    wait_until(|| h.remote.subscriber_count(&alice()) == 1).await;

    let a = TaskId::new();
    let b = TaskId::new();
    let record = |title: &str| {
        let now = time::OffsetDateTime::now_utc();
        RemoteRecord {
            fields: TaskFields {
                title: title.into(),
                description: "body".into(),
                due_date: None,
                status: TaskStatus::Pending,
                category: Category::Work,
                created_at: now,
                stamps: tasklite_core::FieldStamps::at(now),
            },
            revision: 1,
        }
    };

    let rec_a = record("a");
    let rec_b = record("b");
    h.remote
        .emit(
            &alice(),
            RemoteEvent::Snapshot(vec![(a, rec_a.clone()), (b, rec_b.clone())]),
        )
        .await;
    wait_until(|| h.store.len() == 2).await;
    assert!(!h.store.get(a).expect("pulled").pending_sync);

    // A later snapshot without `b` means it was deleted remotely.
    h.remote
        .emit(&alice(), RemoteEvent::Snapshot(vec![(a, rec_a.clone())]))
        .await;
    wait_until(|| h.store.len() == 1).await;
    assert!(h.store.get(b).is_none());

    // Re-applying the same snapshot changes nothing.
    let revision_before = h.store.get(a).expect("lives").revision;
    h.remote
        .emit(&alice(), RemoteEvent::Snapshot(vec![(a, rec_a)]))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.store.get(a).expect("lives").revision, revision_before);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stale_snapshot_cannot_resurrect_a_deleted_task() {
    let h = spawn_harness(Some(alice()));
    wait_until(|| h.remote.subscriber_count(&alice()) == 1).await;

    let task = h.store.add(NewTask::new("title", "body")).expect("valid");
    wait_until(|| h.remote.record(&alice(), task.id).is_some()).await;
    let stale = h.remote.record(&alice(), task.id).expect("synced");

    h.store.delete(task.id).expect("exists");
    wait_until(|| h.remote.record(&alice(), task.id).is_none()).await;

    // A stale snapshot still carrying the record arrives afterwards.
    h.remote
        .emit(&alice(), RemoteEvent::Snapshot(vec![(task.id, stale)]))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.store.get(task.id).is_none(), "tombstone must block resurrection");
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn identity_change_clears_store_and_rescopes_subscription() {
    let bob = UserId::from("bob");
    let h = spawn_harness(Some(alice()));
    wait_until(|| h.remote.subscriber_count(&alice()) == 1).await;

    let task = h.store.add(NewTask::new("alice task", "body")).expect("valid");
    wait_until(|| h.remote.record(&alice(), task.id).is_some()).await;

    h.auth.set(Some(bob.clone()));
    wait_until(|| h.store.is_empty()).await;
    wait_until(|| h.remote.subscriber_count(&bob) == 1).await;

    // Alice's remote data is untouched by the switch.
    assert_eq!(h.remote.record_count(&alice()), 1);

    // New edits flow to the new identity.
    let bob_task = h.store.add(NewTask::new("bob task", "body")).expect("valid");
    wait_until(|| h.remote.record(&bob, bob_task.id).is_some()).await;
    assert_eq!(h.remote.record_count(&alice()), 1);
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn logout_discards_pending_edits_without_pushing() {
    let h = spawn_harness(Some(alice()));
    wait_until(|| h.remote.subscriber_count(&alice()) == 1).await;

    // Keep the push failing so the edit is still pending at logout.
    h.remote.fail_next_pushes(100);
    let task = h.store.add(NewTask::new("doomed", "body")).expect("valid");

    h.auth.set(None);
    wait_until(|| h.store.is_empty()).await;

    let status = h.handle.status();
    wait_until(|| *status.borrow() == SyncStatus::Idle).await;
    assert!(h.remote.record(&alice(), task.id).is_none());
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn closed_subscription_is_reopened_and_pushes_resume() {
    let h = spawn_harness(Some(alice()));
    wait_until(|| h.remote.subscriber_count(&alice()) == 1).await;

    // The remote tears the stream down; the first reconnect attempt
    // also fails, so the engine has to back off and try again.
    h.remote.fail_next_subscribes(1);
    h.remote.drop_subscribers(&alice());
    wait_until(|| h.remote.subscriber_count(&alice()) == 1).await;

    // Pushes keep flowing on the reopened session.
    let task = h.store.add(NewTask::new("title", "body")).expect("valid");
    wait_until(|| h.remote.record(&alice(), task.id).is_some()).await;
    h.handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn remote_upsert_event_lands_in_queries() {
    let h = spawn_harness(Some(alice()));
    wait_until(|| h.remote.subscriber_count(&alice()) == 1).await;

    let due = tasklite_core::parse_due_date("2024-06-01").expect("valid date");
    let id = TaskId::new();
    let now = time::OffsetDateTime::now_utc();
    let fields = TaskFields {
        title: "remote".into(),
        description: "body".into(),
        due_date: Some(due),
        status: TaskStatus::Pending,
        category: Category::Personal,
        created_at: now,
        stamps: tasklite_core::FieldStamps::at(now),
    };
    h.remote
        .emit(
            &alice(),
            RemoteEvent::Upserted(id, RemoteRecord { fields, revision: 4 }),
        )
        .await;

    wait_until(|| h.store.len() == 1).await;
    assert_eq!(h.store.by_date(due).len(), 1);

    h.remote.emit(&alice(), RemoteEvent::Removed(id)).await;
    wait_until(|| h.store.is_empty()).await;
    h.handle.shutdown().await;
}
