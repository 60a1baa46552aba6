//! Authoritative in-process task collection for the active user.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tasklite_core::{
    DuePatch, FieldStamps, NewTask, Task, TaskFields, TaskId, TaskPatch, ValidationError,
};
use thiserror::Error;
use time::{Date, OffsetDateTime};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::event::{ChangeEvent, ChangeOrigin, TaskChange};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Errors surfaced by [`LocalTaskStore`] mutations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Input failed entity validation; nothing was inserted or changed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The referenced task does not exist (or was already deleted).
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The task changed after the caller read it; the prepared write is
    /// stale and was not applied.
    #[error("task {0} was modified concurrently")]
    Superseded(TaskId),
}

/// Store tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// How long a delete tombstone suppresses resurrection from stale
    /// remote snapshots.
    pub tombstone_retention: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tombstone_retention: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    deleted_at: OffsetDateTime,
    revision: u64,
}

#[derive(Default)]
struct StoreState {
    /// Tasks in insertion order.
    tasks: Vec<Task>,
    /// Id to position in [`tasks`](Self::tasks).
    index: HashMap<TaskId, usize>,
    tombstones: HashMap<TaskId, Tombstone>,
}

impl StoreState {
    fn insert(&mut self, task: Task) {
        self.index.insert(task.id, self.tasks.len());
        self.tasks.push(task);
    }

    fn remove(&mut self, id: TaskId) -> Option<Task> {
        let pos = self.index.remove(&id)?;
        let task = self.tasks.remove(pos);
        for slot in self.index.values_mut() {
            if *slot > pos {
                *slot -= 1;
            }
        }
        Some(task)
    }
}

/// In-process task store with atomic mutations and broadcast change
/// events.
///
/// A single lock guards the collection: at most one mutation commits at
/// a time and readers never observe a partially applied one. The sync
/// engine mutates exclusively through the `apply_*`/`acknowledge_push`
/// entry points, which take the same lock as local edits.
pub struct LocalTaskStore {
    state: RwLock<StoreState>,
    events: broadcast::Sender<ChangeEvent>,
    retention: Duration,
}

impl Default for LocalTaskStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

// Mutations emit while holding the write lock, so the guard outlives
// its last direct use on purpose.
#[allow(clippy::significant_drop_tightening)]
impl LocalTaskStore {
    /// Create an empty store.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            events,
            retention: config.tombstone_retention,
        }
    }

    /// Subscribe to change events. Dropping the receiver stops delivery
    /// immediately; multiple subscribers are allowed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Broadcast a committed change.
    ///
    /// Mutations call this while still holding the write lock so the
    /// event order always matches the commit order; the send never
    /// blocks and fails only when nobody is subscribed.
    fn emit(&self, origin: ChangeOrigin, change: TaskChange) {
        let _ = self.events.send(ChangeEvent { origin, change });
    }

    /// Create a task from the request.
    ///
    /// Assigns a fresh id, `created_at = now`, `revision = 0`, and
    /// marks the task pending sync. Emits an `Added` event.
    ///
    /// # Errors
    /// Returns [`StoreError::Validation`] when title or description is
    /// empty after trimming; nothing is inserted in that case.
    pub fn add(&self, request: NewTask) -> Result<Task, StoreError> {
        request.validate()?;

        let now = OffsetDateTime::now_utc();
        let task = Task {
            id: TaskId::new(),
            title: request.title,
            description: request.description,
            due_date: request.due_date,
            status: request.status,
            category: request.category,
            created_at: now,
            revision: 0,
            stamps: FieldStamps::at(now),
            pending_sync: true,
        };

        let mut state = self.state.write();
        state.insert(task.clone());

        debug!(id = %task.id, "task added");
        self.emit(ChangeOrigin::Local, TaskChange::Added(task.clone()));
        drop(state);
        Ok(task)
    }

    /// Merge the supplied fields into an existing task.
    ///
    /// Bumps the revision by exactly one, stamps the touched field
    /// groups with the current wall-clock time, and emits an `Updated`
    /// event.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when the id is absent and
    /// [`StoreError::Validation`] for invalid field values; the task is
    /// untouched on failure.
    pub fn update(&self, id: TaskId, patch: TaskPatch) -> Result<Task, StoreError> {
        patch.validate()?;

        let mut state = self.state.write();
        let pos = *state.index.get(&id).ok_or(StoreError::NotFound(id))?;
        let now = OffsetDateTime::now_utc();
        let task = &mut state.tasks[pos];

        if patch.touches_text() {
            task.stamps.text = now;
        }
        if let Some(title) = patch.title {
            task.title = title;
        }
        if let Some(description) = patch.description {
            task.description = description;
        }
        if let Some(due) = patch.due_date {
            task.due_date = match due {
                DuePatch::Set(date) => Some(date),
                DuePatch::Clear => None,
            };
            task.stamps.due = now;
        }
        if let Some(status) = patch.status {
            task.status = status;
            task.stamps.status = now;
        }
        if let Some(category) = patch.category {
            task.category = category;
            task.stamps.category = now;
        }
        task.revision += 1;
        task.pending_sync = true;

        let updated = task.clone();

        debug!(id = %updated.id, revision = updated.revision, "task updated");
        self.emit(ChangeOrigin::Local, TaskChange::Updated(updated.clone()));
        drop(state);
        Ok(updated)
    }

    /// Delete a task.
    ///
    /// The task disappears from every query surface immediately; a
    /// tombstone suppresses resurrection from stale remote snapshots
    /// for the retention window. Returns the revision tagged on the
    /// tombstone, which the delete push carries.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when the id is absent.
    pub fn delete(&self, id: TaskId) -> Result<u64, StoreError> {
        let mut state = self.state.write();
        let task = state.remove(id).ok_or(StoreError::NotFound(id))?;
        let revision = task.revision + 1;
        state.tombstones.insert(
            id,
            Tombstone {
                deleted_at: OffsetDateTime::now_utc(),
                revision,
            },
        );
        debug!(id = %id, revision, "task deleted");
        self.emit(ChangeOrigin::Local, TaskChange::Deleted { id, revision });
        drop(state);
        Ok(revision)
    }

    /// Look up a single task.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<Task> {
        let state = self.state.read();
        state.index.get(&id).map(|&pos| state.tasks[pos].clone())
    }

    /// All tasks in insertion order.
    #[must_use]
    pub fn list(&self) -> Vec<Task> {
        self.state.read().tasks.clone()
    }

    /// Consistent snapshot for projections. Alias of [`list`](Self::list).
    #[must_use]
    pub fn snapshot(&self) -> Vec<Task> {
        self.list()
    }

    /// Tasks whose due date equals `date`.
    #[must_use]
    pub fn by_date(&self, date: Date) -> Vec<Task> {
        self.state
            .read()
            .tasks
            .iter()
            .filter(|task| task.due_date == Some(date))
            .cloned()
            .collect()
    }

    /// Last `n` tasks by creation time, most recent last.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<Task> {
        let mut tasks = self.list();
        tasks.sort_by_key(|task| task.created_at);
        let skip = tasks.len().saturating_sub(n);
        tasks.split_off(skip)
    }

    /// Number of live tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().tasks.len()
    }

    /// True when no live tasks exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard the entire per-user task set, tombstones included.
    ///
    /// Session teardown, not a data mutation: no events are emitted.
    pub fn clear(&self) {
        let mut state = self.state.write();
        *state = StoreState::default();
        drop(state);
        debug!("store cleared");
    }

    /// True when the id is currently tombstoned.
    #[must_use]
    pub fn is_tombstoned(&self, id: TaskId) -> bool {
        self.state.read().tombstones.contains_key(&id)
    }

    /// Drop tombstones whose retention window elapsed before `now`.
    pub fn purge_tombstones(&self, now: OffsetDateTime) {
        let mut state = self.state.write();
        state
            .tombstones
            .retain(|_, stone| stone.deleted_at + self.retention > now);
    }

    /// Upsert remote state from a pull.
    ///
    /// Skipped (returning `false`) when the id is tombstoned at a
    /// revision not older than the incoming one, when a local edit is
    /// pending for it, or when the remote revision is not strictly
    /// greater than the local one. Re-applying the same snapshot is
    /// therefore observable as a no-op: no event, no revision churn.
    /// A record whose revision exceeds the tombstone's means the remote
    /// advanced past the local delete; the delete lost the race and the
    /// record is re-adopted.
    pub fn apply_remote(&self, id: TaskId, fields: &TaskFields, revision: u64) -> bool {
        let mut state = self.state.write();
        if let Some(stone) = state.tombstones.get(&id) {
            if revision <= stone.revision {
                trace!(id = %id, "remote upsert suppressed by tombstone");
                return false;
            }
            state.tombstones.remove(&id);
        }
        let change = if let Some(&pos) = state.index.get(&id) {
            let task = &mut state.tasks[pos];
            if task.pending_sync {
                trace!(id = %id, "remote upsert deferred to pending push");
                return false;
            }
            if revision <= task.revision {
                return false;
            }
            task.set_fields(fields.clone());
            task.revision = revision;
            task.pending_sync = false;
            TaskChange::Updated(task.clone())
        } else {
            let task = Task::from_remote(id, fields.clone(), revision);
            state.insert(task.clone());
            TaskChange::Added(task)
        };

        self.emit(ChangeOrigin::Remote, change);
        drop(state);
        true
    }

    /// Remove a task on behalf of the remote.
    ///
    /// Skipped when a local edit is pending for it (remote wins only
    /// when there is no pending local edit). No tombstone is recorded:
    /// the remote already forgot the record.
    pub fn apply_remote_delete(&self, id: TaskId) -> bool {
        let mut state = self.state.write();
        let Some(&pos) = state.index.get(&id) else {
            return false;
        };
        if state.tasks[pos].pending_sync {
            trace!(id = %id, "remote delete deferred to pending push");
            return false;
        }
        let Some(task) = state.remove(id) else {
            return false;
        };

        self.emit(
            ChangeOrigin::Remote,
            TaskChange::Deleted {
                id,
                revision: task.revision,
            },
        );
        drop(state);
        true
    }

    /// Write a conflict-merge result back.
    ///
    /// `local_revision` is the task revision the merge was computed
    /// from; the write-back commits only when the task still carries
    /// it, so a local edit racing the merge is never erased. The merged
    /// fields are committed with `remote_revision + 1`, the revision
    /// the re-push will carry; the task stays pending until that push
    /// is acknowledged.
    ///
    /// # Errors
    /// Returns [`StoreError::NotFound`] when the task disappeared while
    /// the conflict was being resolved, and [`StoreError::Superseded`]
    /// when a local edit committed after the merge input was read.
    pub fn apply_merge(
        &self,
        id: TaskId,
        fields: TaskFields,
        remote_revision: u64,
        local_revision: u64,
    ) -> Result<Task, StoreError> {
        let mut state = self.state.write();
        let pos = *state.index.get(&id).ok_or(StoreError::NotFound(id))?;
        let task = &mut state.tasks[pos];
        if task.revision != local_revision {
            return Err(StoreError::Superseded(id));
        }
        task.set_fields(fields);
        task.revision = remote_revision + 1;
        task.pending_sync = true;
        let merged = task.clone();

        debug!(id = %id, revision = merged.revision, "conflict merge applied");
        self.emit(ChangeOrigin::Remote, TaskChange::Updated(merged.clone()));
        drop(state);
        Ok(merged)
    }

    /// Record a successful push acknowledgement.
    ///
    /// Clears the pending flag only when no newer local edit raced the
    /// push; otherwise the newer edit's own push will clear it.
    pub fn acknowledge_push(&self, id: TaskId, pushed_revision: u64, new_revision: u64) {
        let mut state = self.state.write();
        if let Some(&pos) = state.index.get(&id) {
            let task = &mut state.tasks[pos];
            if task.revision == pushed_revision {
                task.revision = new_revision;
                task.pending_sync = false;
            }
        }
    }
}
