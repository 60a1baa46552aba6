//! Sync engine: reconciles the local task store with the remote store.
//!
//! One worker task owns a FIFO push queue fed from local-origin store
//! events and a long-lived remote subscription scoped to the current
//! identity. Pull-driven updates and push acknowledgements go through
//! the store's mutation entry points, so they serialize with local
//! edits; the worker itself never holds a store lock across an await.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tasklite_core::{TaskFields, TaskId, UserId, merge_fields};
use tasklite_store::{ChangeEvent, ChangeOrigin, LocalTaskStore, StoreError, TaskChange};
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::auth::AuthSessionGate;
use crate::config::SyncConfig;
use crate::remote::{RemoteError, RemoteEvent, RemoteStore, RemoteSubscription};
use crate::status::SyncStatus;

/// Entry point for running the sync engine.
pub struct SyncEngine;

impl SyncEngine {
    /// Spawn the engine worker on the current tokio runtime.
    ///
    /// The engine subscribes to store change events at this point;
    /// mutations made before the call are not pushed.
    #[must_use]
    pub fn spawn(
        store: Arc<LocalTaskStore>,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthSessionGate>,
        config: SyncConfig,
    ) -> SyncHandle {
        let (status_tx, status_rx) = watch::channel(SyncStatus::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let store_events = store.subscribe();
        let identity = auth.watch_identity();
        let worker = Worker {
            store,
            remote,
            config,
            status: status_tx,
            queue: VecDeque::new(),
            failure: None,
        };
        let join = tokio::spawn(worker.run(identity, store_events, shutdown_rx));

        SyncHandle {
            status: status_rx,
            shutdown: shutdown_tx,
            join,
        }
    }
}

/// Handle to a running sync engine.
pub struct SyncHandle {
    status: watch::Receiver<SyncStatus>,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SyncHandle {
    /// Observe sync health.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// Stop the worker and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

/// A queued push, tagged with the revision at enqueue time.
#[derive(Debug, Clone)]
enum PushJob {
    Upsert {
        id: TaskId,
        fields: TaskFields,
        revision: u64,
    },
    Delete {
        id: TaskId,
        revision: u64,
    },
}

impl PushJob {
    const fn id(&self) -> TaskId {
        match self {
            Self::Upsert { id, .. } | Self::Delete { id, .. } => *id,
        }
    }
}

/// What woke the worker loop.
enum Wake {
    Shutdown,
    IdentityChanged,
    StoreEvent(ChangeEvent),
    StoreClosed,
    RemoteEvent(RemoteEvent),
    RemoteClosed,
    Drain,
}

/// Outcome of processing one push job under cancellation.
enum JobOutcome {
    Done(Result<(), String>),
    IdentityChanged,
    Shutdown,
}

enum AttemptError {
    /// Worth retrying after a backoff delay.
    Transient(String),
    /// The job no longer applies; drop it without failing the cycle.
    Abandon(&'static str),
}

struct Session {
    user: UserId,
    subscription: RemoteSubscription,
}

struct Worker {
    store: Arc<LocalTaskStore>,
    remote: Arc<dyn RemoteStore>,
    config: SyncConfig,
    status: watch::Sender<SyncStatus>,
    queue: VecDeque<PushJob>,
    failure: Option<String>,
}

impl Worker {
    async fn run(
        mut self,
        mut identity: watch::Receiver<Option<UserId>>,
        mut store_events: broadcast::Receiver<ChangeEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let initial = identity.borrow_and_update().clone();
        let mut session = match initial {
            Some(user) => self.open_session(user).await,
            None => None,
        };

        loop {
            self.publish_status();
            let can_drain = session.is_some() && !self.queue.is_empty();

            let wake = tokio::select! {
                biased;
                _ = shutdown.changed() => Wake::Shutdown,
                changed = identity.changed() => match changed {
                    Ok(()) => Wake::IdentityChanged,
                    Err(_) => Wake::Shutdown,
                },
                event = store_events.recv() => match event {
                    Ok(event) => Wake::StoreEvent(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "store event stream lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => Wake::StoreClosed,
                },
                event = Self::recv_remote(&mut session) => match event {
                    Some(event) => Wake::RemoteEvent(event),
                    None => Wake::RemoteClosed,
                },
                () = std::future::ready(()), if can_drain => Wake::Drain,
            };

            match wake {
                Wake::Shutdown | Wake::StoreClosed => break,
                Wake::IdentityChanged => {
                    let next = identity.borrow_and_update().clone();
                    session = self.switch_identity(session, next).await;
                    continue;
                }
                Wake::StoreEvent(event) => {
                    if session.is_some() {
                        self.enqueue_local(&event);
                    }
                    continue;
                }
                Wake::RemoteEvent(event) => {
                    self.apply_pull(event);
                    continue;
                }
                Wake::RemoteClosed => {
                    warn!("remote subscription ended");
                    if let Some(sess) = session.take() {
                        sess.subscription.close();
                    }
                    let Some(user) = identity.borrow().clone() else {
                        continue;
                    };
                    // Reconnect under the same cancellation discipline
                    // as an in-flight push.
                    let outcome = tokio::select! {
                        biased;
                        _ = shutdown.changed() => JobOutcome::Shutdown,
                        changed = identity.changed() => match changed {
                            Ok(()) => JobOutcome::IdentityChanged,
                            Err(_) => JobOutcome::Shutdown,
                        },
                        sess = self.reopen_session(user) => {
                            session = Some(sess);
                            JobOutcome::Done(Ok(()))
                        }
                    };
                    match outcome {
                        JobOutcome::Shutdown => break,
                        JobOutcome::IdentityChanged => {
                            let next = identity.borrow_and_update().clone();
                            session = self.switch_identity(session, next).await;
                        }
                        JobOutcome::Done(_) => {}
                    }
                    continue;
                }
                Wake::Drain => {}
            }

            // Drain one job; the push is cancelled cooperatively at its
            // next await point when the identity changes mid-flight.
            let Some(sess) = &session else { continue };
            let Some(job) = self.queue.pop_front() else {
                continue;
            };
            self.set_status(SyncStatus::Syncing);
            let user = sess.user.clone();

            let outcome = tokio::select! {
                biased;
                _ = shutdown.changed() => JobOutcome::Shutdown,
                changed = identity.changed() => match changed {
                    Ok(()) => JobOutcome::IdentityChanged,
                    Err(_) => JobOutcome::Shutdown,
                },
                result = self.process_job(&user, &job) => JobOutcome::Done(result),
            };

            match outcome {
                JobOutcome::Shutdown => break,
                JobOutcome::IdentityChanged => {
                    let next = identity.borrow_and_update().clone();
                    session = self.switch_identity(session, next).await;
                }
                JobOutcome::Done(Ok(())) => {
                    self.failure = None;
                }
                JobOutcome::Done(Err(reason)) => {
                    error!(id = %job.id(), %reason, "push cycle failed; local edit retained");
                    self.failure = Some(reason);
                }
            }
        }
    }

    async fn recv_remote(session: &mut Option<Session>) -> Option<RemoteEvent> {
        match session {
            Some(sess) => sess.subscription.recv().await,
            None => std::future::pending().await,
        }
    }

    fn publish_status(&self) {
        let next = self.failure.as_ref().map_or_else(
            || {
                if self.queue.is_empty() {
                    SyncStatus::Idle
                } else {
                    SyncStatus::Pending(self.queue.len())
                }
            },
            |reason| SyncStatus::Failed(reason.clone()),
        );
        self.set_status(next);
    }

    fn set_status(&self, next: SyncStatus) {
        self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    async fn open_session(&self, user: UserId) -> Option<Session> {
        match self.remote.subscribe(&user).await {
            Ok(subscription) => {
                debug!(%user, "remote subscription opened");
                Some(Session { user, subscription })
            }
            Err(err) => {
                error!(%user, %err, "failed to open remote subscription");
                None
            }
        }
    }

    /// Reconnect after the remote dropped the subscription, retrying on
    /// the backoff schedule (held at its cap past the budget) until the
    /// remote accepts. Cancelled by the caller's select on shutdown or
    /// identity change.
    async fn reopen_session(&self, user: UserId) -> Session {
        let backoff = self.config.backoff();
        let mut attempt = 0u32;
        loop {
            match self.remote.subscribe(&user).await {
                Ok(subscription) => {
                    debug!(%user, "remote subscription reopened");
                    return Session { user, subscription };
                }
                Err(err) => {
                    let delay = backoff.delay_or_cap(attempt);
                    warn!(%user, %err, attempt, ?delay, "failed to reopen remote subscription");
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Tear down the current session and start over for `next`.
    ///
    /// Queued and in-flight pushes are discarded and the store is
    /// emptied; pending changes do not survive a logout.
    async fn switch_identity(
        &mut self,
        session: Option<Session>,
        next: Option<UserId>,
    ) -> Option<Session> {
        if let Some(sess) = session {
            debug!(user = %sess.user, "closing remote subscription");
            sess.subscription.close();
        }
        self.queue.clear();
        self.failure = None;
        self.store.clear();

        match next {
            Some(user) => self.open_session(user).await,
            None => None,
        }
    }

    fn enqueue_local(&mut self, event: &ChangeEvent) {
        if event.origin != ChangeOrigin::Local {
            return;
        }
        let job = match &event.change {
            TaskChange::Added(task) | TaskChange::Updated(task) => PushJob::Upsert {
                id: task.id,
                fields: task.fields(),
                revision: task.revision,
            },
            TaskChange::Deleted { id, revision } => PushJob::Delete {
                id: *id,
                revision: *revision,
            },
        };
        self.queue.push_back(job);
    }

    fn apply_pull(&self, event: RemoteEvent) {
        self.store.purge_tombstones(OffsetDateTime::now_utc());
        match event {
            RemoteEvent::Upserted(id, record) => {
                self.store.apply_remote(id, &record.fields, record.revision);
            }
            RemoteEvent::Removed(id) => {
                self.store.apply_remote_delete(id);
            }
            RemoteEvent::Snapshot(records) => {
                let remote_ids: HashSet<TaskId> = records.iter().map(|(id, _)| *id).collect();
                for (id, record) in &records {
                    self.store.apply_remote(*id, &record.fields, record.revision);
                }
                // A synced task missing from the snapshot was deleted
                // remotely; pending local edits are left for the push path.
                for task in self.store.list() {
                    if !task.pending_sync && !remote_ids.contains(&task.id) {
                        self.store.apply_remote_delete(task.id);
                    }
                }
            }
        }
    }

    async fn process_job(&self, user: &UserId, job: &PushJob) -> Result<(), String> {
        let backoff = self.config.backoff();
        let mut attempt = 0u32;
        loop {
            match self.attempt_job(user, job).await {
                Ok(()) => return Ok(()),
                Err(AttemptError::Abandon(reason)) => {
                    debug!(id = %job.id(), reason, "push abandoned");
                    return Ok(());
                }
                Err(AttemptError::Transient(reason)) => match backoff.delay(attempt) {
                    Some(delay) => {
                        warn!(id = %job.id(), %reason, attempt, ?delay, "push failed; retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(reason),
                },
            }
        }
    }

    async fn attempt_job(&self, user: &UserId, job: &PushJob) -> Result<(), AttemptError> {
        match job {
            PushJob::Upsert {
                id,
                fields,
                revision,
            } => match self.remote.push(user, *id, fields, *revision).await {
                Ok(new_revision) => {
                    self.store.acknowledge_push(*id, *revision, new_revision);
                    Ok(())
                }
                Err(RemoteError::Conflict { current }) => {
                    debug!(id = %id, sent = revision, current, "push conflict; merging");
                    self.resolve_conflict(user, *id).await
                }
                Err(RemoteError::Transport(reason)) => Err(AttemptError::Transient(reason)),
            },
            PushJob::Delete { id, revision } => {
                match self.remote.remove(user, *id, *revision).await {
                    Ok(()) => Ok(()),
                    // The remote record advanced past our delete; abandon
                    // it and let the next pull re-adopt the record, whose
                    // revision now exceeds the tombstone's.
                    Err(RemoteError::Conflict { .. }) => {
                        Err(AttemptError::Abandon("delete lost the revision race"))
                    }
                    Err(RemoteError::Transport(reason)) => Err(AttemptError::Transient(reason)),
                }
            }
        }
    }

    /// Field-group last-writer-wins conflict resolution, one extra
    /// round trip in the common case: fetch the canonical record, merge
    /// against the current local task, write the merge back with the
    /// remote's revision, re-push once. A second conflict is treated as
    /// a transient error so the caller's backoff policy applies.
    async fn resolve_conflict(&self, user: &UserId, id: TaskId) -> Result<(), AttemptError> {
        let record = self
            .remote
            .fetch(user, id)
            .await
            .map_err(|err| AttemptError::Transient(err.to_string()))?;
        let Some(record) = record else {
            // Deleted remotely between the conflict and the fetch; the
            // retry pushes against an absent record and succeeds.
            return Err(AttemptError::Transient(
                "remote record vanished during conflict resolution".to_owned(),
            ));
        };

        let Some(local) = self.store.get(id) else {
            return Err(AttemptError::Abandon("task deleted locally mid-conflict"));
        };
        let merged = merge_fields(&local.fields(), &record.fields);
        let merged_task = match self.store.apply_merge(id, merged, record.revision, local.revision)
        {
            Ok(task) => task,
            // A newer local edit raced the merge; its own queued push
            // carries the fresh state, so this job has nothing to add.
            Err(StoreError::Superseded(_)) => {
                return Err(AttemptError::Abandon("merge superseded by a newer local edit"));
            }
            Err(_) => {
                return Err(AttemptError::Abandon("task deleted locally mid-conflict"));
            }
        };

        match self
            .remote
            .push(user, id, &merged_task.fields(), merged_task.revision)
            .await
        {
            Ok(new_revision) => {
                self.store
                    .acknowledge_push(id, merged_task.revision, new_revision);
                Ok(())
            }
            Err(RemoteError::Conflict { current }) => Err(AttemptError::Transient(format!(
                "conflict persisted after merge (remote revision {current})"
            ))),
            Err(RemoteError::Transport(reason)) => Err(AttemptError::Transient(reason)),
        }
    }
}
