//! Remote store seam.
//!
//! The remote is an opaque collaborator reached over the network; this
//! module only fixes the contract the engine relies on: optimistic
//! revision checks on push, point fetches for conflict resolution, and
//! a per-identity subscription delivering snapshots and diffs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tasklite_core::{TaskFields, TaskId, UserId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Canonical remote state of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Wire-visible task fields.
    pub fields: TaskFields,
    /// Canonical revision held by the remote.
    pub revision: u64,
}

/// Change notification delivered through a [`RemoteSubscription`].
#[derive(Debug, Clone)]
pub enum RemoteEvent {
    /// Full state of the subscribed user's task set.
    Snapshot(Vec<(TaskId, RemoteRecord)>),
    /// One record was created or updated.
    Upserted(TaskId, RemoteRecord),
    /// One record was removed.
    Removed(TaskId),
}

/// Failures returned by the remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The pushed revision lost an optimistic-concurrency race.
    #[error("revision conflict: remote holds revision {current}")]
    Conflict {
        /// Revision currently stored by the remote.
        current: u64,
    },

    /// Network or remote-side failure; transient, retried with backoff.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Handle owning a live remote subscription.
///
/// The subscription is a cancellable event stream, not a fire-and-forget
/// registration: dropping or [`close`](Self::close)-ing the handle tears
/// it down.
#[derive(Debug)]
pub struct RemoteSubscription {
    events: mpsc::Receiver<RemoteEvent>,
}

impl RemoteSubscription {
    /// Wrap the receiving half handed out by a [`RemoteStore`].
    #[must_use]
    pub const fn new(events: mpsc::Receiver<RemoteEvent>) -> Self {
        Self { events }
    }

    /// Next remote event, or `None` once the remote side closed.
    pub async fn recv(&mut self) -> Option<RemoteEvent> {
        self.events.recv().await
    }

    /// Explicitly unsubscribe.
    pub fn close(mut self) {
        self.events.close();
    }
}

/// Remote source of truth, consumed by the sync engine.
///
/// Push semantics: the remote accepts `(fields, revision)` iff its
/// stored revision for the id is strictly less than the sent revision
/// (or the record is absent), adopts the sent revision as canonical,
/// and returns it. Otherwise it rejects with [`RemoteError::Conflict`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Push one record.
    ///
    /// # Errors
    /// [`RemoteError::Conflict`] when the revision check fails,
    /// [`RemoteError::Transport`] on network failure.
    async fn push(
        &self,
        user: &UserId,
        id: TaskId,
        fields: &TaskFields,
        revision: u64,
    ) -> Result<u64, RemoteError>;

    /// Delete one record, subject to the same revision check.
    ///
    /// # Errors
    /// [`RemoteError::Conflict`] when the stored revision is not older
    /// than `revision`, [`RemoteError::Transport`] on network failure.
    async fn remove(&self, user: &UserId, id: TaskId, revision: u64) -> Result<(), RemoteError>;

    /// Fetch the canonical record for conflict resolution.
    ///
    /// # Errors
    /// [`RemoteError::Transport`] on network failure.
    async fn fetch(&self, user: &UserId, id: TaskId) -> Result<Option<RemoteRecord>, RemoteError>;

    /// Open a long-lived subscription scoped to `user`. The remote is
    /// expected to deliver an initial snapshot.
    ///
    /// # Errors
    /// [`RemoteError::Transport`] when the subscription cannot be opened.
    async fn subscribe(&self, user: &UserId) -> Result<RemoteSubscription, RemoteError>;
}
