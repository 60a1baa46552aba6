use tasklite_core::{Task, TaskId};

/// Where a change came from.
///
/// The sync engine only pushes local-origin changes; remote-origin
/// changes are the result of a pull or a conflict merge and must not be
/// re-enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Mutation requested by a local consumer through the store API.
    Local,
    /// Mutation applied on behalf of the remote store.
    Remote,
}

/// The mutation that was committed.
#[derive(Debug, Clone)]
pub enum TaskChange {
    /// A new task was inserted.
    Added(Task),
    /// An existing task was modified.
    Updated(Task),
    /// A task was removed from every query surface.
    Deleted {
        /// Identifier of the removed task.
        id: TaskId,
        /// Revision tagged on the tombstone, used for the delete push.
        revision: u64,
    },
}

/// Change notification delivered to store subscribers.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    /// Origin of the mutation.
    pub origin: ChangeOrigin,
    /// The committed mutation.
    pub change: TaskChange,
}

impl ChangeEvent {
    /// Identifier of the task this event concerns.
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        match &self.change {
            TaskChange::Added(task) | TaskChange::Updated(task) => task.id,
            TaskChange::Deleted { id, .. } => *id,
        }
    }
}
