use std::fmt;

/// Observable sync health, published over a watch channel by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SyncStatus {
    /// Nothing queued, last push succeeded.
    #[default]
    Idle,
    /// A push is in flight.
    Syncing,
    /// Pushes waiting in the queue.
    Pending(usize),
    /// The last mutation cycle exhausted its retries. The local edit is
    /// retained and marked pending; the status clears on the next
    /// successful push.
    Failed(String),
}

impl SyncStatus {
    /// True for the failed state.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Syncing => write!(f, "syncing"),
            Self::Pending(n) => write!(f, "pending ({n})"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
