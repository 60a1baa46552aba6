//! Auth session gate seam.
//!
//! Credential checking lives outside the core; the engine only consumes
//! the current identity and a change stream, injected at construction
//! so tests substitute a fake.

use tasklite_core::UserId;
use tokio::sync::watch;

/// Supplies the current user identity and identity-change events.
///
/// Implementations must deliver at most one event per actual change;
/// the watch channel naturally coalesces duplicates of the same value
/// written back-to-back as long as senders use `send_if_modified`.
pub trait AuthSessionGate: Send + Sync {
    /// Identity of the signed-in user, if any.
    fn current_identity(&self) -> Option<UserId>;

    /// Lazy, restartable stream of identity changes. The receiver's
    /// current value is the identity at subscription time.
    fn watch_identity(&self) -> watch::Receiver<Option<UserId>>;
}
