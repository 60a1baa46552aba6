//! Sync engine for the tasklite core.
//!
//! Reconciles the local task store with a remote source of truth using
//! optimistic concurrency: local mutations are queued and pushed with
//! their revision, conflicts are resolved by a field-group
//! last-writer-wins merge, and remote changes are pulled in through a
//! per-identity subscription. The auth session gate and the remote
//! store are injected traits so the engine runs against fakes in tests.

/// Auth session gate seam.
pub mod auth;
/// Exponential backoff schedule.
pub mod backoff;
/// TOML-loadable configuration.
pub mod config;
/// The engine worker and its handle.
pub mod engine;
/// Remote store seam.
pub mod remote;
/// Observable sync health.
pub mod status;

pub use auth::AuthSessionGate;
pub use backoff::Backoff;
pub use config::{BackoffConfig, SyncConfig};
pub use engine::{SyncEngine, SyncHandle};
pub use remote::{RemoteError, RemoteEvent, RemoteRecord, RemoteStore, RemoteSubscription};
pub use status::SyncStatus;
