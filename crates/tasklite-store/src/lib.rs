//! Local task store: authoritative in-process cache of the active
//! user's tasks, with CRUD, date/recency queries, tombstoned deletes,
//! broadcast change events, and read-only view projections.

/// Change-event payloads.
pub mod event;
/// Query/view projections.
pub mod projection;
/// The store itself.
pub mod store;

pub use event::{ChangeEvent, ChangeOrigin, TaskChange};
pub use projection::{group_by_date, recent_n};
pub use store::{LocalTaskStore, StoreConfig, StoreError};
