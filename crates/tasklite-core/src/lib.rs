//! Domain types for the tasklite task-management core.
//!
//! This crate carries the canonical task entity, its validation rules,
//! mutation patches, and the pure field-group last-writer-wins merge
//! used by the sync layer. It has no I/O and no locking; the store and
//! sync crates build on top of it.

/// Validation error taxonomy.
pub mod error;
/// Identifier types.
pub mod id;
/// Field-group last-writer-wins merge.
pub mod merge;
/// Partial update payloads.
pub mod patch;
/// Task entity, enums, and validation.
pub mod task;

pub use error::ValidationError;
pub use id::{TaskId, UserId};
pub use merge::merge_fields;
pub use patch::{DuePatch, TaskPatch};
pub use task::{
    Category, FieldStamps, NewTask, Task, TaskFields, TaskStatus, parse_due_date, validate_text,
};
