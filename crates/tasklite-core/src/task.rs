use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::error::ValidationError;
use crate::id::TaskId;

/// Workflow status of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task has not been started.
    #[default]
    Pending,
    /// Task is actively being worked on.
    InProgress,
    /// Task is finished. Completion does not clear the due date.
    Completed,
}

impl TaskStatus {
    /// String representation used in configuration and display.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// Category bucket a task belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Work-related task.
    Work,
    /// Personal errand.
    #[default]
    Personal,
    /// Shopping list entry.
    Shopping,
    /// Anything else.
    Other,
}

impl Category {
    /// String representation used in configuration and display.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Personal => "personal",
            Self::Shopping => "shopping",
            Self::Other => "other",
        }
    }
}

/// Wall-clock mutation timestamp per field group.
///
/// Conflict resolution compares these stamps group by group, so
/// concurrent edits to disjoint groups both survive a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldStamps {
    /// Title + description (one group: they are edited together).
    #[serde(with = "time::serde::rfc3339")]
    pub text: OffsetDateTime,
    /// Due date.
    #[serde(with = "time::serde::rfc3339")]
    pub due: OffsetDateTime,
    /// Workflow status.
    #[serde(with = "time::serde::rfc3339")]
    pub status: OffsetDateTime,
    /// Category.
    #[serde(with = "time::serde::rfc3339")]
    pub category: OffsetDateTime,
}

impl FieldStamps {
    /// Stamps with every group set to `ts`.
    #[must_use]
    pub const fn at(ts: OffsetDateTime) -> Self {
        Self {
            text: ts,
            due: ts,
            status: ts,
            category: ts,
        }
    }
}

impl Default for FieldStamps {
    fn default() -> Self {
        Self::at(OffsetDateTime::UNIX_EPOCH)
    }
}

/// Wire-visible projection of a task: everything the remote store
/// persists except the id and the revision counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFields {
    /// Human-readable title.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Optional deadline (calendar date, no time component).
    pub due_date: Option<Date>,
    /// Workflow status.
    pub status: TaskStatus,
    /// Category bucket.
    pub category: Category,
    /// Creation timestamp, set once.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Per-group mutation stamps.
    pub stamps: FieldStamps,
}

/// One unit of work owned by the local task store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Unique identifier, assigned on creation and never reassigned.
    pub id: TaskId,
    /// Human-readable title, non-empty after trimming.
    pub title: String,
    /// Free-form description, non-empty after trimming.
    pub description: String,
    /// Optional deadline; `None` means no deadline.
    pub due_date: Option<Date>,
    /// Workflow status.
    pub status: TaskStatus,
    /// Category bucket.
    pub category: Category,
    /// Creation timestamp, immutable after creation.
    pub created_at: OffsetDateTime,
    /// Monotonically increasing revision, bumped on every accepted mutation.
    pub revision: u64,
    /// Per-group mutation stamps used for conflict resolution.
    pub stamps: FieldStamps,
    /// True while a local edit has not been acknowledged by the remote.
    pub pending_sync: bool,
}

impl Task {
    /// Wire projection of this task.
    #[must_use]
    pub fn fields(&self) -> TaskFields {
        TaskFields {
            title: self.title.clone(),
            description: self.description.clone(),
            due_date: self.due_date,
            status: self.status,
            category: self.category,
            created_at: self.created_at,
            stamps: self.stamps,
        }
    }

    /// Rebuild a task from remote state. Remote-sourced tasks are in
    /// sync by definition.
    #[must_use]
    pub fn from_remote(id: TaskId, fields: TaskFields, revision: u64) -> Self {
        Self {
            id,
            title: fields.title,
            description: fields.description,
            due_date: fields.due_date,
            status: fields.status,
            category: fields.category,
            created_at: fields.created_at,
            revision,
            stamps: fields.stamps,
            pending_sync: false,
        }
    }

    /// Overwrite the wire-visible fields in place, keeping id and revision.
    pub fn set_fields(&mut self, fields: TaskFields) {
        self.title = fields.title;
        self.description = fields.description;
        self.due_date = fields.due_date;
        self.status = fields.status;
        self.category = fields.category;
        self.created_at = fields.created_at;
        self.stamps = fields.stamps;
    }
}

/// Payload used when creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Human-readable title.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Optional deadline.
    pub due_date: Option<Date>,
    /// Initial status; defaults to [`TaskStatus::Pending`].
    pub status: TaskStatus,
    /// Initial category; defaults to [`Category::Personal`].
    pub category: Category,
}

impl NewTask {
    /// Request with default status and category.
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            due_date: None,
            status: TaskStatus::default(),
            category: Category::default(),
        }
    }

    /// Set the deadline.
    #[must_use]
    pub const fn with_due_date(mut self, due: Date) -> Self {
        self.due_date = Some(due);
        self
    }

    /// Set the initial status.
    #[must_use]
    pub const fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the initial category.
    #[must_use]
    pub const fn with_category(mut self, category: Category) -> Self {
        self.category = category;
        self
    }

    /// Check the request against the entity validation rules.
    ///
    /// Values are stored verbatim; trimming happens only for the
    /// emptiness check.
    ///
    /// # Errors
    /// Returns [`ValidationError`] when title or description is empty
    /// after trimming.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_text(&self.title, &self.description)
    }
}

/// Validate a title/description pair.
///
/// # Errors
/// Returns [`ValidationError::EmptyTitle`] or
/// [`ValidationError::EmptyDescription`] when the trimmed value is empty.
pub fn validate_text(title: &str, description: &str) -> Result<(), ValidationError> {
    if title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if description.trim().is_empty() {
        return Err(ValidationError::EmptyDescription);
    }
    Ok(())
}

/// Parse a `YYYY-MM-DD` due date.
///
/// # Errors
/// Returns [`ValidationError::InvalidDueDate`] for malformed input or
/// impossible calendar dates.
pub fn parse_due_date(input: &str) -> Result<Date, ValidationError> {
    let format = format_description!("[year]-[month]-[day]");
    Date::parse(input, &format).map_err(|_| ValidationError::InvalidDueDate(input.to_owned()))
}
