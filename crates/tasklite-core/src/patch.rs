use time::Date;

use crate::error::ValidationError;
use crate::task::{Category, TaskStatus};

/// Patch for the optional due date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuePatch {
    /// Set the deadline to the provided date.
    Set(Date),
    /// Clear the deadline entirely.
    Clear,
}

/// Partial update applied to an existing task.
///
/// `id` and `created_at` are not representable here, so they cannot be
/// mutated through the store API.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    /// Overwrite the title.
    pub title: Option<String>,
    /// Overwrite the description.
    pub description: Option<String>,
    /// Patch applied to the due date.
    pub due_date: Option<DuePatch>,
    /// Overwrite the workflow status.
    pub status: Option<TaskStatus>,
    /// Overwrite the category.
    pub category: Option<Category>,
}

impl TaskPatch {
    /// Returns true when the patch would not change anything.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.due_date.is_none()
            && self.status.is_none()
            && self.category.is_none()
    }

    /// True when the patch touches the title/description group.
    #[must_use]
    pub const fn touches_text(&self) -> bool {
        self.title.is_some() || self.description.is_some()
    }

    /// Validate the supplied fields without applying them.
    ///
    /// # Errors
    /// Returns [`ValidationError`] when a supplied title or description
    /// is empty after trimming.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(title) = &self.title
            && title.trim().is_empty()
        {
            return Err(ValidationError::EmptyTitle);
        }
        if let Some(description) = &self.description
            && description.trim().is_empty()
        {
            return Err(ValidationError::EmptyDescription);
        }
        Ok(())
    }
}
