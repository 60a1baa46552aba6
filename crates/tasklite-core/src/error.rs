use thiserror::Error;

/// Input validation failures. Never retried; the caller corrects the
/// input and resubmits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Title is empty after trimming.
    #[error("title must not be empty")]
    EmptyTitle,

    /// Description is empty after trimming.
    #[error("description must not be empty")]
    EmptyDescription,

    /// Due date string is not a valid calendar date.
    #[error("invalid due date: {0}")]
    InvalidDueDate(String),
}
