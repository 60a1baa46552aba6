//! Pure field-group last-writer-wins merge.
//!
//! Conflict resolution compares the wall-clock mutation stamp of each
//! field group independently: the locally edited value is replayed only
//! when its stamp is strictly newer than the remote's, so concurrent
//! edits to disjoint groups both survive. Ties go to the remote, which
//! keeps the merge deterministic and idempotent.

use crate::task::TaskFields;

/// Merge locally edited fields over the canonical remote fields.
///
/// The remote is the base; each group is overwritten by the local value
/// only when the local group stamp is strictly newer. `created_at` is
/// immutable and always taken from the remote.
#[must_use]
pub fn merge_fields(local: &TaskFields, remote: &TaskFields) -> TaskFields {
    let mut merged = remote.clone();

    if local.stamps.text > remote.stamps.text {
        merged.title = local.title.clone();
        merged.description = local.description.clone();
        merged.stamps.text = local.stamps.text;
    }
    if local.stamps.due > remote.stamps.due {
        merged.due_date = local.due_date;
        merged.stamps.due = local.stamps.due;
    }
    if local.stamps.status > remote.stamps.status {
        merged.status = local.status;
        merged.stamps.status = local.stamps.status;
    }
    if local.stamps.category > remote.stamps.category {
        merged.category = local.category;
        merged.stamps.category = local.stamps.category;
    }

    merged
}
