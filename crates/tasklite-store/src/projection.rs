//! Read-only groupings over store snapshots for calendar- and
//! notification-style consumers.
//!
//! These are pure functions: no mutation, no caching beyond the
//! snapshot passed in, recomputed on every call. Task counts are small
//! enough that memoization is not worth carrying.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use tasklite_core::Task;
use time::Date;

use crate::store::LocalTaskStore;

/// Group tasks by due date over an inclusive date range.
///
/// Dates with no tasks are absent from the mapping, not zero-valued
/// entries. Undated tasks and tasks outside the range are skipped.
/// Per-date order follows the snapshot order.
#[must_use]
pub fn group_by_date(tasks: &[Task], range: RangeInclusive<Date>) -> BTreeMap<Date, Vec<Task>> {
    let mut grouped: BTreeMap<Date, Vec<Task>> = BTreeMap::new();
    for task in tasks {
        if let Some(due) = task.due_date
            && range.contains(&due)
        {
            grouped.entry(due).or_default().push(task.clone());
        }
    }
    grouped
}

/// Last `n` tasks by creation time, most recent last. Delegates to
/// [`LocalTaskStore::recent`].
#[must_use]
pub fn recent_n(store: &LocalTaskStore, n: usize) -> Vec<Task> {
    store.recent(n)
}
