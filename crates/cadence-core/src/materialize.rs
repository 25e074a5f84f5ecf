//! Projection of recurring masters into virtual occurrences.
//!
//! Nothing here touches the database: the query facade fetches the masters
//! and their assignees, and this module turns them into the window's virtual
//! instances. Virtual occurrences are never stored; they exist only in query
//! results until a scoped edit promotes one to a row of its own.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::{EntryRef, ScheduleEntry, VirtualOccurrence};
use crate::recurrence::{self, RecurrenceConfig};

/// Assignee ids per master entry, fetched in one batch by the caller.
pub type AssigneeMap = HashMap<Uuid, Vec<Uuid>>;

/// Expands each recurring master into its virtual occurrences within
/// `[window_start, window_end]`, sorted by start time.
///
/// Masters whose stored rule no longer parses are skipped without error;
/// their literal row still surfaces through the stored-entry side of a
/// query. Each occurrence inherits the master's fields, keeps the master's
/// duration, and carries the composite occurrence reference as its identity.
pub fn materialize(
    masters: &[ScheduleEntry],
    assignees: &AssigneeMap,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    holidays: &[NaiveDate],
    config: &RecurrenceConfig,
) -> Vec<VirtualOccurrence> {
    let mut out = Vec::new();

    for master in masters {
        let Some(rule) = master.rule() else {
            continue;
        };
        let duration = master.duration();
        let master_assignees = assignees.get(&master.id).cloned().unwrap_or_default();

        let expansion = recurrence::expand(
            Some(&rule),
            master.starts_at,
            window_start,
            window_end,
            holidays,
            config,
        );
        for start in expansion.starts {
            out.push(VirtualOccurrence {
                id: EntryRef::occurrence(master.id, start),
                master_id: master.id,
                tenant_id: master.tenant_id,
                title: master.title.clone(),
                starts_at: start,
                ends_at: start + duration,
                notes: master.notes.clone(),
                status: master.status,
                work_item: master.work_item(),
                is_private: master.is_private,
                assignees: master_assignees.clone(),
            });
        }
    }

    out.sort_by_key(|occ| occ.starts_at);
    out
}
