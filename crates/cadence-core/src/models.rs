use chrono::{DateTime, Duration, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// A user that can be assigned to schedule entries. This is the identity
/// lookup the assignment synchronizer validates assignee references against.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Scheduled,
    Completed,
    Cancelled,
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid entry status: {0}")]
pub struct ParseEntryStatusError(String);

impl FromStr for EntryStatus {
    type Err = ParseEntryStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(EntryStatus::Scheduled),
            "completed" => Ok(EntryStatus::Completed),
            "cancelled" => Ok(EntryStatus::Cancelled),
            _ => Err(ParseEntryStatusError(s.to_string())),
        }
    }
}

/// Frequency unit of a recurrence rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
            Frequency::Yearly => write!(f, "yearly"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid frequency: {0}")]
pub struct ParseFrequencyError(String);

impl FromStr for Frequency {
    type Err = ParseFrequencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "yearly" => Ok(Frequency::Yearly),
            _ => Err(ParseFrequencyError(s.to_string())),
        }
    }
}

fn default_interval() -> u32 {
    1
}

/// Recurrence rule embedded in a recurring master, persisted as a JSON
/// document in the entry's `recurrence` column.
///
/// Exception dates are normalized to UTC midnight so that date-only equality
/// holds regardless of the time component of the rule's start; see
/// [`crate::recurrence::date_key`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    pub starts_on: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ends_on: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_of_week: Option<Vec<Weekday>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_month: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month_of_year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default)]
    pub exceptions: Vec<DateTime<Utc>>,
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency, starts_on: DateTime<Utc>) -> Self {
        Self {
            frequency,
            interval: 1,
            starts_on,
            ends_on: None,
            days_of_week: None,
            day_of_month: None,
            month_of_year: None,
            count: None,
            exceptions: Vec::new(),
        }
    }

    pub fn daily(starts_on: DateTime<Utc>) -> Self {
        Self::new(Frequency::Daily, starts_on)
    }

    pub fn weekly(starts_on: DateTime<Utc>) -> Self {
        Self::new(Frequency::Weekly, starts_on)
    }

    /// Appends an exception for the given occurrence, normalized to UTC
    /// midnight. Duplicate dates are ignored.
    pub fn add_exception(&mut self, occurrence: DateTime<Utc>) {
        let normalized = crate::recurrence::to_utc_midnight(occurrence);
        if !self.exceptions.contains(&normalized) {
            self.exceptions.push(normalized);
        }
    }

    /// Returns a copy of this rule re-anchored at a new start, keeping every
    /// other field (including the end date and exceptions) intact.
    pub fn reanchored_at(&self, new_start: DateTime<Utc>) -> Self {
        let mut rule = self.clone();
        rule.starts_on = new_start;
        rule
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Reference to an entry or to some work item a schedule entry hangs off
/// (a ticket, a maintenance order, ...). The pair is stored opaquely; the
/// owning modules are outside this engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkItemRef {
    pub kind: String,
    pub id: Uuid,
}

/// A stored schedule row: either a standalone appointment or the master of a
/// recurring series. `master_id` is always NULL on stored rows; it only
/// carries a value on computed virtual occurrences.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduleEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub status: EntryStatus,
    pub work_item_kind: Option<String>,
    pub work_item_id: Option<Uuid>,
    /// Serialized recurrence rule, present only on recurring masters.
    pub recurrence: Option<String>,
    pub is_recurring: bool,
    #[sqlx(rename = "private")]
    pub is_private: bool,
    pub master_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleEntry {
    /// Parses the stored recurrence rule. Returns `None` when the entry is
    /// not recurring or when the stored document does not parse; callers that
    /// expand series skip such masters silently.
    pub fn rule(&self) -> Option<RecurrenceRule> {
        self.recurrence
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .and_then(|raw| serde_json::from_str(raw).ok())
    }

    pub fn duration(&self) -> Duration {
        self.ends_at - self.starts_at
    }

    pub fn work_item(&self) -> Option<WorkItemRef> {
        match (&self.work_item_kind, self.work_item_id) {
            (Some(kind), Some(id)) => Some(WorkItemRef {
                kind: kind.clone(),
                id,
            }),
            _ => None,
        }
    }
}

/// An entry–user assignment row, unique on (tenant, entry, user).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EntryAssignment {
    pub tenant_id: Uuid,
    pub entry_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Entry references
// ============================================================================

/// Separator between a master id and the occurrence millisecond timestamp in
/// the composite text form of an occurrence reference.
const OCCURRENCE_SEPARATOR: char = '_';

/// Reference to a schedule entry as seen by callers: either a stored row
/// (master or standalone) or one virtual occurrence of a recurring series.
///
/// The text form of an occurrence reference is the master's id, the
/// separator, and the occurrence's millisecond timestamp, e.g.
/// `0191c2ae-…-7b2f_1705395600000`. Parsing happens once at the API boundary;
/// the mutation engine only ever sees this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryRef {
    Master(Uuid),
    Occurrence { master: Uuid, at_ms: i64 },
}

impl EntryRef {
    pub fn master_id(&self) -> Uuid {
        match self {
            EntryRef::Master(id) => *id,
            EntryRef::Occurrence { master, .. } => *master,
        }
    }

    /// The concrete occurrence timestamp, when this reference names one.
    pub fn occurrence_at(&self) -> Option<DateTime<Utc>> {
        match self {
            EntryRef::Master(_) => None,
            EntryRef::Occurrence { at_ms, .. } => DateTime::from_timestamp_millis(*at_ms),
        }
    }

    pub fn occurrence(master: Uuid, at: DateTime<Utc>) -> Self {
        EntryRef::Occurrence {
            master,
            at_ms: at.timestamp_millis(),
        }
    }
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryRef::Master(id) => write!(f, "{}", id),
            EntryRef::Occurrence { master, at_ms } => {
                write!(f, "{}{}{}", master, OCCURRENCE_SEPARATOR, at_ms)
            }
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid entry reference: {0}")]
pub struct ParseEntryRefError(String);

impl FromStr for EntryRef {
    type Err = ParseEntryRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(id) = Uuid::parse_str(s) {
            return Ok(EntryRef::Master(id));
        }
        if let Some((head, tail)) = s.rsplit_once(OCCURRENCE_SEPARATOR) {
            let master =
                Uuid::parse_str(head).map_err(|_| ParseEntryRefError(s.to_string()))?;
            let at_ms: i64 = tail.parse().map_err(|_| ParseEntryRefError(s.to_string()))?;
            if DateTime::from_timestamp_millis(at_ms).is_none() {
                return Err(ParseEntryRefError(s.to_string()));
            }
            return Ok(EntryRef::Occurrence { master, at_ms });
        }
        Err(ParseEntryRefError(s.to_string()))
    }
}

// ============================================================================
// Data Transfer Objects (DTOs)
// ============================================================================

/// Data required to create a schedule entry. A recurring master is created
/// by supplying a rule; the `is_recurring` flag on the stored row is derived
/// from it, never set independently.
#[derive(Debug, Clone)]
pub struct NewEntryData {
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub status: Option<EntryStatus>,
    pub work_item: Option<WorkItemRef>,
    pub recurrence: Option<RecurrenceRule>,
    pub is_private: bool,
    pub assignees: Vec<Uuid>,
}

impl NewEntryData {
    pub fn new(
        title: impl Into<String>,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            starts_at,
            ends_at,
            notes: None,
            status: None,
            work_item: None,
            recurrence: None,
            is_private: false,
            assignees: Vec::new(),
        }
    }
}

/// Data for updating an entry. Outer `None` means "leave unchanged"; for
/// nullable fields the inner `Option` distinguishes "set" from "clear".
/// Clearing `recurrence` on a recurring entry converts it back to a
/// standalone appointment — the only mutation that removes recurrence.
#[derive(Debug, Clone, Default)]
pub struct UpdateEntryData {
    pub title: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub notes: Option<Option<String>>,
    pub status: Option<EntryStatus>,
    pub work_item: Option<Option<WorkItemRef>>,
    pub recurrence: Option<Option<RecurrenceRule>>,
    pub is_private: Option<bool>,
    pub assignees: Option<Vec<Uuid>>,
}

/// Scope of an edit or delete against a recurring series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditScope {
    /// Affect only the selected occurrence
    Single,
    /// Split the series: this occurrence and everything after it
    Future,
    /// The entire series including past occurrences
    All,
}

impl fmt::Display for EditScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EditScope::Single => write!(f, "single"),
            EditScope::Future => write!(f, "future"),
            EditScope::All => write!(f, "all"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid edit scope: {0}")]
pub struct ParseEditScopeError(String);

impl FromStr for EditScope {
    type Err = ParseEditScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" | "occurrence" | "this" => Ok(EditScope::Single),
            "future" | "this_and_future" => Ok(EditScope::Future),
            "all" | "series" | "entire" => Ok(EditScope::All),
            _ => Err(ParseEditScopeError(s.to_string())),
        }
    }
}

// ============================================================================
// Computed occurrence views
// ============================================================================

/// A computed, never-persisted instance of a recurring series at one
/// generated timestamp. Inherits the master's attributes; start and end carry
/// the master's clock time applied to the occurrence's date.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualOccurrence {
    /// Composite identity, always the `Occurrence` variant.
    pub id: EntryRef,
    pub master_id: Uuid,
    pub tenant_id: Uuid,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub status: EntryStatus,
    pub work_item: Option<WorkItemRef>,
    pub is_private: bool,
    pub assignees: Vec<Uuid>,
}

/// One item of a schedule query result: a stored row with its assignees, or
/// a virtual occurrence projected from a recurring master.
#[derive(Debug, Clone)]
pub enum ScheduleItem {
    Stored {
        entry: ScheduleEntry,
        assignees: Vec<Uuid>,
    },
    Virtual(VirtualOccurrence),
}

impl ScheduleItem {
    pub fn starts_at(&self) -> DateTime<Utc> {
        match self {
            ScheduleItem::Stored { entry, .. } => entry.starts_at,
            ScheduleItem::Virtual(occ) => occ.starts_at,
        }
    }

    pub fn entry_ref(&self) -> EntryRef {
        match self {
            ScheduleItem::Stored { entry, .. } => EntryRef::Master(entry.id),
            ScheduleItem::Virtual(occ) => occ.id,
        }
    }

    pub fn assignees(&self) -> &[Uuid] {
        match self {
            ScheduleItem::Stored { assignees, .. } => assignees,
            ScheduleItem::Virtual(occ) => &occ.assignees,
        }
    }
}
