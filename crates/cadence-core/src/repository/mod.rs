use crate::db::DbPool;
use crate::error::CoreError;
use crate::models::{
    EditScope, EntryRef, NewEntryData, ScheduleEntry, ScheduleItem, UpdateEntryData, User,
    WorkItemRef,
};
use crate::recurrence::RecurrenceConfig;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

// Re-export domain modules
pub mod assignments;
pub mod entries;
pub mod queries;
pub mod users;

// Traits are defined in this module and implemented in respective domain modules

/// Domain-specific trait for schedule entry mutations.
///
/// `update_entry` and `delete_entry` take an optional [`EditScope`]: `None`
/// is the plain unscoped mutation for standalone entries; the scoped
/// variants drive the series state machine (occurrence extraction, splits,
/// exception maintenance). Every write runs inside one transaction — a
/// failure mid-sequence rolls back the whole mutation.
#[async_trait]
pub trait EntryRepository {
    async fn create_entry(
        &self,
        tenant_id: Uuid,
        data: NewEntryData,
    ) -> Result<ScheduleEntry, CoreError>;
    async fn find_entry(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<ScheduleEntry>, CoreError>;
    async fn update_entry(
        &self,
        tenant_id: Uuid,
        entry: EntryRef,
        data: UpdateEntryData,
        scope: Option<EditScope>,
    ) -> Result<ScheduleEntry, CoreError>;
    async fn delete_entry(
        &self,
        tenant_id: Uuid,
        entry: EntryRef,
        scope: Option<EditScope>,
    ) -> Result<(), CoreError>;
}

/// Domain-specific trait for assignment synchronization.
#[async_trait]
pub trait AssignmentRepository {
    /// Replaces the entry's assignee set. Every id must name a user of the
    /// same tenant; unknown ids fail the whole call listing the offenders.
    async fn set_assignees(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<(), CoreError>;
    async fn get_assignees(&self, tenant_id: Uuid, entry_id: Uuid)
        -> Result<Vec<Uuid>, CoreError>;
}

/// Domain-specific trait for read-side schedule queries.
#[async_trait]
pub trait ScheduleQueryRepository {
    /// Stored entries and virtual occurrences whose start falls inside the
    /// window, merged and sorted by start time.
    async fn list_in_range(
        &self,
        tenant_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        holidays: &[NaiveDate],
    ) -> Result<Vec<ScheduleItem>, CoreError>;
    async fn list_for_work_item(
        &self,
        tenant_id: Uuid,
        work_item: &WorkItemRef,
    ) -> Result<Vec<ScheduleEntry>, CoreError>;
    async fn list_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<ScheduleEntry>, CoreError>;
    async fn earliest_entry(&self, tenant_id: Uuid) -> Result<Option<ScheduleEntry>, CoreError>;
}

/// Domain-specific trait for user lookups.
#[async_trait]
pub trait UserRepository {
    async fn add_user(&self, tenant_id: Uuid, display_name: String) -> Result<User, CoreError>;
    async fn find_user(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<User>, CoreError>;
}

/// Main repository trait that composes all domain traits
#[async_trait]
pub trait Repository:
    EntryRepository + AssignmentRepository + ScheduleQueryRepository + UserRepository
{
}

/// SQLite implementation of the repository pattern
pub struct SqliteRepository {
    pool: DbPool,
    config: RecurrenceConfig,
}

impl SqliteRepository {
    pub fn new(pool: DbPool, config: RecurrenceConfig) -> Self {
        Self { pool, config }
    }

    /// Get a reference to the database pool for internal use across modules
    pub(crate) fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Get a reference to the expansion policy for internal use
    pub(crate) fn config(&self) -> &RecurrenceConfig {
        &self.config
    }
}

impl Repository for SqliteRepository {}
