use crate::error::CoreError;
use crate::models::{
    EditScope, EntryRef, EntryStatus, NewEntryData, RecurrenceRule, ScheduleEntry,
    UpdateEntryData, WorkItemRef,
};
use crate::recurrence;
use crate::repository::{assignments, SqliteRepository};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{QueryBuilder, Sqlite, Transaction};
use uuid::Uuid;

#[async_trait]
impl super::EntryRepository for SqliteRepository {
    async fn create_entry(
        &self,
        tenant_id: Uuid,
        data: NewEntryData,
    ) -> Result<ScheduleEntry, CoreError> {
        if data.ends_at < data.starts_at {
            return Err(CoreError::InvalidInput(
                "entry ends before it starts".to_string(),
            ));
        }

        let now = Utc::now();
        let recurrence_json = match &data.recurrence {
            Some(rule) => Some(rule.to_json()?),
            None => None,
        };
        let entry = ScheduleEntry {
            id: Uuid::now_v7(),
            tenant_id,
            title: data.title,
            starts_at: data.starts_at,
            ends_at: data.ends_at,
            notes: data.notes,
            status: data.status.unwrap_or(EntryStatus::Scheduled),
            work_item_kind: data.work_item.as_ref().map(|w| w.kind.clone()),
            work_item_id: data.work_item.as_ref().map(|w| w.id),
            recurrence: recurrence_json,
            is_recurring: data.recurrence.is_some(),
            is_private: data.is_private,
            master_id: None,
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool().begin().await?;
        let created = Self::insert_entry_in_tx(&mut tx, &entry).await?;
        if !data.assignees.is_empty() {
            assignments::set_assignees_in_tx(&mut tx, tenant_id, created.id, &data.assignees)
                .await?;
        }
        tx.commit().await?;
        Ok(created)
    }

    async fn find_entry(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<ScheduleEntry>, CoreError> {
        let entry = sqlx::query_as("SELECT * FROM schedule_entries WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(entry)
    }

    async fn update_entry(
        &self,
        tenant_id: Uuid,
        entry: EntryRef,
        data: UpdateEntryData,
        scope: Option<EditScope>,
    ) -> Result<ScheduleEntry, CoreError> {
        let mut tx = self.pool().begin().await?;
        let master = Self::fetch_entry_in_tx(&mut tx, tenant_id, entry.master_id())
            .await?
            .ok_or_else(|| CoreError::NotFound(entry.master_id().to_string()))?;

        let updated = match scope {
            None => {
                if matches!(entry, EntryRef::Occurrence { .. }) {
                    return Err(CoreError::InvalidInput(
                        "an occurrence reference needs an edit scope".to_string(),
                    ));
                }
                Self::update_unscoped_in_tx(&mut tx, &master, data).await?
            }
            Some(scope) => {
                let rule = Self::require_rule(&master, scope)?;
                match scope {
                    EditScope::Single => {
                        Self::update_single_in_tx(&mut tx, &master, rule, data).await?
                    }
                    EditScope::Future => {
                        let split_at = entry
                            .occurrence_at()
                            .ok_or(CoreError::ScopeRequiresOccurrence(master.id))?;
                        Self::update_future_in_tx(&mut tx, &master, rule, split_at, data).await?
                    }
                    EditScope::All => Self::update_all_in_tx(&mut tx, &master, rule, data).await?,
                }
            }
        };

        tx.commit().await?;
        Ok(updated)
    }

    async fn delete_entry(
        &self,
        tenant_id: Uuid,
        entry: EntryRef,
        scope: Option<EditScope>,
    ) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;
        let master = Self::fetch_entry_in_tx(&mut tx, tenant_id, entry.master_id())
            .await?
            .ok_or_else(|| CoreError::NotFound(entry.master_id().to_string()))?;

        match scope {
            None => {
                if matches!(entry, EntryRef::Occurrence { .. }) {
                    return Err(CoreError::InvalidInput(
                        "an occurrence reference needs a delete scope".to_string(),
                    ));
                }
                Self::delete_row_in_tx(&mut tx, tenant_id, master.id).await?;
            }
            Some(scope) => match (scope, entry) {
                (EditScope::Single, EntryRef::Occurrence { .. }) => {
                    // Non-destructive: one exception date on the master.
                    let at = entry
                        .occurrence_at()
                        .ok_or_else(|| CoreError::InvalidEntryRef(entry.to_string()))?;
                    let mut rule = Self::require_rule(&master, scope)?;
                    rule.add_exception(at);
                    Self::store_rule_in_tx(&mut tx, &master, &rule).await?;
                }
                (EditScope::Single, EntryRef::Master(_)) => {
                    let rule = Self::require_rule(&master, scope)?;
                    Self::delete_single_on_master_in_tx(&mut tx, &master, rule, self.config())
                        .await?;
                }
                (EditScope::Future, EntryRef::Occurrence { .. }) => {
                    let split_at = entry
                        .occurrence_at()
                        .ok_or_else(|| CoreError::InvalidEntryRef(entry.to_string()))?;
                    let mut rule = Self::require_rule(&master, scope)?;
                    rule.ends_on = Some(recurrence::to_utc_midnight(split_at) - Duration::days(1));
                    Self::store_rule_in_tx(&mut tx, &master, &rule).await?;
                }
                // Future from the series start is the whole series.
                (EditScope::Future, EntryRef::Master(_)) | (EditScope::All, _) => {
                    Self::delete_row_in_tx(&mut tx, tenant_id, master.id).await?;
                }
            },
        }

        tx.commit().await?;
        Ok(())
    }
}

impl SqliteRepository {
    fn require_rule(master: &ScheduleEntry, scope: EditScope) -> Result<RecurrenceRule, CoreError> {
        master.rule().ok_or_else(|| {
            CoreError::InvalidInput(format!(
                "entry {} has no usable recurrence rule for a {} edit",
                master.id, scope
            ))
        })
    }

    pub(crate) async fn fetch_entry_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<ScheduleEntry>, CoreError> {
        let entry = sqlx::query_as("SELECT * FROM schedule_entries WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(entry)
    }

    pub(crate) async fn insert_entry_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        entry: &ScheduleEntry,
    ) -> Result<ScheduleEntry, CoreError> {
        let created = sqlx::query_as(
            r#"INSERT INTO schedule_entries
                (id, tenant_id, title, starts_at, ends_at, notes, status,
                 work_item_kind, work_item_id, recurrence, is_recurring, private,
                 master_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING *"#,
        )
        .bind(entry.id)
        .bind(entry.tenant_id)
        .bind(&entry.title)
        .bind(entry.starts_at)
        .bind(entry.ends_at)
        .bind(&entry.notes)
        .bind(entry.status)
        .bind(&entry.work_item_kind)
        .bind(entry.work_item_id)
        .bind(&entry.recurrence)
        .bind(entry.is_recurring)
        .bind(entry.is_private)
        .bind(&entry.master_id)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .fetch_one(&mut **tx)
        .await?;
        Ok(created)
    }

    /// Rewrites the master's serialized rule, leaving every other field alone.
    pub(crate) async fn store_rule_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        master: &ScheduleEntry,
        rule: &RecurrenceRule,
    ) -> Result<(), CoreError> {
        sqlx::query(
            "UPDATE schedule_entries SET recurrence = $1, updated_at = $2
             WHERE tenant_id = $3 AND id = $4",
        )
        .bind(rule.to_json()?)
        .bind(Utc::now())
        .bind(master.tenant_id)
        .bind(master.id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub(crate) async fn delete_row_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM entry_assignments WHERE tenant_id = $1 AND entry_id = $2")
            .bind(tenant_id)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        let result = sqlx::query("DELETE FROM schedule_entries WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .execute(&mut **tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Plain field update for an entry addressed without a scope. The one
    /// recurrence transition allowed here is clearing the rule, which turns
    /// the row back into a standalone appointment.
    async fn update_unscoped_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        master: &ScheduleEntry,
        data: UpdateEntryData,
    ) -> Result<ScheduleEntry, CoreError> {
        let recurrence_change = match &data.recurrence {
            None => None,
            Some(None) => Some((None, false)),
            Some(Some(rule)) => Some((Some(rule.to_json()?), true)),
        };

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE schedule_entries SET ");
        let mut fields = qb.separated(", ");
        if let Some(title) = &data.title {
            fields.push("title = ").push_bind_unseparated(title.clone());
        }
        if let Some(starts_at) = data.starts_at {
            fields.push("starts_at = ").push_bind_unseparated(starts_at);
        }
        if let Some(ends_at) = data.ends_at {
            fields.push("ends_at = ").push_bind_unseparated(ends_at);
        }
        if let Some(notes) = &data.notes {
            fields.push("notes = ").push_bind_unseparated(notes.clone());
        }
        if let Some(status) = data.status {
            fields.push("status = ").push_bind_unseparated(status);
        }
        if let Some(work_item) = &data.work_item {
            fields
                .push("work_item_kind = ")
                .push_bind_unseparated(work_item.as_ref().map(|w| w.kind.clone()));
            fields
                .push("work_item_id = ")
                .push_bind_unseparated(work_item.as_ref().map(|w| w.id));
        }
        if let Some((json, is_recurring)) = recurrence_change {
            fields.push("recurrence = ").push_bind_unseparated(json);
            fields
                .push("is_recurring = ")
                .push_bind_unseparated(is_recurring);
        }
        if let Some(is_private) = data.is_private {
            fields.push("private = ").push_bind_unseparated(is_private);
        }
        fields.push("updated_at = ").push_bind_unseparated(Utc::now());

        qb.push(" WHERE tenant_id = ")
            .push_bind(master.tenant_id)
            .push(" AND id = ")
            .push_bind(master.id)
            .push(" RETURNING *");

        let updated: ScheduleEntry = qb.build_query_as().fetch_one(&mut **tx).await?;

        if let Some(user_ids) = &data.assignees {
            assignments::set_assignees_in_tx(tx, master.tenant_id, master.id, user_ids).await?;
        }
        Ok(updated)
    }

    /// Extracts one occurrence as its own standalone row and excludes its
    /// date from the master's rule. The master row keeps everything else.
    async fn update_single_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        master: &ScheduleEntry,
        mut rule: RecurrenceRule,
        data: UpdateEntryData,
    ) -> Result<ScheduleEntry, CoreError> {
        let now = Utc::now();
        let starts_at = data.starts_at.unwrap_or(master.starts_at);
        let ends_at = data.ends_at.unwrap_or(master.ends_at);
        let extracted = ScheduleEntry {
            id: Uuid::now_v7(),
            tenant_id: master.tenant_id,
            title: data.title.unwrap_or_else(|| master.title.clone()),
            starts_at,
            ends_at,
            notes: resolve(data.notes, &master.notes),
            status: data.status.unwrap_or(master.status),
            work_item_kind: work_item_kind(&data.work_item, master),
            work_item_id: work_item_id(&data.work_item, master),
            recurrence: None,
            is_recurring: false,
            is_private: data.is_private.unwrap_or(master.is_private),
            master_id: None,
            created_at: now,
            updated_at: now,
        };
        let created = Self::insert_entry_in_tx(tx, &extracted).await?;

        rule.add_exception(starts_at);
        Self::store_rule_in_tx(tx, master, &rule).await?;

        match &data.assignees {
            Some(user_ids) => {
                assignments::set_assignees_in_tx(tx, master.tenant_id, created.id, user_ids)
                    .await?
            }
            None => {
                assignments::copy_assignees_in_tx(tx, master.tenant_id, master.id, created.id)
                    .await?
            }
        }
        Ok(created)
    }

    /// Splits the series at the given occurrence: the original master's rule
    /// ends the day before, and a new master carries the remainder.
    async fn update_future_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        master: &ScheduleEntry,
        original_rule: RecurrenceRule,
        split_at: DateTime<Utc>,
        mut data: UpdateEntryData,
    ) -> Result<ScheduleEntry, CoreError> {
        let split_date = recurrence::date_key(split_at);

        let mut truncated = original_rule.clone();
        truncated.ends_on = Some(recurrence::to_utc_midnight(split_at) - Duration::days(1));
        truncated
            .exceptions
            .retain(|ex| recurrence::date_key(*ex) < split_date);
        Self::store_rule_in_tx(tx, master, &truncated).await?;

        let now = Utc::now();
        let starts_at = data.starts_at.unwrap_or(split_at);
        let ends_at = data.ends_at.unwrap_or(starts_at + master.duration());
        // Re-anchoring keeps the original's end bound; a caller-supplied rule
        // keeps its own.
        let mut new_rule = match data.recurrence.take() {
            Some(Some(rule)) => rule,
            _ => original_rule.reanchored_at(starts_at),
        };
        new_rule
            .exceptions
            .retain(|ex| recurrence::date_key(*ex) >= split_date);
        for ex in &original_rule.exceptions {
            if recurrence::date_key(*ex) >= split_date {
                new_rule.add_exception(*ex);
            }
        }

        let new_master = ScheduleEntry {
            id: Uuid::now_v7(),
            tenant_id: master.tenant_id,
            title: data.title.unwrap_or_else(|| master.title.clone()),
            starts_at,
            ends_at,
            notes: resolve(data.notes, &master.notes),
            status: data.status.unwrap_or(master.status),
            work_item_kind: work_item_kind(&data.work_item, master),
            work_item_id: work_item_id(&data.work_item, master),
            recurrence: Some(new_rule.to_json()?),
            is_recurring: true,
            is_private: data.is_private.unwrap_or(master.is_private),
            master_id: None,
            created_at: now,
            updated_at: now,
        };
        let created = Self::insert_entry_in_tx(tx, &new_master).await?;

        match &data.assignees {
            Some(user_ids) => {
                assignments::set_assignees_in_tx(tx, master.tenant_id, created.id, user_ids)
                    .await?
            }
            None => {
                assignments::copy_assignees_in_tx(tx, master.tenant_id, master.id, created.id)
                    .await?
            }
        }
        Ok(created)
    }

    /// In-place edit of the whole series. The stored exception list survives
    /// whatever rule the caller supplies.
    async fn update_all_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        master: &ScheduleEntry,
        existing_rule: RecurrenceRule,
        mut data: UpdateEntryData,
    ) -> Result<ScheduleEntry, CoreError> {
        data.recurrence = match data.recurrence {
            Some(Some(mut rule)) => {
                for ex in &existing_rule.exceptions {
                    rule.add_exception(*ex);
                }
                Some(Some(rule))
            }
            // Clearing recurrence is the unscoped path's transition only.
            Some(None) | None => None,
        };
        Self::update_unscoped_in_tx(tx, master, data).await
    }

    /// SINGLE delete addressed at the master row itself: the series survives,
    /// re-rooted at the next occurrence; the original row goes away.
    async fn delete_single_on_master_in_tx(
        tx: &mut Transaction<'_, Sqlite>,
        master: &ScheduleEntry,
        rule: RecurrenceRule,
        config: &crate::recurrence::RecurrenceConfig,
    ) -> Result<(), CoreError> {
        let next =
            recurrence::next_occurrence_after(&rule, master.starts_at, master.starts_at, config);
        let Some(next_start) = next else {
            // Nothing left to re-root on, so the series simply ends here.
            return Self::delete_row_in_tx(tx, master.tenant_id, master.id).await;
        };

        let mut new_rule = rule.reanchored_at(next_start);
        new_rule.add_exception(master.starts_at);

        let now = Utc::now();
        let new_master = ScheduleEntry {
            id: Uuid::now_v7(),
            tenant_id: master.tenant_id,
            title: master.title.clone(),
            starts_at: next_start,
            ends_at: next_start + master.duration(),
            notes: master.notes.clone(),
            status: master.status,
            work_item_kind: master.work_item_kind.clone(),
            work_item_id: master.work_item_id,
            recurrence: Some(new_rule.to_json()?),
            is_recurring: true,
            is_private: master.is_private,
            master_id: None,
            created_at: now,
            updated_at: now,
        };
        let created = Self::insert_entry_in_tx(tx, &new_master).await?;
        assignments::copy_assignees_in_tx(tx, master.tenant_id, master.id, created.id).await?;
        Self::delete_row_in_tx(tx, master.tenant_id, master.id).await
    }
}

fn resolve(update: Option<Option<String>>, current: &Option<String>) -> Option<String> {
    match update {
        Some(value) => value,
        None => current.clone(),
    }
}

fn work_item_kind(update: &Option<Option<WorkItemRef>>, master: &ScheduleEntry) -> Option<String> {
    match update {
        Some(value) => value.as_ref().map(|w| w.kind.clone()),
        None => master.work_item_kind.clone(),
    }
}

fn work_item_id(update: &Option<Option<WorkItemRef>>, master: &ScheduleEntry) -> Option<Uuid> {
    match update {
        Some(value) => value.as_ref().map(|w| w.id),
        None => master.work_item_id,
    }
}
