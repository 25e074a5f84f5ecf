use crate::error::CoreError;
use crate::materialize;
use crate::models::{ScheduleEntry, ScheduleItem, WorkItemRef};
use crate::repository::{assignments, SqliteRepository};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

#[async_trait]
impl super::ScheduleQueryRepository for SqliteRepository {
    async fn list_in_range(
        &self,
        tenant_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        holidays: &[NaiveDate],
    ) -> Result<Vec<ScheduleItem>, CoreError> {
        // Stored side: standalone rows whose literal start falls inside the
        // window. Recurring masters surface through generation only, so a
        // master's own first date never shows up here.
        let stored: Vec<ScheduleEntry> = sqlx::query_as(
            "SELECT * FROM schedule_entries
             WHERE tenant_id = $1 AND is_recurring = FALSE
               AND starts_at >= $2 AND starts_at <= $3
             ORDER BY starts_at",
        )
        .bind(tenant_id)
        .bind(window_start)
        .bind(window_end)
        .fetch_all(self.pool())
        .await?;

        let masters: Vec<ScheduleEntry> = sqlx::query_as(
            "SELECT * FROM schedule_entries
             WHERE tenant_id = $1 AND is_recurring = TRUE AND starts_at <= $2",
        )
        .bind(tenant_id)
        .bind(window_end)
        .fetch_all(self.pool())
        .await?;

        let mut ids: Vec<Uuid> = stored.iter().map(|e| e.id).collect();
        ids.extend(masters.iter().map(|e| e.id));
        let assignee_map = assignments::assignee_map(self.pool(), tenant_id, &ids).await?;

        let occurrences = materialize::materialize(
            &masters,
            &assignee_map,
            window_start,
            window_end,
            holidays,
            self.config(),
        );

        let mut items: Vec<ScheduleItem> = stored
            .into_iter()
            .map(|entry| {
                let assignees = assignee_map.get(&entry.id).cloned().unwrap_or_default();
                ScheduleItem::Stored { entry, assignees }
            })
            .collect();
        items.extend(occurrences.into_iter().map(ScheduleItem::Virtual));
        items.sort_by_key(|item| item.starts_at());
        Ok(items)
    }

    async fn list_for_work_item(
        &self,
        tenant_id: Uuid,
        work_item: &WorkItemRef,
    ) -> Result<Vec<ScheduleEntry>, CoreError> {
        let entries = sqlx::query_as(
            "SELECT * FROM schedule_entries
             WHERE tenant_id = $1 AND work_item_kind = $2 AND work_item_id = $3
             ORDER BY starts_at",
        )
        .bind(tenant_id)
        .bind(&work_item.kind)
        .bind(work_item.id)
        .fetch_all(self.pool())
        .await?;
        Ok(entries)
    }

    async fn list_for_user(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<Vec<ScheduleEntry>, CoreError> {
        let entries = sqlx::query_as(
            "SELECT e.* FROM schedule_entries e
             INNER JOIN entry_assignments a
                ON a.tenant_id = e.tenant_id AND a.entry_id = e.id
             WHERE e.tenant_id = $1 AND a.user_id = $2
             ORDER BY e.starts_at",
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(entries)
    }

    async fn earliest_entry(&self, tenant_id: Uuid) -> Result<Option<ScheduleEntry>, CoreError> {
        let entry = sqlx::query_as(
            "SELECT * FROM schedule_entries WHERE tenant_id = $1
             ORDER BY starts_at LIMIT 1",
        )
        .bind(tenant_id)
        .fetch_optional(self.pool())
        .await?;
        Ok(entry)
    }
}
