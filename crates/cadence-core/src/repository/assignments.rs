use crate::error::CoreError;
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

#[async_trait]
impl super::AssignmentRepository for SqliteRepository {
    async fn set_assignees(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
        user_ids: &[Uuid],
    ) -> Result<(), CoreError> {
        let mut tx = self.pool().begin().await?;
        Self::fetch_entry_in_tx(&mut tx, tenant_id, entry_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(entry_id.to_string()))?;
        set_assignees_in_tx(&mut tx, tenant_id, entry_id, user_ids).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_assignees(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
    ) -> Result<Vec<Uuid>, CoreError> {
        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM schedule_entries WHERE tenant_id = $1 AND id = $2")
                .bind(tenant_id)
                .bind(entry_id)
                .fetch_optional(self.pool())
                .await?;
        if exists.is_none() {
            return Err(CoreError::NotFound(entry_id.to_string()));
        }

        let user_ids = sqlx::query_scalar(
            "SELECT user_id FROM entry_assignments
             WHERE tenant_id = $1 AND entry_id = $2
             ORDER BY user_id",
        )
        .bind(tenant_id)
        .bind(entry_id)
        .fetch_all(self.pool())
        .await?;
        Ok(user_ids)
    }
}

/// Replaces an entry's assignee rows with the given user set, inside the
/// caller's transaction. Every id must name a user of the tenant; any
/// unknown ids fail the call with the full offender list, so the caller
/// can report them all at once.
pub(crate) async fn set_assignees_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    tenant_id: Uuid,
    entry_id: Uuid,
    user_ids: &[Uuid],
) -> Result<(), CoreError> {
    let mut wanted: Vec<Uuid> = user_ids.to_vec();
    wanted.sort();
    wanted.dedup();

    if !wanted.is_empty() {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT id FROM users WHERE tenant_id = ");
        qb.push_bind(tenant_id).push(" AND id IN (");
        let mut ids = qb.separated(", ");
        for id in &wanted {
            ids.push_bind(*id);
        }
        qb.push(")");
        let known: Vec<Uuid> = qb.build_query_scalar().fetch_all(&mut **tx).await?;

        let unknown: Vec<Uuid> = wanted
            .iter()
            .filter(|id| !known.contains(id))
            .copied()
            .collect();
        if !unknown.is_empty() {
            return Err(CoreError::UnknownAssignees(unknown));
        }
    }

    sqlx::query("DELETE FROM entry_assignments WHERE tenant_id = $1 AND entry_id = $2")
        .bind(tenant_id)
        .bind(entry_id)
        .execute(&mut **tx)
        .await?;

    if !wanted.is_empty() {
        let now = Utc::now();
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO entry_assignments (tenant_id, entry_id, user_id, created_at) ",
        );
        qb.push_values(wanted, |mut row, user_id| {
            row.push_bind(tenant_id)
                .push_bind(entry_id)
                .push_bind(user_id)
                .push_bind(now);
        });
        qb.build().execute(&mut **tx).await?;
    }
    Ok(())
}

/// Copies every assignment row of `from_entry` onto `to_entry`. Used by the
/// mutation engine when an occurrence is extracted or a series re-rooted.
pub(crate) async fn copy_assignees_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    tenant_id: Uuid,
    from_entry: Uuid,
    to_entry: Uuid,
) -> Result<(), CoreError> {
    sqlx::query(
        "INSERT INTO entry_assignments (tenant_id, entry_id, user_id, created_at)
         SELECT tenant_id, $1, user_id, $2 FROM entry_assignments
         WHERE tenant_id = $3 AND entry_id = $4",
    )
    .bind(to_entry)
    .bind(Utc::now())
    .bind(tenant_id)
    .bind(from_entry)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Assignee ids for a set of entries in one round trip, keyed by entry id.
/// No existence validation; the query facade feeds this straight into
/// materialization.
pub(crate) async fn assignee_map(
    pool: &sqlx::SqlitePool,
    tenant_id: Uuid,
    entry_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<Uuid>>, CoreError> {
    let mut map: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    if entry_ids.is_empty() {
        return Ok(map);
    }

    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT entry_id, user_id FROM entry_assignments WHERE tenant_id = ",
    );
    qb.push_bind(tenant_id).push(" AND entry_id IN (");
    let mut ids = qb.separated(", ");
    for id in entry_ids {
        ids.push_bind(*id);
    }
    qb.push(") ORDER BY entry_id, user_id");

    let rows: Vec<(Uuid, Uuid)> = qb.build_query_as().fetch_all(pool).await?;
    for (entry_id, user_id) in rows {
        map.entry(entry_id).or_default().push(user_id);
    }
    Ok(map)
}
