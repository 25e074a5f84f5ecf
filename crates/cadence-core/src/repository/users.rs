use crate::error::CoreError;
use crate::models::User;
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

#[async_trait]
impl super::UserRepository for SqliteRepository {
    async fn add_user(&self, tenant_id: Uuid, display_name: String) -> Result<User, CoreError> {
        if display_name.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "display name must not be empty".to_string(),
            ));
        }
        let user = sqlx::query_as(
            "INSERT INTO users (id, tenant_id, display_name, created_at)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(Uuid::now_v7())
        .bind(tenant_id)
        .bind(display_name)
        .bind(Utc::now())
        .fetch_one(self.pool())
        .await?;
        Ok(user)
    }

    async fn find_user(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<User>, CoreError> {
        let user = sqlx::query_as("SELECT * FROM users WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(user)
    }
}
