//! Backup credential repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::CredentialDbModel;
use crate::{Error, Result};

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Enabled candidates, highest priority first.
    async fn list_candidates(&self) -> Result<Vec<CredentialDbModel>>;
    async fn create_credential(&self, credential: &CredentialDbModel) -> Result<()>;
    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()>;
}

/// SQLx implementation of CredentialRepository.
pub struct SqlxCredentialRepository {
    pool: SqlitePool,
}

impl SqlxCredentialRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for SqlxCredentialRepository {
    async fn list_candidates(&self) -> Result<Vec<CredentialDbModel>> {
        let rows = sqlx::query_as::<_, CredentialDbModel>(
            "SELECT * FROM credentials WHERE status = 'active' ORDER BY priority DESC, created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn create_credential(&self, credential: &CredentialDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO credentials (id, label, secret, app_id, app_hash, priority, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&credential.id)
        .bind(&credential.label)
        .bind(&credential.secret)
        .bind(credential.app_id)
        .bind(&credential.app_hash)
        .bind(credential.priority)
        .bind(&credential.status)
        .bind(credential.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let status = if enabled { "active" } else { "disabled" };
        let result = sqlx::query("UPDATE credentials SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("Credential", id));
        }
        Ok(())
    }
}
