//! Recovery package index repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::RecoveryPackageDbModel;

#[async_trait]
pub trait RecoveryPackageRepository: Send + Sync {
    async fn upsert_package(&self, package: &RecoveryPackageDbModel) -> Result<()>;
    async fn get_package(&self, package_id: &str) -> Result<Option<RecoveryPackageDbModel>>;
    /// Newest first.
    async fn list_packages(&self) -> Result<Vec<RecoveryPackageDbModel>>;
}

/// SQLx implementation of RecoveryPackageRepository.
pub struct SqlxRecoveryPackageRepository {
    pool: SqlitePool,
}

impl SqlxRecoveryPackageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecoveryPackageRepository for SqlxRecoveryPackageRepository {
    async fn upsert_package(&self, package: &RecoveryPackageDbModel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recovery_packages (package_id, checksum, locations, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (package_id) DO UPDATE SET
                checksum = excluded.checksum,
                locations = excluded.locations,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(&package.package_id)
        .bind(&package.checksum)
        .bind(&package.locations)
        .bind(package.created_at)
        .bind(package.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_package(&self, package_id: &str) -> Result<Option<RecoveryPackageDbModel>> {
        let row = sqlx::query_as::<_, RecoveryPackageDbModel>(
            "SELECT * FROM recovery_packages WHERE package_id = ?",
        )
        .bind(package_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_packages(&self) -> Result<Vec<RecoveryPackageDbModel>> {
        let rows = sqlx::query_as::<_, RecoveryPackageDbModel>(
            "SELECT * FROM recovery_packages ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
