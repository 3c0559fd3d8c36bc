//! Asset metadata

use sqlx::Row;

use crate::entity::Asset;
use crate::error::{RecordStoreError, Result};
use crate::store::RecordStore;

impl RecordStore {
    // =========================================================================
    // Asset Operations
    // =========================================================================

    /// Insert or replace asset metadata, keyed by name
    pub async fn save_asset(&self, asset: &Asset) -> Result<()> {
        if asset.name.is_empty() {
            return Err(RecordStoreError::validation("asset name is empty"));
        }

        let sql = format!(
            "INSERT INTO {} (id, content_type, size) VALUES ($1, $2, $3) \
             ON CONFLICT (id) DO UPDATE SET content_type = EXCLUDED.content_type, size = EXCLUDED.size",
            self.ddl().table("_asset")
        );
        sqlx::query(&sql)
            .bind(&asset.name)
            .bind(&asset.content_type)
            .bind(asset.size)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Get asset metadata by name
    pub async fn get_asset(&self, name: &str) -> Result<Asset> {
        let sql = format!(
            "SELECT id, content_type, size FROM {} WHERE id = $1",
            self.ddl().table("_asset")
        );
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RecordStoreError::not_found(format!("asset {} not found", name)))?;

        Ok(Asset {
            name: row.try_get("id")?,
            content_type: row.try_get("content_type")?,
            size: row.try_get("size")?,
        })
    }
}
