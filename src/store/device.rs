//! Device registry

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::entity::Device;
use crate::error::{self, RecordStoreError, Result};
use crate::store::RecordStore;

const DEVICE_COLUMNS: &str = "id, type, token, user_id, last_registered_at";

fn row_to_device(row: &PgRow) -> Result<Device> {
    Ok(Device {
        id: row.try_get("id")?,
        device_type: row.try_get("type")?,
        token: row.try_get("token")?,
        user_id: row.try_get("user_id")?,
        last_registered_at: Some(row.try_get("last_registered_at")?),
    })
}

fn validate_device(device: &Device) -> Result<DateTime<Utc>> {
    let missing = if device.id.is_empty() {
        Some("id")
    } else if device.device_type.is_empty() {
        Some("type")
    } else if device.user_id.is_empty() {
        Some("user id")
    } else {
        None
    };
    if let Some(field) = missing {
        return Err(RecordStoreError::validation(format!("device {} is empty", field)));
    }

    device.last_registered_at.ok_or_else(|| {
        RecordStoreError::validation(format!("device {} has no last registration time", device.id))
    })
}

impl RecordStore {
    // =========================================================================
    // Device Operations
    // =========================================================================

    /// Get device by id
    pub async fn get_device(&self, id: &str) -> Result<Device> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1",
            DEVICE_COLUMNS,
            self.ddl().table("_device")
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RecordStoreError::not_found(format!("device {} not found", id)))?;
        row_to_device(&row)
    }

    /// Insert or replace a device
    ///
    /// Id, type, user id and registration time are required; an empty token is
    /// stored as no token.
    pub async fn save_device(&self, device: &Device) -> Result<()> {
        let last_registered_at = validate_device(device)?;
        let token = device.token.as_deref().filter(|token| !token.is_empty());

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO UPDATE SET \
             type = EXCLUDED.type, token = EXCLUDED.token, \
             user_id = EXCLUDED.user_id, last_registered_at = EXCLUDED.last_registered_at",
            self.ddl().table("_device"),
            DEVICE_COLUMNS
        );
        sqlx::query(&sql)
            .bind(&device.id)
            .bind(&device.device_type)
            .bind(token)
            .bind(&device.user_id)
            .bind(last_registered_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if error::is_foreign_key_violation(&e) {
                    RecordStoreError::referential_integrity("userID not exist")
                } else {
                    RecordStoreError::Sql(e)
                }
            })?;
        Ok(())
    }

    /// Delete device by id
    pub async fn delete_device(&self, id: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.ddl().table("_device"));
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(RecordStoreError::not_found(format!("device {} not found", id)));
        }
        Ok(())
    }

    /// Delete the devices registered with `token` before `cutoff`
    ///
    /// A device registered at or after `cutoff` is kept and, if no other device
    /// matched, the call fails with `NotFound`. `None` deletes regardless of
    /// registration time.
    pub async fn delete_device_by_token(
        &self,
        token: &str,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE token = $1 AND ($2::timestamptz IS NULL OR last_registered_at < $2)",
            self.ddl().table("_device")
        );
        let result = sqlx::query(&sql)
            .bind(token)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RecordStoreError::not_found(format!(
                "no device with token {} registered before the cutoff",
                token
            )));
        }
        Ok(())
    }

    /// Delete every device without a token registered at or before `cutoff`
    ///
    /// `None` deletes every device without a token. Fails with `NotFound` when
    /// nothing was deleted.
    pub async fn delete_empty_devices_by_time(&self, cutoff: Option<DateTime<Utc>>) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE token IS NULL AND ($1::timestamptz IS NULL OR last_registered_at <= $1)",
            self.ddl().table("_device")
        );
        let result = sqlx::query(&sql).bind(cutoff).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(RecordStoreError::not_found("no empty device to delete"));
        }
        Ok(())
    }

    /// Every device of `user_id`, oldest registration first
    pub async fn query_devices_by_user(&self, user_id: &str) -> Result<Vec<Device>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE user_id = $1 ORDER BY last_registered_at, id",
            DEVICE_COLUMNS,
            self.ddl().table("_device")
        );
        let rows = sqlx::query(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_device).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device {
            id: "device".into(),
            device_type: "ios".into(),
            token: None,
            user_id: "user".into(),
            last_registered_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_validate_complete_device() {
        assert!(validate_device(&device()).is_ok());
    }

    #[test]
    fn test_validate_required_fields() {
        for broken in [
            Device { id: String::new(), ..device() },
            Device { device_type: String::new(), ..device() },
            Device { user_id: String::new(), ..device() },
            Device { last_registered_at: None, ..device() },
        ] {
            let err = validate_device(&broken).unwrap_err();
            assert!(matches!(err, RecordStoreError::Validation(_)));
        }
    }
}
