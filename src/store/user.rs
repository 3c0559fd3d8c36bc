//! User registry

use sqlx::Row;
use sqlx::postgres::PgRow;

use crate::entity::{AuthInfo, UserInfo};
use crate::error::{RecordStoreError, Result};
use crate::store::RecordStore;

const USER_COLUMNS: &str = "id, username, email, password, auth";

/// Empty strings are stored as NULL so they never collide on the unique columns
fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

pub(crate) fn row_to_user(row: &PgRow) -> Result<UserInfo> {
    let auth: serde_json::Value = row.try_get("auth")?;
    Ok(UserInfo {
        id: row.try_get("id")?,
        username: row.try_get::<Option<String>, _>("username")?.unwrap_or_default(),
        email: row.try_get::<Option<String>, _>("email")?.unwrap_or_default(),
        hashed_password: row.try_get::<Option<Vec<u8>>, _>("password")?.unwrap_or_default(),
        auth: serde_json::from_value::<AuthInfo>(auth)?,
    })
}

impl RecordStore {
    // =========================================================================
    // User Operations
    // =========================================================================

    /// Register a user
    ///
    /// An empty id is replaced by a generated one. Fails with `Duplicated` when
    /// the id, username or email is already taken.
    pub async fn create_user(&self, user: &mut UserInfo) -> Result<()> {
        if user.id.is_empty() {
            user.id = uuid::Uuid::new_v4().to_string();
        }

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5)",
            self.ddl().table("_user"),
            USER_COLUMNS
        );
        sqlx::query(&sql)
            .bind(&user.id)
            .bind(non_empty(&user.username))
            .bind(non_empty(&user.email))
            .bind(&user.hashed_password)
            .bind(serde_json::to_value(&user.auth)?)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                RecordStoreError::from_unique_violation(
                    e,
                    "user id, username or email already exists",
                )
            })?;

        tracing::debug!(user_id = %user.id, "created user");
        Ok(())
    }

    /// Get user by id
    pub async fn get_user(&self, id: &str) -> Result<UserInfo> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1",
            USER_COLUMNS,
            self.ddl().table("_user")
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| RecordStoreError::not_found(format!("user {} not found", id)))?;
        row_to_user(&row)
    }

    /// Get the user whose auth map holds `principal_id` (e.g. `com.example:johndoe`)
    pub async fn get_user_by_principal_id(&self, principal_id: &str) -> Result<UserInfo> {
        let sql = format!(
            "SELECT {} FROM {} WHERE auth ? $1 LIMIT 1",
            USER_COLUMNS,
            self.ddl().table("_user")
        );
        let row = sqlx::query(&sql)
            .bind(principal_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                RecordStoreError::not_found(format!("no user with principal {}", principal_id))
            })?;
        row_to_user(&row)
    }

    /// Users whose email is one of `emails`
    ///
    /// Empty strings never match, even users stored without an email.
    pub async fn query_user<S: AsRef<str>>(&self, emails: &[S]) -> Result<Vec<UserInfo>> {
        let emails: Vec<&str> = emails
            .iter()
            .map(AsRef::as_ref)
            .filter(|email| !email.is_empty())
            .collect();
        if emails.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {} FROM {} WHERE email = ANY($1) ORDER BY email",
            USER_COLUMNS,
            self.ddl().table("_user")
        );
        let rows = sqlx::query(&sql)
            .bind(&emails)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_user).collect()
    }

    /// Overwrite a user's username, email, password and auth map
    pub async fn update_user(&self, user: &UserInfo) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET username = $2, email = $3, password = $4, auth = $5 WHERE id = $1",
            self.ddl().table("_user")
        );
        let result = sqlx::query(&sql)
            .bind(&user.id)
            .bind(non_empty(&user.username))
            .bind(non_empty(&user.email))
            .bind(&user.hashed_password)
            .bind(serde_json::to_value(&user.auth)?)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                RecordStoreError::from_unique_violation(e, "username or email already exists")
            })?;

        if result.rows_affected() == 0 {
            return Err(RecordStoreError::not_found(format!("user {} not found", user.id)));
        }
        Ok(())
    }

    /// Delete a user with their devices and relations
    pub async fn delete_user(&self, id: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE id = $1", self.ddl().table("_user"));
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(RecordStoreError::not_found(format!("user {} not found", id)));
        }
        Ok(())
    }
}
