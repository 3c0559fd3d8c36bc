//! Directed user relations (friend, follow, ...)

use sqlx::Row;

use crate::entity::{Pagination, RelationDirection, UserInfo};
use crate::error::{RecordStoreError, Result};
use crate::store::RecordStore;
use crate::store::user::row_to_user;

impl RecordStore {
    // =========================================================================
    // Relation Operations
    // =========================================================================

    /// Add the edge `from --relation--> to`
    ///
    /// Both users must exist. Adding an existing edge is a no-op.
    pub async fn add_relation(&self, from: &str, relation: &str, to: &str) -> Result<()> {
        let users = self.ddl().table("_user");
        let sql = format!("SELECT id FROM {} WHERE id = ANY($1)", users);
        let existing: Vec<String> = sqlx::query_scalar(&sql)
            .bind(vec![from, to])
            .fetch_all(&self.pool)
            .await?;
        if !existing.iter().any(|id| id == from) || !existing.iter().any(|id| id == to) {
            return Err(RecordStoreError::referential_integrity("userID not exist"));
        }

        let sql = format!(
            "INSERT INTO {} (name, from_id, to_id) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
            self.ddl().table("_relation")
        );
        sqlx::query(&sql)
            .bind(relation)
            .bind(from)
            .bind(to)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Remove the edge `from --relation--> to`
    pub async fn remove_relation(&self, from: &str, relation: &str, to: &str) -> Result<()> {
        let sql = format!(
            "DELETE FROM {} WHERE name = $1 AND from_id = $2 AND to_id = $3",
            self.ddl().table("_relation")
        );
        let result = sqlx::query(&sql)
            .bind(relation)
            .bind(from)
            .bind(to)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RecordStoreError::not_found(format!(
                "{} relation not exist {{{}}} => {{{}}}",
                relation, from, to
            )));
        }
        Ok(())
    }

    /// FROM/JOIN/WHERE body selecting the users related to `$2` through `$1`
    fn relation_body(&self, direction: RelationDirection) -> String {
        let relations = self.ddl().table("_relation");
        let users = self.ddl().table("_user");
        match direction {
            RelationDirection::Outward => format!(
                "FROM {r} r JOIN {u} u ON u.id = r.to_id WHERE r.name = $1 AND r.from_id = $2",
                r = relations,
                u = users
            ),
            RelationDirection::Inward => format!(
                "FROM {r} r JOIN {u} u ON u.id = r.from_id WHERE r.name = $1 AND r.to_id = $2",
                r = relations,
                u = users
            ),
            // Outward edges that also exist inward
            RelationDirection::Mutual => format!(
                "FROM {r} r \
                 JOIN {r} back ON back.name = r.name AND back.from_id = r.to_id AND back.to_id = r.from_id \
                 JOIN {u} u ON u.id = r.to_id \
                 WHERE r.name = $1 AND r.from_id = $2",
                r = relations,
                u = users
            ),
        }
    }

    /// Users related to `user_id`, in the order the edges were added
    pub async fn query_relation(
        &self,
        user_id: &str,
        relation: &str,
        direction: RelationDirection,
        page: Pagination,
    ) -> Result<Vec<UserInfo>> {
        let sql = format!(
            "SELECT u.id, u.username, u.email, u.password, u.auth {} ORDER BY r.seq LIMIT $3 OFFSET $4",
            self.relation_body(direction)
        );
        let limit = page.limit.map(|limit| i64::try_from(limit).unwrap_or(i64::MAX));
        let offset = i64::try_from(page.offset).unwrap_or(i64::MAX);

        let rows = sqlx::query(&sql)
            .bind(relation)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_user).collect()
    }

    /// Number of users related to `user_id`
    pub async fn query_relation_count(
        &self,
        user_id: &str,
        relation: &str,
        direction: RelationDirection,
    ) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) AS count {}", self.relation_body(direction));
        let row = sqlx::query(&sql)
            .bind(relation)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get("count")?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}
