use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use convoy_core::error::{Error, Result};
use convoy_core::repository::GroupRepository;
use convoy_core::types::{Group, GroupFilter};

use super::{map_sqlx_err, parse_doc, parse_docs, to_doc, DocRow};

pub struct PostgresGroupRepository {
    pool: PgPool,
}

impl PostgresGroupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupRepository for PostgresGroupRepository {
    async fn load_groups(&self, filter: &GroupFilter) -> Result<Vec<Group>> {
        let rows = if filter.names.is_empty() {
            sqlx::query_as::<_, DocRow>(
                r#"
                SELECT doc FROM groups
                WHERE doc->>'document_status' = 'Active'
                ORDER BY (doc->>'created_at')::timestamptz ASC
                "#,
            )
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, DocRow>(
                r#"
                SELECT doc FROM groups
                WHERE doc->>'document_status' = 'Active'
                  AND doc->>'name' = ANY($1)
                ORDER BY (doc->>'created_at')::timestamptz ASC
                "#,
            )
            .bind(&filter.names)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(map_sqlx_err)?;

        parse_docs(rows)
    }

    async fn fetch_group_by_id(&self, uid: &str) -> Result<Group> {
        let row = sqlx::query_as::<_, DocRow>(
            r#"
            SELECT doc FROM groups
            WHERE id = $1 AND doc->>'document_status' = 'Active'
            "#,
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| Error::NotFound("group not found".to_string()))?;

        parse_doc(row)
    }

    async fn fetch_groups_by_ids(&self, uids: &[String]) -> Result<Vec<Group>> {
        let rows = sqlx::query_as::<_, DocRow>(
            r#"
            SELECT doc FROM groups
            WHERE id = ANY($1) AND doc->>'document_status' = 'Active'
            "#,
        )
        .bind(uids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        parse_docs(rows)
    }

    async fn create_group(&self, group: &Group) -> Result<()> {
        sqlx::query("INSERT INTO groups (id, doc) VALUES ($1, $2)")
            .bind(&group.uid)
            .bind(to_doc(group)?)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn update_group(&self, group: &Group) -> Result<()> {
        let result = sqlx::query("UPDATE groups SET doc = $2 WHERE id = $1")
            .bind(&group.uid)
            .bind(to_doc(group)?)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("group not found".to_string()));
        }
        Ok(())
    }

    async fn delete_group(&self, uid: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE groups
            SET doc = jsonb_set(
                jsonb_set(doc, '{document_status}', '"Deleted"'),
                '{deleted_at}', $2)
            WHERE id = $1 AND doc->>'document_status' = 'Active'
            "#,
        )
        .bind(uid)
        .bind(to_doc(&Utc::now())?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("group not found".to_string()));
        }
        Ok(())
    }
}
