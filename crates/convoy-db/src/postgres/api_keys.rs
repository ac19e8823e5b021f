use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use convoy_core::error::{Error, Result};
use convoy_core::repository::ApiKeyRepository;
use convoy_core::types::{ApiKey, Pageable, PaginationData};

use super::{map_sqlx_err, parse_doc, parse_docs, to_doc, DocRow};

pub struct PostgresApiKeyRepository {
    pool: PgPool,
}

impl PostgresApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyRepository for PostgresApiKeyRepository {
    async fn create_api_key(&self, key: &ApiKey) -> Result<()> {
        sqlx::query("INSERT INTO api_keys (id, doc) VALUES ($1, $2)")
            .bind(&key.uid)
            .bind(to_doc(key)?)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn update_api_key(&self, key: &ApiKey) -> Result<()> {
        let result = sqlx::query("UPDATE api_keys SET doc = $2 WHERE id = $1")
            .bind(&key.uid)
            .bind(to_doc(key)?)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("api key not found".to_string()));
        }
        Ok(())
    }

    async fn find_api_key_by_id(&self, uid: &str) -> Result<ApiKey> {
        let row = sqlx::query_as::<_, DocRow>(
            r#"
            SELECT doc FROM api_keys
            WHERE id = $1 AND doc->>'document_status' = 'Active'
            "#,
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| Error::NotFound("api key not found".to_string()))?;

        parse_doc(row)
    }

    async fn find_api_key_by_mask_id(&self, mask_id: &str) -> Result<ApiKey> {
        let row = sqlx::query_as::<_, DocRow>(
            r#"
            SELECT doc FROM api_keys
            WHERE doc->>'mask_id' = $1 AND doc->>'document_status' = 'Active'
            "#,
        )
        .bind(mask_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| Error::NotFound("api key not found".to_string()))?;

        parse_doc(row)
    }

    async fn revoke_api_keys(&self, uids: &[String]) -> Result<()> {
        let now = to_doc(&Utc::now())?;
        sqlx::query(
            r#"
            UPDATE api_keys
            SET doc = jsonb_set(jsonb_set(doc, '{revoked_at}', $2), '{updated_at}', $2)
            WHERE id = ANY($1)
            "#,
        )
        .bind(uids)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn load_api_keys_paged(
        &self,
        pageable: Pageable,
    ) -> Result<(Vec<ApiKey>, PaginationData)> {
        let pageable = pageable.normalize();
        let offset = ((pageable.page - 1) * pageable.per_page) as i64;
        let order = if pageable.sort == 1 { "ASC" } else { "DESC" };

        let total: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM api_keys WHERE doc->>'document_status' = 'Active'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let rows = sqlx::query_as::<_, DocRow>(&format!(
            r#"
            SELECT doc FROM api_keys
            WHERE doc->>'document_status' = 'Active'
            ORDER BY (doc->>'created_at')::timestamptz {}
            LIMIT $1 OFFSET $2
            "#,
            order
        ))
        .bind(pageable.per_page as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok((
            parse_docs(rows)?,
            PaginationData::new(total as u64, pageable),
        ))
    }
}
