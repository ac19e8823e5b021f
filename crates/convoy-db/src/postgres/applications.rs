use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use convoy_core::error::{Error, Result};
use convoy_core::repository::ApplicationRepository;
use convoy_core::types::{Application, EndpointStatus, Pageable, PaginationData};

use super::{map_sqlx_err, parse_doc, parse_docs, to_doc, DocRow};

pub struct PostgresApplicationRepository {
    pool: PgPool,
}

impl PostgresApplicationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApplicationRepository for PostgresApplicationRepository {
    async fn create_application(&self, app: &Application) -> Result<()> {
        sqlx::query("INSERT INTO applications (id, doc) VALUES ($1, $2)")
            .bind(&app.uid)
            .bind(to_doc(app)?)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn update_application(&self, app: &Application) -> Result<()> {
        let result = sqlx::query("UPDATE applications SET doc = $2 WHERE id = $1")
            .bind(&app.uid)
            .bind(to_doc(app)?)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("application not found".to_string()));
        }
        Ok(())
    }

    async fn delete_application(&self, uid: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE applications
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
            return Err(Error::NotFound("application not found".to_string()));
        }
        Ok(())
    }

    async fn find_application_by_id(&self, uid: &str) -> Result<Application> {
        let row = sqlx::query_as::<_, DocRow>(
            r#"
            SELECT doc FROM applications
            WHERE id = $1 AND doc->>'document_status' = 'Active'
            "#,
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| Error::NotFound("application not found".to_string()))?;

        parse_doc(row)
    }

    async fn load_applications_paged(
        &self,
        group_id: Option<&str>,
        pageable: Pageable,
    ) -> Result<(Vec<Application>, PaginationData)> {
        let pageable = pageable.normalize();
        let offset = ((pageable.page - 1) * pageable.per_page) as i64;
        let order = if pageable.sort == 1 { "ASC" } else { "DESC" };

        let mut count_qb = sqlx::QueryBuilder::new(
            "SELECT count(*) FROM applications WHERE doc->>'document_status' = 'Active'",
        );
        if let Some(group_id) = group_id {
            count_qb.push(" AND doc->>'group_id' = ").push_bind(group_id);
        }
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let mut qb = sqlx::QueryBuilder::new(
            "SELECT doc FROM applications WHERE doc->>'document_status' = 'Active'",
        );
        if let Some(group_id) = group_id {
            qb.push(" AND doc->>'group_id' = ").push_bind(group_id);
        }
        qb.push(format!(
            " ORDER BY (doc->>'created_at')::timestamptz {} LIMIT ",
            order
        ));
        qb.push_bind(pageable.per_page as i64);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows: Vec<DocRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        Ok((
            parse_docs(rows)?,
            PaginationData::new(total as u64, pageable),
        ))
    }

    async fn count_group_applications(&self, group_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*) FROM applications
            WHERE doc->>'document_status' = 'Active' AND doc->>'group_id' = $1
            "#,
        )
        .bind(group_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(count as u64)
    }

    async fn delete_group_applications(&self, group_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE applications
            SET doc = jsonb_set(
                jsonb_set(doc, '{document_status}', '"Deleted"'),
                '{deleted_at}', $2)
            WHERE doc->>'group_id' = $1
            "#,
        )
        .bind(group_id)
        .bind(to_doc(&Utc::now())?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn update_endpoint_status(
        &self,
        app_id: &str,
        endpoint_ids: &[String],
        status: EndpointStatus,
    ) -> Result<()> {
        // Read-modify-write under a row lock; endpoint arrays are small
        // and status flips are rare compared to delivery traffic.
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let row = sqlx::query_as::<_, DocRow>(
            "SELECT doc FROM applications WHERE id = $1 FOR UPDATE",
        )
        .bind(app_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| Error::NotFound("application not found".to_string()))?;

        let mut app: Application = parse_doc(row)?;
        let now = Utc::now();
        for endpoint in app.endpoints.iter_mut() {
            if endpoint_ids.contains(&endpoint.uid) {
                endpoint.status = status;
                endpoint.updated_at = now;
            }
        }
        app.updated_at = now;

        sqlx::query("UPDATE applications SET doc = $2 WHERE id = $1")
            .bind(app_id)
            .bind(to_doc(&app)?)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(())
    }
}
