use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use convoy_core::error::{Error, Result};
use convoy_core::repository::EventRepository;
use convoy_core::types::{Event, Pageable, PaginationData};

use super::{map_sqlx_err, parse_doc, parse_docs, to_doc, DocRow};

pub struct PostgresEventRepository {
    pool: PgPool,
}

impl PostgresEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filters(
        qb: &mut sqlx::QueryBuilder<'_, sqlx::Postgres>,
        group_id: &str,
        app_id: Option<&str>,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) {
        qb.push(" AND doc->>'group_id' = ").push_bind(group_id.to_string());
        if let Some(app_id) = app_id {
            qb.push(" AND doc->>'app_id' = ").push_bind(app_id.to_string());
        }
        if let Some((start, end)) = range {
            qb.push(" AND (doc->>'created_at')::timestamptz >= ")
                .push_bind(start);
            qb.push(" AND (doc->>'created_at')::timestamptz <= ")
                .push_bind(end);
        }
    }
}

#[async_trait]
impl EventRepository for PostgresEventRepository {
    async fn create_event(&self, event: &Event) -> Result<()> {
        sqlx::query("INSERT INTO events (id, doc) VALUES ($1, $2)")
            .bind(&event.uid)
            .bind(to_doc(event)?)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_event_by_id(&self, uid: &str) -> Result<Event> {
        let row = sqlx::query_as::<_, DocRow>(
            r#"
            SELECT doc FROM events
            WHERE id = $1 AND doc->>'document_status' = 'Active'
            "#,
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or_else(|| Error::NotFound("event not found".to_string()))?;

        parse_doc(row)
    }

    async fn count_group_messages(&self, group_id: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT count(*) FROM events
            WHERE doc->>'document_status' = 'Active' AND doc->>'group_id' = $1
            "#,
        )
        .bind(group_id)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(count as u64)
    }

    async fn delete_group_events(&self, group_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE events
            SET doc = jsonb_set(doc, '{document_status}', '"Deleted"')
            WHERE doc->>'group_id' = $1
            "#,
        )
        .bind(group_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn load_events_paged(
        &self,
        group_id: &str,
        app_id: Option<&str>,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        pageable: Pageable,
    ) -> Result<(Vec<Event>, PaginationData)> {
        let pageable = pageable.normalize();
        let offset = ((pageable.page - 1) * pageable.per_page) as i64;
        let order = if pageable.sort == 1 { "ASC" } else { "DESC" };

        let mut count_qb = sqlx::QueryBuilder::new(
            "SELECT count(*) FROM events WHERE doc->>'document_status' = 'Active'",
        );
        Self::push_filters(&mut count_qb, group_id, app_id, range);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let mut qb = sqlx::QueryBuilder::new(
            "SELECT doc FROM events WHERE doc->>'document_status' = 'Active'",
        );
        Self::push_filters(&mut qb, group_id, app_id, range);
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
}
