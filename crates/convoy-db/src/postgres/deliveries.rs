use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use convoy_core::error::{Error, Result};
use convoy_core::repository::{EventDeliveryFilter, EventDeliveryRepository};
use convoy_core::types::{
    DeliveryAttempt, EventDelivery, EventDeliveryStatus, Pageable, PaginationData,
};

use super::{map_sqlx_err, parse_doc, parse_docs, to_doc, DocRow};

pub struct PostgresEventDeliveryRepository {
    pool: PgPool,
}

impl PostgresEventDeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_filters(
        qb: &mut sqlx::QueryBuilder<'_, sqlx::Postgres>,
        filter: &EventDeliveryFilter,
    ) {
        if let Some(group_id) = &filter.group_id {
            qb.push(" AND doc->>'group_id' = ").push_bind(group_id.clone());
        }
        if let Some(app_id) = &filter.app_id {
            qb.push(" AND doc->>'app_id' = ").push_bind(app_id.clone());
        }
        if let Some(event_id) = &filter.event_id {
            qb.push(" AND doc->>'event_id' = ").push_bind(event_id.clone());
        }
        if let Some(statuses) = &filter.status {
            let statuses: Vec<String> =
                statuses.iter().map(|s| s.as_str().to_string()).collect();
            qb.push(" AND doc->>'status' = ANY(").push_bind(statuses).push(")");
        }
    }
}

#[async_trait]
impl EventDeliveryRepository for PostgresEventDeliveryRepository {
    async fn create_event_delivery(&self, delivery: &EventDelivery) -> Result<()> {
        sqlx::query("INSERT INTO event_deliveries (id, doc) VALUES ($1, $2)")
            .bind(&delivery.uid)
            .bind(to_doc(delivery)?)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn find_event_delivery_by_id(&self, uid: &str) -> Result<EventDelivery> {
        let row = sqlx::query_as::<_, DocRow>("SELECT doc FROM event_deliveries WHERE id = $1")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .ok_or_else(|| Error::NotFound("event delivery not found".to_string()))?;

        parse_doc(row)
    }

    async fn find_event_deliveries_by_ids(&self, uids: &[String]) -> Result<Vec<EventDelivery>> {
        let rows = sqlx::query_as::<_, DocRow>(
            "SELECT doc FROM event_deliveries WHERE id = ANY($1)",
        )
        .bind(uids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        parse_docs(rows)
    }

    async fn update_status_of_event_delivery(
        &self,
        uid: &str,
        from: &[EventDeliveryStatus],
        to: EventDeliveryStatus,
    ) -> Result<bool> {
        // Single conditional UPDATE; Postgres row locking makes this the
        // linearizable claim primitive the dispatch workers rely on.
        let from: Vec<String> = from.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query(
            r#"
            UPDATE event_deliveries
            SET doc = jsonb_set(jsonb_set(doc, '{status}', $3), '{updated_at}', $4)
            WHERE id = $1 AND doc->>'status' = ANY($2)
            "#,
        )
        .bind(uid)
        .bind(&from)
        .bind(to_doc(&to)?)
        .bind(to_doc(&Utc::now())?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_event_delivery(&self, delivery: &EventDelivery) -> Result<()> {
        // The attempt ledger is append-only via append_attempt, so this
        // writes everything except `attempts`.
        let result = sqlx::query(
            r#"
            UPDATE event_deliveries
            SET doc = jsonb_set(jsonb_set(jsonb_set(jsonb_set(doc,
                '{status}', $2),
                '{metadata}', $3),
                '{description}', $4),
                '{updated_at}', $5)
            WHERE id = $1
            "#,
        )
        .bind(&delivery.uid)
        .bind(to_doc(&delivery.status)?)
        .bind(to_doc(&delivery.metadata)?)
        .bind(to_doc(&delivery.description)?)
        .bind(to_doc(&delivery.updated_at)?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("event delivery not found".to_string()));
        }
        Ok(())
    }

    async fn append_attempt(&self, uid: &str, attempt: &DeliveryAttempt) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE event_deliveries
            SET doc = jsonb_set(doc, '{attempts}',
                coalesce(doc->'attempts', '[]'::jsonb) || $2)
            WHERE id = $1
            "#,
        )
        .bind(uid)
        .bind(to_doc(attempt)?)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::NotFound("event delivery not found".to_string()));
        }
        Ok(())
    }

    async fn load_deliveries_scheduled_before(
        &self,
        before: DateTime<Utc>,
        group_id: Option<&str>,
        limit: u64,
    ) -> Result<Vec<EventDelivery>> {
        let mut qb = sqlx::QueryBuilder::new(
            "SELECT doc FROM event_deliveries \
             WHERE doc->>'status' IN ('Scheduled', 'Retry') \
             AND (doc->'metadata'->>'next_send_time')::timestamptz <= ",
        );
        qb.push_bind(before);
        if let Some(group_id) = group_id {
            qb.push(" AND doc->>'group_id' = ").push_bind(group_id.to_string());
        }
        qb.push(" ORDER BY (doc->'metadata'->>'next_send_time')::timestamptz ASC LIMIT ");
        qb.push_bind(limit as i64);

        let rows: Vec<DocRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        parse_docs(rows)
    }

    async fn load_event_deliveries_paged(
        &self,
        filter: &EventDeliveryFilter,
        pageable: Pageable,
    ) -> Result<(Vec<EventDelivery>, PaginationData)> {
        let pageable = pageable.normalize();
        let offset = ((pageable.page - 1) * pageable.per_page) as i64;
        let order = if pageable.sort == 1 { "ASC" } else { "DESC" };

        let mut count_qb =
            sqlx::QueryBuilder::new("SELECT count(*) FROM event_deliveries WHERE TRUE");
        Self::push_filters(&mut count_qb, filter);
        let total: i64 = count_qb
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let mut qb = sqlx::QueryBuilder::new("SELECT doc FROM event_deliveries WHERE TRUE");
        Self::push_filters(&mut qb, filter);
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
