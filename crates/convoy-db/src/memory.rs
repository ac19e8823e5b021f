//! In-memory repository back-ends.
//!
//! Used by tests and by deployments running with `database.dsn =
//! "memory://"`. Semantics mirror the Postgres back-end: soft deletes via
//! `document_status`, name uniqueness for groups, creation-time ordering
//! for lists.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use convoy_core::error::{Error, Result};
use convoy_core::repository::{
    ApiKeyRepository, ApplicationRepository, EventDeliveryFilter, EventDeliveryRepository,
    EventRepository, GroupRepository,
};
use convoy_core::types::{
    ApiKey, Application, DeliveryAttempt, DocumentStatus, EndpointStatus, Event, EventDelivery,
    EventDeliveryStatus, Group, GroupFilter, Pageable, PaginationData,
};

fn paginate<T>(
    mut items: Vec<T>,
    pageable: Pageable,
    created_at: impl Fn(&T) -> DateTime<Utc>,
) -> (Vec<T>, PaginationData) {
    let pageable = pageable.normalize();
    if pageable.sort == 1 {
        items.sort_by_key(&created_at);
    } else {
        items.sort_by_key(|item| std::cmp::Reverse(created_at(item)));
    }
    let total = items.len() as u64;
    let start = ((pageable.page - 1) * pageable.per_page) as usize;
    let page: Vec<T> = items
        .into_iter()
        .skip(start)
        .take(pageable.per_page as usize)
        .collect();
    (page, PaginationData::new(total, pageable))
}

#[derive(Default)]
pub struct InMemoryGroupRepository {
    groups: RwLock<HashMap<String, Group>>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GroupRepository for InMemoryGroupRepository {
    async fn load_groups(&self, filter: &GroupFilter) -> Result<Vec<Group>> {
        let groups = self.groups.read().await;
        let mut found: Vec<Group> = groups
            .values()
            .filter(|g| g.document_status == DocumentStatus::Active)
            .filter(|g| filter.names.is_empty() || filter.names.contains(&g.name))
            .cloned()
            .collect();
        found.sort_by_key(|g| g.created_at);
        Ok(found)
    }

    async fn fetch_group_by_id(&self, uid: &str) -> Result<Group> {
        let groups = self.groups.read().await;
        groups
            .get(uid)
            .filter(|g| g.document_status == DocumentStatus::Active)
            .cloned()
            .ok_or_else(|| Error::NotFound("group not found".to_string()))
    }

    async fn fetch_groups_by_ids(&self, uids: &[String]) -> Result<Vec<Group>> {
        let groups = self.groups.read().await;
        Ok(uids
            .iter()
            .filter_map(|uid| groups.get(uid))
            .filter(|g| g.document_status == DocumentStatus::Active)
            .cloned()
            .collect())
    }

    async fn create_group(&self, group: &Group) -> Result<()> {
        let mut groups = self.groups.write().await;
        let duplicate = groups
            .values()
            .any(|g| g.document_status == DocumentStatus::Active && g.name == group.name);
        if duplicate {
            return Err(Error::Conflict(
                "a group with this name already exists".to_string(),
            ));
        }
        groups.insert(group.uid.clone(), group.clone());
        Ok(())
    }

    async fn update_group(&self, group: &Group) -> Result<()> {
        let mut groups = self.groups.write().await;
        if !groups.contains_key(&group.uid) {
            return Err(Error::NotFound("group not found".to_string()));
        }
        groups.insert(group.uid.clone(), group.clone());
        Ok(())
    }

    async fn delete_group(&self, uid: &str) -> Result<()> {
        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(uid)
            .ok_or_else(|| Error::NotFound("group not found".to_string()))?;
        group.document_status = DocumentStatus::Deleted;
        group.deleted_at = Some(Utc::now());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryApplicationRepository {
    apps: RwLock<HashMap<String, Application>>,
}

impl InMemoryApplicationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApplicationRepository for InMemoryApplicationRepository {
    async fn create_application(&self, app: &Application) -> Result<()> {
        self.apps.write().await.insert(app.uid.clone(), app.clone());
        Ok(())
    }

    async fn update_application(&self, app: &Application) -> Result<()> {
        let mut apps = self.apps.write().await;
        if !apps.contains_key(&app.uid) {
            return Err(Error::NotFound("application not found".to_string()));
        }
        apps.insert(app.uid.clone(), app.clone());
        Ok(())
    }

    async fn delete_application(&self, uid: &str) -> Result<()> {
        let mut apps = self.apps.write().await;
        let app = apps
            .get_mut(uid)
            .ok_or_else(|| Error::NotFound("application not found".to_string()))?;
        app.document_status = DocumentStatus::Deleted;
        app.deleted_at = Some(Utc::now());
        Ok(())
    }

    async fn find_application_by_id(&self, uid: &str) -> Result<Application> {
        let apps = self.apps.read().await;
        apps.get(uid)
            .filter(|a| a.document_status == DocumentStatus::Active)
            .cloned()
            .ok_or_else(|| Error::NotFound("application not found".to_string()))
    }

    async fn load_applications_paged(
        &self,
        group_id: Option<&str>,
        pageable: Pageable,
    ) -> Result<(Vec<Application>, PaginationData)> {
        let apps = self.apps.read().await;
        let items: Vec<Application> = apps
            .values()
            .filter(|a| a.document_status == DocumentStatus::Active)
            .filter(|a| group_id.is_none_or(|g| a.group_id == g))
            .cloned()
            .collect();
        Ok(paginate(items, pageable, |a| a.created_at))
    }

    async fn count_group_applications(&self, group_id: &str) -> Result<u64> {
        let apps = self.apps.read().await;
        Ok(apps
            .values()
            .filter(|a| a.document_status == DocumentStatus::Active && a.group_id == group_id)
            .count() as u64)
    }

    async fn delete_group_applications(&self, group_id: &str) -> Result<()> {
        let mut apps = self.apps.write().await;
        let now = Utc::now();
        for app in apps.values_mut().filter(|a| a.group_id == group_id) {
            app.document_status = DocumentStatus::Deleted;
            app.deleted_at = Some(now);
        }
        Ok(())
    }

    async fn update_endpoint_status(
        &self,
        app_id: &str,
        endpoint_ids: &[String],
        status: EndpointStatus,
    ) -> Result<()> {
        let mut apps = self.apps.write().await;
        let app = apps
            .get_mut(app_id)
            .ok_or_else(|| Error::NotFound("application not found".to_string()))?;
        let now = Utc::now();
        for endpoint in app.endpoints.iter_mut() {
            if endpoint_ids.contains(&endpoint.uid) {
                endpoint.status = status;
                endpoint.updated_at = now;
            }
        }
        app.updated_at = now;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryEventRepository {
    events: RwLock<HashMap<String, Event>>,
}

impl InMemoryEventRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn create_event(&self, event: &Event) -> Result<()> {
        self.events
            .write()
            .await
            .insert(event.uid.clone(), event.clone());
        Ok(())
    }

    async fn find_event_by_id(&self, uid: &str) -> Result<Event> {
        let events = self.events.read().await;
        events
            .get(uid)
            .filter(|e| e.document_status == DocumentStatus::Active)
            .cloned()
            .ok_or_else(|| Error::NotFound("event not found".to_string()))
    }

    async fn count_group_messages(&self, group_id: &str) -> Result<u64> {
        let events = self.events.read().await;
        Ok(events
            .values()
            .filter(|e| e.document_status == DocumentStatus::Active && e.group_id == group_id)
            .count() as u64)
    }

    async fn delete_group_events(&self, group_id: &str) -> Result<()> {
        let mut events = self.events.write().await;
        for event in events.values_mut().filter(|e| e.group_id == group_id) {
            event.document_status = DocumentStatus::Deleted;
        }
        Ok(())
    }

    async fn load_events_paged(
        &self,
        group_id: &str,
        app_id: Option<&str>,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        pageable: Pageable,
    ) -> Result<(Vec<Event>, PaginationData)> {
        let events = self.events.read().await;
        let items: Vec<Event> = events
            .values()
            .filter(|e| e.document_status == DocumentStatus::Active)
            .filter(|e| e.group_id == group_id)
            .filter(|e| app_id.is_none_or(|a| e.app_id == a))
            .filter(|e| {
                range.is_none_or(|(start, end)| e.created_at >= start && e.created_at <= end)
            })
            .cloned()
            .collect();
        Ok(paginate(items, pageable, |e| e.created_at))
    }
}

#[derive(Default)]
pub struct InMemoryEventDeliveryRepository {
    deliveries: RwLock<HashMap<String, EventDelivery>>,
}

impl InMemoryEventDeliveryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventDeliveryRepository for InMemoryEventDeliveryRepository {
    async fn create_event_delivery(&self, delivery: &EventDelivery) -> Result<()> {
        self.deliveries
            .write()
            .await
            .insert(delivery.uid.clone(), delivery.clone());
        Ok(())
    }

    async fn find_event_delivery_by_id(&self, uid: &str) -> Result<EventDelivery> {
        let deliveries = self.deliveries.read().await;
        deliveries
            .get(uid)
            .cloned()
            .ok_or_else(|| Error::NotFound("event delivery not found".to_string()))
    }

    async fn find_event_deliveries_by_ids(&self, uids: &[String]) -> Result<Vec<EventDelivery>> {
        let deliveries = self.deliveries.read().await;
        Ok(uids
            .iter()
            .filter_map(|uid| deliveries.get(uid).cloned())
            .collect())
    }

    async fn update_status_of_event_delivery(
        &self,
        uid: &str,
        from: &[EventDeliveryStatus],
        to: EventDeliveryStatus,
    ) -> Result<bool> {
        // The write lock makes the compare-and-set linearizable; this is
        // the only coordination point between dispatch workers.
        let mut deliveries = self.deliveries.write().await;
        let delivery = deliveries
            .get_mut(uid)
            .ok_or_else(|| Error::NotFound("event delivery not found".to_string()))?;
        if !from.contains(&delivery.status) {
            return Ok(false);
        }
        delivery.status = to;
        delivery.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_event_delivery(&self, delivery: &EventDelivery) -> Result<()> {
        // Only status, metadata and description are owned by callers; the
        // attempt ledger is append-only via append_attempt.
        let mut deliveries = self.deliveries.write().await;
        let stored = deliveries
            .get_mut(&delivery.uid)
            .ok_or_else(|| Error::NotFound("event delivery not found".to_string()))?;
        stored.status = delivery.status;
        stored.metadata = delivery.metadata.clone();
        stored.description = delivery.description.clone();
        stored.updated_at = delivery.updated_at;
        Ok(())
    }

    async fn append_attempt(&self, uid: &str, attempt: &DeliveryAttempt) -> Result<()> {
        let mut deliveries = self.deliveries.write().await;
        let delivery = deliveries
            .get_mut(uid)
            .ok_or_else(|| Error::NotFound("event delivery not found".to_string()))?;
        delivery.attempts.push(attempt.clone());
        delivery.updated_at = Utc::now();
        Ok(())
    }

    async fn load_deliveries_scheduled_before(
        &self,
        before: DateTime<Utc>,
        group_id: Option<&str>,
        limit: u64,
    ) -> Result<Vec<EventDelivery>> {
        let deliveries = self.deliveries.read().await;
        let mut due: Vec<EventDelivery> = deliveries
            .values()
            .filter(|d| {
                matches!(
                    d.status,
                    EventDeliveryStatus::Scheduled | EventDeliveryStatus::Retry
                )
            })
            .filter(|d| d.metadata.next_send_time <= before)
            .filter(|d| group_id.is_none_or(|g| d.group_id == g))
            .cloned()
            .collect();
        due.sort_by_key(|d| d.metadata.next_send_time);
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn load_event_deliveries_paged(
        &self,
        filter: &EventDeliveryFilter,
        pageable: Pageable,
    ) -> Result<(Vec<EventDelivery>, PaginationData)> {
        let deliveries = self.deliveries.read().await;
        let items: Vec<EventDelivery> = deliveries
            .values()
            .filter(|d| filter.group_id.as_deref().is_none_or(|g| d.group_id == g))
            .filter(|d| filter.app_id.as_deref().is_none_or(|a| d.app_id == a))
            .filter(|d| filter.event_id.as_deref().is_none_or(|e| d.event_id == e))
            .filter(|d| {
                filter
                    .status
                    .as_ref()
                    .is_none_or(|statuses| statuses.contains(&d.status))
            })
            .cloned()
            .collect();
        Ok(paginate(items, pageable, |d| d.created_at))
    }
}

#[derive(Default)]
pub struct InMemoryApiKeyRepository {
    keys: RwLock<HashMap<String, ApiKey>>,
}

impl InMemoryApiKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryApiKeyRepository {
    async fn create_api_key(&self, key: &ApiKey) -> Result<()> {
        let mut keys = self.keys.write().await;
        if keys.values().any(|k| k.mask_id == key.mask_id) {
            return Err(Error::Conflict("mask id already exists".to_string()));
        }
        keys.insert(key.uid.clone(), key.clone());
        Ok(())
    }

    async fn update_api_key(&self, key: &ApiKey) -> Result<()> {
        let mut keys = self.keys.write().await;
        if !keys.contains_key(&key.uid) {
            return Err(Error::NotFound("api key not found".to_string()));
        }
        keys.insert(key.uid.clone(), key.clone());
        Ok(())
    }

    async fn find_api_key_by_id(&self, uid: &str) -> Result<ApiKey> {
        let keys = self.keys.read().await;
        keys.get(uid)
            .filter(|k| k.document_status == DocumentStatus::Active)
            .cloned()
            .ok_or_else(|| Error::NotFound("api key not found".to_string()))
    }

    async fn find_api_key_by_mask_id(&self, mask_id: &str) -> Result<ApiKey> {
        let keys = self.keys.read().await;
        keys.values()
            .find(|k| k.mask_id == mask_id && k.document_status == DocumentStatus::Active)
            .cloned()
            .ok_or_else(|| Error::NotFound("api key not found".to_string()))
    }

    async fn revoke_api_keys(&self, uids: &[String]) -> Result<()> {
        let mut keys = self.keys.write().await;
        let now = Utc::now();
        for uid in uids {
            if let Some(key) = keys.get_mut(uid) {
                key.revoked_at = Some(now);
                key.updated_at = now;
            }
        }
        Ok(())
    }

    async fn load_api_keys_paged(
        &self,
        pageable: Pageable,
    ) -> Result<(Vec<ApiKey>, PaginationData)> {
        let keys = self.keys.read().await;
        let items: Vec<ApiKey> = keys
            .values()
            .filter(|k| k.document_status == DocumentStatus::Active)
            .cloned()
            .collect();
        Ok(paginate(items, pageable, |k| k.created_at))
    }
}
