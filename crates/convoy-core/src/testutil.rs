//! In-memory repository fakes for service tests.
//!
//! Each fake stores entities in a map and can be told to fail a named
//! method, which stands in for the mock expectations the service tests
//! are written around.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::repository::{
    ApiKeyRepository, ApplicationRepository, EventDeliveryFilter, EventDeliveryRepository,
    EventRepository, GroupRepository,
};
use crate::types::{
    ApiKey, Application, DeliveryAttempt, EndpointStatus, Event, EventDelivery,
    EventDeliveryStatus, Group, GroupFilter, Pageable, PaginationData,
};

#[derive(Default)]
pub struct Fail {
    methods: Mutex<HashSet<&'static str>>,
}

impl Fail {
    pub fn set(&self, method: &'static str) {
        self.methods.lock().unwrap().insert(method);
    }

    fn check(&self, method: &'static str) -> Result<()> {
        if self.methods.lock().unwrap().contains(method) {
            return Err(Error::Transient(format!("{} failed", method)));
        }
        Ok(())
    }
}

fn page<T: Clone>(items: Vec<T>, pageable: Pageable) -> (Vec<T>, PaginationData) {
    let pageable = pageable.normalize();
    let total = items.len() as u64;
    let start = ((pageable.page - 1) * pageable.per_page) as usize;
    let page_items = items
        .into_iter()
        .skip(start)
        .take(pageable.per_page as usize)
        .collect();
    (page_items, PaginationData::new(total, pageable))
}

#[derive(Default)]
pub struct TestGroupRepo {
    pub groups: Mutex<HashMap<String, Group>>,
    pub fail: Fail,
}

#[async_trait]
impl GroupRepository for TestGroupRepo {
    async fn load_groups(&self, filter: &GroupFilter) -> Result<Vec<Group>> {
        self.fail.check("load_groups")?;
        let groups = self.groups.lock().unwrap();
        Ok(groups
            .values()
            .filter(|g| filter.names.is_empty() || filter.names.contains(&g.name))
            .cloned()
            .collect())
    }

    async fn fetch_group_by_id(&self, uid: &str) -> Result<Group> {
        self.fail.check("fetch_group_by_id")?;
        self.groups
            .lock()
            .unwrap()
            .get(uid)
            .cloned()
            .ok_or_else(|| Error::NotFound("group not found".to_string()))
    }

    async fn fetch_groups_by_ids(&self, uids: &[String]) -> Result<Vec<Group>> {
        self.fail.check("fetch_groups_by_ids")?;
        let groups = self.groups.lock().unwrap();
        Ok(uids.iter().filter_map(|id| groups.get(id).cloned()).collect())
    }

    async fn create_group(&self, group: &Group) -> Result<()> {
        self.fail.check("create_group")?;
        self.groups
            .lock()
            .unwrap()
            .insert(group.uid.clone(), group.clone());
        Ok(())
    }

    async fn update_group(&self, group: &Group) -> Result<()> {
        self.fail.check("update_group")?;
        self.groups
            .lock()
            .unwrap()
            .insert(group.uid.clone(), group.clone());
        Ok(())
    }

    async fn delete_group(&self, uid: &str) -> Result<()> {
        self.fail.check("delete_group")?;
        self.groups.lock().unwrap().remove(uid);
        Ok(())
    }
}

#[derive(Default)]
pub struct TestAppRepo {
    pub apps: Mutex<HashMap<String, Application>>,
    pub fail: Fail,
}

#[async_trait]
impl ApplicationRepository for TestAppRepo {
    async fn create_application(&self, app: &Application) -> Result<()> {
        self.fail.check("create_application")?;
        self.apps.lock().unwrap().insert(app.uid.clone(), app.clone());
        Ok(())
    }

    async fn update_application(&self, app: &Application) -> Result<()> {
        self.fail.check("update_application")?;
        self.apps.lock().unwrap().insert(app.uid.clone(), app.clone());
        Ok(())
    }

    async fn delete_application(&self, uid: &str) -> Result<()> {
        self.fail.check("delete_application")?;
        self.apps.lock().unwrap().remove(uid);
        Ok(())
    }

    async fn find_application_by_id(&self, uid: &str) -> Result<Application> {
        self.fail.check("find_application_by_id")?;
        self.apps
            .lock()
            .unwrap()
            .get(uid)
            .cloned()
            .ok_or_else(|| Error::NotFound("application not found".to_string()))
    }

    async fn load_applications_paged(
        &self,
        group_id: Option<&str>,
        pageable: Pageable,
    ) -> Result<(Vec<Application>, PaginationData)> {
        self.fail.check("load_applications_paged")?;
        let apps = self.apps.lock().unwrap();
        let items = apps
            .values()
            .filter(|a| group_id.is_none_or(|g| a.group_id == g))
            .cloned()
            .collect();
        Ok(page(items, pageable))
    }

    async fn count_group_applications(&self, group_id: &str) -> Result<u64> {
        self.fail.check("count_group_applications")?;
        let apps = self.apps.lock().unwrap();
        Ok(apps.values().filter(|a| a.group_id == group_id).count() as u64)
    }

    async fn delete_group_applications(&self, group_id: &str) -> Result<()> {
        self.fail.check("delete_group_applications")?;
        self.apps.lock().unwrap().retain(|_, a| a.group_id != group_id);
        Ok(())
    }

    async fn update_endpoint_status(
        &self,
        app_id: &str,
        endpoint_ids: &[String],
        status: EndpointStatus,
    ) -> Result<()> {
        self.fail.check("update_endpoint_status")?;
        let mut apps = self.apps.lock().unwrap();
        let app = apps
            .get_mut(app_id)
            .ok_or_else(|| Error::NotFound("application not found".to_string()))?;
        for endpoint in app.endpoints.iter_mut() {
            if endpoint_ids.contains(&endpoint.uid) {
                endpoint.status = status;
                endpoint.updated_at = Utc::now();
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct TestEventRepo {
    pub events: Mutex<HashMap<String, Event>>,
    pub fail: Fail,
}

#[async_trait]
impl EventRepository for TestEventRepo {
    async fn create_event(&self, event: &Event) -> Result<()> {
        self.fail.check("create_event")?;
        self.events
            .lock()
            .unwrap()
            .insert(event.uid.clone(), event.clone());
        Ok(())
    }

    async fn find_event_by_id(&self, uid: &str) -> Result<Event> {
        self.fail.check("find_event_by_id")?;
        self.events
            .lock()
            .unwrap()
            .get(uid)
            .cloned()
            .ok_or_else(|| Error::NotFound("event not found".to_string()))
    }

    async fn count_group_messages(&self, group_id: &str) -> Result<u64> {
        self.fail.check("count_group_messages")?;
        let events = self.events.lock().unwrap();
        Ok(events.values().filter(|e| e.group_id == group_id).count() as u64)
    }

    async fn delete_group_events(&self, group_id: &str) -> Result<()> {
        self.fail.check("delete_group_events")?;
        self.events
            .lock()
            .unwrap()
            .retain(|_, e| e.group_id != group_id);
        Ok(())
    }

    async fn load_events_paged(
        &self,
        group_id: &str,
        app_id: Option<&str>,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        pageable: Pageable,
    ) -> Result<(Vec<Event>, PaginationData)> {
        self.fail.check("load_events_paged")?;
        let events = self.events.lock().unwrap();
        let items = events
            .values()
            .filter(|e| e.group_id == group_id)
            .filter(|e| app_id.is_none_or(|a| e.app_id == a))
            .filter(|e| {
                range.is_none_or(|(start, end)| e.created_at >= start && e.created_at <= end)
            })
            .cloned()
            .collect();
        Ok(page(items, pageable))
    }
}

#[derive(Default)]
pub struct TestDeliveryRepo {
    pub deliveries: Mutex<HashMap<String, EventDelivery>>,
    pub fail: Fail,
}

#[async_trait]
impl EventDeliveryRepository for TestDeliveryRepo {
    async fn create_event_delivery(&self, delivery: &EventDelivery) -> Result<()> {
        self.fail.check("create_event_delivery")?;
        self.deliveries
            .lock()
            .unwrap()
            .insert(delivery.uid.clone(), delivery.clone());
        Ok(())
    }

    async fn find_event_delivery_by_id(&self, uid: &str) -> Result<EventDelivery> {
        self.fail.check("find_event_delivery_by_id")?;
        self.deliveries
            .lock()
            .unwrap()
            .get(uid)
            .cloned()
            .ok_or_else(|| Error::NotFound("event delivery not found".to_string()))
    }

    async fn find_event_deliveries_by_ids(&self, uids: &[String]) -> Result<Vec<EventDelivery>> {
        self.fail.check("find_event_deliveries_by_ids")?;
        let deliveries = self.deliveries.lock().unwrap();
        Ok(uids
            .iter()
            .filter_map(|id| deliveries.get(id).cloned())
            .collect())
    }

    async fn update_status_of_event_delivery(
        &self,
        uid: &str,
        from: &[EventDeliveryStatus],
        to: EventDeliveryStatus,
    ) -> Result<bool> {
        self.fail.check("update_status_of_event_delivery")?;
        let mut deliveries = self.deliveries.lock().unwrap();
        let Some(delivery) = deliveries.get_mut(uid) else {
            return Err(Error::NotFound("event delivery not found".to_string()));
        };
        if !from.contains(&delivery.status) {
            return Ok(false);
        }
        delivery.status = to;
        delivery.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_event_delivery(&self, delivery: &EventDelivery) -> Result<()> {
        self.fail.check("update_event_delivery")?;
        let mut deliveries = self.deliveries.lock().unwrap();
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
        self.fail.check("append_attempt")?;
        let mut deliveries = self.deliveries.lock().unwrap();
        let delivery = deliveries
            .get_mut(uid)
            .ok_or_else(|| Error::NotFound("event delivery not found".to_string()))?;
        delivery.attempts.push(attempt.clone());
        Ok(())
    }

    async fn load_deliveries_scheduled_before(
        &self,
        before: DateTime<Utc>,
        group_id: Option<&str>,
        limit: u64,
    ) -> Result<Vec<EventDelivery>> {
        self.fail.check("load_deliveries_scheduled_before")?;
        let deliveries = self.deliveries.lock().unwrap();
        let mut due: Vec<EventDelivery> = deliveries
            .values()
            .filter(|d| {
                matches!(
                    d.status,
                    EventDeliveryStatus::Scheduled | EventDeliveryStatus::Retry
                ) && d.metadata.next_send_time <= before
            })
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
        self.fail.check("load_event_deliveries_paged")?;
        let deliveries = self.deliveries.lock().unwrap();
        let items = deliveries
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
        Ok(page(items, pageable))
    }
}

#[derive(Default)]
pub struct TestApiKeyRepo {
    pub keys: Mutex<HashMap<String, ApiKey>>,
    pub fail: Fail,
}

#[async_trait]
impl ApiKeyRepository for TestApiKeyRepo {
    async fn create_api_key(&self, key: &ApiKey) -> Result<()> {
        self.fail.check("create_api_key")?;
        self.keys.lock().unwrap().insert(key.uid.clone(), key.clone());
        Ok(())
    }

    async fn update_api_key(&self, key: &ApiKey) -> Result<()> {
        self.fail.check("update_api_key")?;
        self.keys.lock().unwrap().insert(key.uid.clone(), key.clone());
        Ok(())
    }

    async fn find_api_key_by_id(&self, uid: &str) -> Result<ApiKey> {
        self.fail.check("find_api_key_by_id")?;
        self.keys
            .lock()
            .unwrap()
            .get(uid)
            .cloned()
            .ok_or_else(|| Error::NotFound("api key not found".to_string()))
    }

    async fn find_api_key_by_mask_id(&self, mask_id: &str) -> Result<ApiKey> {
        self.fail.check("find_api_key_by_mask_id")?;
        self.keys
            .lock()
            .unwrap()
            .values()
            .find(|k| k.mask_id == mask_id)
            .cloned()
            .ok_or_else(|| Error::NotFound("api key not found".to_string()))
    }

    async fn revoke_api_keys(&self, uids: &[String]) -> Result<()> {
        self.fail.check("revoke_api_keys")?;
        let mut keys = self.keys.lock().unwrap();
        for uid in uids {
            if let Some(key) = keys.get_mut(uid) {
                key.revoked_at = Some(Utc::now());
                key.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn load_api_keys_paged(
        &self,
        pageable: Pageable,
    ) -> Result<(Vec<ApiKey>, PaginationData)> {
        self.fail.check("load_api_keys_paged")?;
        let keys = self.keys.lock().unwrap();
        Ok(page(keys.values().cloned().collect(), pageable))
    }
}
