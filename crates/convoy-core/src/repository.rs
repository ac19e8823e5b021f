//! Repository contracts.
//!
//! Services and the dispatch engine only ever see these traits; the
//! concrete back-ends live in `convoy-db`. Methods return the shared error
//! taxonomy, where `NotFound`, `Conflict`, `Transient` and `Invalid` are
//! the kinds a back-end is expected to surface. Cancellation is by
//! dropping the returned future.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    ApiKey, Application, DeliveryAttempt, EndpointStatus, Event, EventDelivery,
    EventDeliveryStatus, Group, GroupFilter, Pageable, PaginationData,
};

#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn load_groups(&self, filter: &GroupFilter) -> Result<Vec<Group>>;
    async fn fetch_group_by_id(&self, uid: &str) -> Result<Group>;
    /// Missing ids are skipped, not errors; callers compare lengths.
    async fn fetch_groups_by_ids(&self, uids: &[String]) -> Result<Vec<Group>>;
    async fn create_group(&self, group: &Group) -> Result<()>;
    async fn update_group(&self, group: &Group) -> Result<()>;
    async fn delete_group(&self, uid: &str) -> Result<()>;
}

#[async_trait]
pub trait ApplicationRepository: Send + Sync {
    async fn create_application(&self, app: &Application) -> Result<()>;
    async fn update_application(&self, app: &Application) -> Result<()>;
    async fn delete_application(&self, uid: &str) -> Result<()>;
    async fn find_application_by_id(&self, uid: &str) -> Result<Application>;
    async fn load_applications_paged(
        &self,
        group_id: Option<&str>,
        pageable: Pageable,
    ) -> Result<(Vec<Application>, PaginationData)>;
    async fn count_group_applications(&self, group_id: &str) -> Result<u64>;
    async fn delete_group_applications(&self, group_id: &str) -> Result<()>;
    /// Flip the status of the given endpoints of one application.
    async fn update_endpoint_status(
        &self,
        app_id: &str,
        endpoint_ids: &[String],
        status: EndpointStatus,
    ) -> Result<()>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn create_event(&self, event: &Event) -> Result<()>;
    async fn find_event_by_id(&self, uid: &str) -> Result<Event>;
    async fn count_group_messages(&self, group_id: &str) -> Result<u64>;
    async fn delete_group_events(&self, group_id: &str) -> Result<()>;
    async fn load_events_paged(
        &self,
        group_id: &str,
        app_id: Option<&str>,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
        pageable: Pageable,
    ) -> Result<(Vec<Event>, PaginationData)>;
}

/// Filters accepted by the delivery listing.
#[derive(Debug, Clone, Default)]
pub struct EventDeliveryFilter {
    pub group_id: Option<String>,
    pub app_id: Option<String>,
    pub event_id: Option<String>,
    pub status: Option<Vec<EventDeliveryStatus>>,
}

#[async_trait]
pub trait EventDeliveryRepository: Send + Sync {
    async fn create_event_delivery(&self, delivery: &EventDelivery) -> Result<()>;
    async fn find_event_delivery_by_id(&self, uid: &str) -> Result<EventDelivery>;
    async fn find_event_deliveries_by_ids(&self, uids: &[String]) -> Result<Vec<EventDelivery>>;
    /// Conditional status update: succeeds (returns `true`) only when the
    /// stored status is one of `from`. This is the workers' claim
    /// primitive and must be linearizable.
    async fn update_status_of_event_delivery(
        &self,
        uid: &str,
        from: &[EventDeliveryStatus],
        to: EventDeliveryStatus,
    ) -> Result<bool>;
    /// Persist status, metadata and description of an owned delivery.
    async fn update_event_delivery(&self, delivery: &EventDelivery) -> Result<()>;
    async fn append_attempt(&self, uid: &str, attempt: &DeliveryAttempt) -> Result<()>;
    /// Due rows: status in {Scheduled, Retry} with
    /// `metadata.next_send_time <= before`, oldest first.
    async fn load_deliveries_scheduled_before(
        &self,
        before: DateTime<Utc>,
        group_id: Option<&str>,
        limit: u64,
    ) -> Result<Vec<EventDelivery>>;
    async fn load_event_deliveries_paged(
        &self,
        filter: &EventDeliveryFilter,
        pageable: Pageable,
    ) -> Result<(Vec<EventDelivery>, PaginationData)>;
}

#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn create_api_key(&self, key: &ApiKey) -> Result<()>;
    async fn update_api_key(&self, key: &ApiKey) -> Result<()>;
    async fn find_api_key_by_id(&self, uid: &str) -> Result<ApiKey>;
    async fn find_api_key_by_mask_id(&self, mask_id: &str) -> Result<ApiKey>;
    async fn revoke_api_keys(&self, uids: &[String]) -> Result<()>;
    async fn load_api_keys_paged(
        &self,
        pageable: Pageable,
    ) -> Result<(Vec<ApiKey>, PaginationData)>;
}
