//! Repository back-ends for Convoy.
//!
//! `connect` picks a back-end from the configured DSN: `memory://` wires
//! the in-memory maps (tests, local development), anything else is handed
//! to the Postgres pool.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use convoy_core::error::Result;
use convoy_core::repository::{
    ApiKeyRepository, ApplicationRepository, EventDeliveryRepository, EventRepository,
    GroupRepository,
};

/// The full set of repositories a binary needs.
#[derive(Clone)]
pub struct Repositories {
    pub groups: Arc<dyn GroupRepository>,
    pub applications: Arc<dyn ApplicationRepository>,
    pub events: Arc<dyn EventRepository>,
    pub deliveries: Arc<dyn EventDeliveryRepository>,
    pub api_keys: Arc<dyn ApiKeyRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            groups: Arc::new(memory::InMemoryGroupRepository::new()),
            applications: Arc::new(memory::InMemoryApplicationRepository::new()),
            events: Arc::new(memory::InMemoryEventRepository::new()),
            deliveries: Arc::new(memory::InMemoryEventDeliveryRepository::new()),
            api_keys: Arc::new(memory::InMemoryApiKeyRepository::new()),
        }
    }
}

pub async fn connect(dsn: &str) -> Result<Repositories> {
    if dsn.starts_with("memory://") {
        return Ok(Repositories::in_memory());
    }

    let pool = postgres::connect(dsn).await?;
    Ok(Repositories {
        groups: Arc::new(postgres::PostgresGroupRepository::new(pool.clone())),
        applications: Arc::new(postgres::PostgresApplicationRepository::new(pool.clone())),
        events: Arc::new(postgres::PostgresEventRepository::new(pool.clone())),
        deliveries: Arc::new(postgres::PostgresEventDeliveryRepository::new(pool.clone())),
        api_keys: Arc::new(postgres::PostgresApiKeyRepository::new(pool)),
    })
}
