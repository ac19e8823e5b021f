use std::sync::Arc;
use std::time::Duration;

use convoy_core::auth::{BasicRealm, JwtRealm, NoopRealm, Realm, RealmChain};
use convoy_core::cache::Cache;
use convoy_core::config::Config;
use convoy_core::services::delivery::DeliveryService;
use convoy_core::services::group::GroupService;
use convoy_core::services::ingest::IngestService;
use convoy_core::services::security::SecurityService;
use convoy_db::Repositories;

use crate::middleware::auth::NativeRealm;

#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub groups: Arc<GroupService>,
    pub security: Arc<SecurityService>,
    pub ingest: Arc<IngestService>,
    pub deliveries: Arc<DeliveryService>,
    pub realm_chain: Arc<RealmChain>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, repos: Repositories) -> Self {
        let cache = Arc::new(Cache::new());
        let cache_ttl = Duration::from_secs(config.cache.ttl_seconds);

        let groups = Arc::new(GroupService::new(
            repos.groups.clone(),
            repos.applications.clone(),
            repos.events.clone(),
            cache.clone(),
            cache_ttl,
        ));
        let security = Arc::new(SecurityService::new(
            repos.groups.clone(),
            repos.api_keys.clone(),
        ));
        let ingest = Arc::new(IngestService::new(
            repos.events.clone(),
            repos.deliveries.clone(),
            cache.clone(),
        ));
        let deliveries = Arc::new(DeliveryService::new(
            repos.deliveries.clone(),
            repos.applications.clone(),
        ));

        let realm_chain = Arc::new(build_realm_chain(&config, security.clone()));

        Self {
            repos,
            groups,
            security,
            ingest,
            deliveries,
            realm_chain,
            config: Arc::new(config),
        }
    }
}

/// Assemble realms in configuration order. Unknown names are rejected at
/// config load, so this only sees supported ones.
fn build_realm_chain(config: &Config, security: Arc<SecurityService>) -> RealmChain {
    let mut realms: Vec<Arc<dyn Realm>> = Vec::new();
    for name in &config.auth.realms {
        match name.as_str() {
            "noop" => realms.push(Arc::new(NoopRealm)),
            "basic" => realms.push(Arc::new(BasicRealm::new(config.auth.basic.clone()))),
            "jwt" => {
                if let Some(jwt) = &config.auth.jwt {
                    realms.push(Arc::new(JwtRealm::new(jwt.secret.clone())));
                }
            }
            "native" => realms.push(Arc::new(NativeRealm::new(security.clone()))),
            _ => {}
        }
    }
    RealmChain::new(realms)
}
