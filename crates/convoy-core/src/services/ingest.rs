//! Event ingestion: validate, dedup, persist, fan out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::error;

use crate::cache::Cache;
use crate::config::parse_duration;
use crate::error::{Error, Result};
use crate::repository::{EventDeliveryRepository, EventRepository};
use crate::types::{
    self, Application, DeliveryMetadata, DocumentStatus, Event, EventDelivery,
    EventDeliveryStatus, Group,
};

pub struct IngestService {
    event_repo: Arc<dyn EventRepository>,
    delivery_repo: Arc<dyn EventDeliveryRepository>,
    cache: Arc<Cache>,
}

impl IngestService {
    pub fn new(
        event_repo: Arc<dyn EventRepository>,
        delivery_repo: Arc<dyn EventDeliveryRepository>,
        cache: Arc<Cache>,
    ) -> Self {
        Self {
            event_repo,
            delivery_repo,
            cache,
        }
    }

    /// Accept an inbound event for `app` and materialize one Scheduled
    /// delivery per active endpoint.
    pub async fn create_event(
        &self,
        group: &Group,
        app: &Application,
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<Event> {
        if event_type.trim().is_empty() {
            return Err(Error::Invalid(
                "event_type:please provide a valid event type".to_string(),
            ));
        }

        let active: Vec<_> = app.active_endpoints().cloned().collect();
        if app.is_disabled || active.is_empty() {
            return Err(Error::Invalid("app has no valid endpoints".to_string()));
        }

        if group.config.replay_attacks {
            self.reject_replayed(group, app, &data).await?;
        }

        let now = Utc::now();
        let event = Event {
            uid: types::uid(),
            event_type: event_type.to_string(),
            matched_endpoints: active.len() as u32,
            group_id: group.uid.clone(),
            app_id: app.uid.clone(),
            data,
            created_at: now,
            document_status: DocumentStatus::Active,
        };

        self.event_repo.create_event(&event).await.map_err(|e| {
            error!(error = %e, app = %app.uid, "could not create event");
            Error::Internal("failed to create event".to_string())
        })?;

        for endpoint in &active {
            let delivery = EventDelivery {
                uid: types::uid(),
                group_id: group.uid.clone(),
                app_id: app.uid.clone(),
                event_id: event.uid.clone(),
                endpoint_id: endpoint.uid.clone(),
                status: EventDeliveryStatus::Scheduled,
                metadata: DeliveryMetadata {
                    num_trials: 0,
                    retry_limit: group.config.strategy.default.retry_limit,
                    interval_seconds: group.config.strategy.default.interval_seconds,
                    next_send_time: now,
                },
                attempts: Vec::new(),
                description: String::new(),
                created_at: now,
                updated_at: now,
            };
            if let Err(e) = self.delivery_repo.create_event_delivery(&delivery).await {
                error!(
                    error = %e,
                    event = %event.uid,
                    endpoint = %endpoint.uid,
                    "could not create event delivery"
                );
            }
        }

        Ok(event)
    }

    /// Replay protection: the same body for the same app within the
    /// group's rate-limit window is rejected.
    async fn reject_replayed(
        &self,
        group: &Group,
        app: &Application,
        data: &serde_json::Value,
    ) -> Result<()> {
        let body = serde_json::to_vec(data)?;
        let mut hasher = Sha256::new();
        hasher.update(group.uid.as_bytes());
        hasher.update(app.uid.as_bytes());
        hasher.update(&body);
        let key = format!("dedup:{}", hex::encode(hasher.finalize()));

        if self.cache.contains(&key).await {
            return Err(Error::Conflict("duplicate event".to_string()));
        }
        let window =
            parse_duration(&group.rate_limit_duration).unwrap_or(Duration::from_secs(60));
        self.cache.set(&key, &true, window).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{TestDeliveryRepo, TestEventRepo};
    use crate::types::{
        DefaultStrategyConfig, Endpoint, EndpointStatus, GroupConfig, HashAlgorithm,
        SignatureConfig, StrategyConfig,
    };
    use serde_json::json;

    struct Harness {
        event_repo: Arc<TestEventRepo>,
        delivery_repo: Arc<TestDeliveryRepo>,
        service: IngestService,
    }

    fn harness() -> Harness {
        let event_repo = Arc::new(TestEventRepo::default());
        let delivery_repo = Arc::new(TestDeliveryRepo::default());
        let service = IngestService::new(
            event_repo.clone(),
            delivery_repo.clone(),
            Arc::new(Cache::new()),
        );
        Harness {
            event_repo,
            delivery_repo,
            service,
        }
    }

    fn group(replay_attacks: bool) -> Group {
        let now = Utc::now();
        Group {
            uid: "g1".to_string(),
            name: "g1".to_string(),
            logo_url: String::new(),
            config: GroupConfig {
                signature: SignatureConfig {
                    header: "X-Convoy-Signature".to_string(),
                    hash: HashAlgorithm::Sha256,
                },
                strategy: StrategyConfig {
                    kind: "default".to_string(),
                    default: DefaultStrategyConfig {
                        interval_seconds: 10,
                        retry_limit: 3,
                    },
                },
                disable_endpoint: false,
                replay_attacks,
            },
            statistics: None,
            rate_limit: 5000,
            rate_limit_duration: "1m".to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
            document_status: DocumentStatus::Active,
        }
    }

    fn endpoint(uid: &str, status: EndpointStatus) -> Endpoint {
        let now = Utc::now();
        Endpoint {
            uid: uid.to_string(),
            target_url: format!("https://example.com/{}", uid),
            description: String::new(),
            secret: "endpoint-secret".to_string(),
            status,
            created_at: now,
            updated_at: now,
        }
    }

    fn app(endpoints: Vec<Endpoint>, is_disabled: bool) -> Application {
        let now = Utc::now();
        Application {
            uid: "a1".to_string(),
            group_id: "g1".to_string(),
            title: "test app".to_string(),
            support_email: String::new(),
            is_disabled,
            endpoints,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            document_status: DocumentStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_create_event_fans_out_per_active_endpoint() {
        let h = harness();
        let group = group(false);
        let app = app(
            vec![
                endpoint("e1", EndpointStatus::Active),
                endpoint("e2", EndpointStatus::Active),
                endpoint("e3", EndpointStatus::Inactive),
            ],
            false,
        );

        let event = h
            .service
            .create_event(&group, &app, "invoice.created", json!({"amount": 100}))
            .await
            .unwrap();

        assert_eq!(event.matched_endpoints, 2);
        assert!(h.event_repo.events.lock().unwrap().contains_key(&event.uid));

        let deliveries = h.delivery_repo.deliveries.lock().unwrap();
        assert_eq!(deliveries.len(), 2);
        let mut endpoint_ids: Vec<_> = deliveries
            .values()
            .map(|d| d.endpoint_id.clone())
            .collect();
        endpoint_ids.sort();
        assert_eq!(endpoint_ids, vec!["e1".to_string(), "e2".to_string()]);
        for delivery in deliveries.values() {
            assert_eq!(delivery.status, EventDeliveryStatus::Scheduled);
            assert_eq!(delivery.metadata.num_trials, 0);
            assert_eq!(delivery.metadata.retry_limit, 3);
            assert_eq!(delivery.metadata.interval_seconds, 10);
            assert_eq!(delivery.event_id, event.uid);
            assert_eq!(delivery.group_id, "g1");
        }
    }

    #[tokio::test]
    async fn test_create_event_rejects_disabled_app() {
        let h = harness();
        let err = h
            .service
            .create_event(
                &group(false),
                &app(vec![endpoint("e1", EndpointStatus::Active)], true),
                "invoice.created",
                json!({}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "app has no valid endpoints");
    }

    #[tokio::test]
    async fn test_create_event_requires_active_endpoint() {
        let h = harness();
        let err = h
            .service
            .create_event(
                &group(false),
                &app(vec![endpoint("e1", EndpointStatus::Inactive)], false),
                "invoice.created",
                json!({}),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "app has no valid endpoints");
    }

    #[tokio::test]
    async fn test_create_event_requires_event_type() {
        let h = harness();
        let err = h
            .service
            .create_event(
                &group(false),
                &app(vec![endpoint("e1", EndpointStatus::Active)], false),
                "  ",
                json!({}),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "event_type:please provide a valid event type"
        );
    }

    #[tokio::test]
    async fn test_replay_attack_protection() {
        let h = harness();
        let group = group(true);
        let app = app(vec![endpoint("e1", EndpointStatus::Active)], false);

        h.service
            .create_event(&group, &app, "invoice.created", json!({"n": 1}))
            .await
            .unwrap();

        // Identical body within the window is a duplicate.
        let err = h
            .service
            .create_event(&group, &app, "invoice.created", json!({"n": 1}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "duplicate event");

        // A different body passes.
        h.service
            .create_event(&group, &app, "invoice.created", json!({"n": 2}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_duplicates_allowed_when_protection_off() {
        let h = harness();
        let group = group(false);
        let app = app(vec![endpoint("e1", EndpointStatus::Active)], false);

        for _ in 0..2 {
            h.service
                .create_event(&group, &app, "invoice.created", json!({"n": 1}))
                .await
                .unwrap();
        }
        assert_eq!(h.event_repo.events.lock().unwrap().len(), 2);
    }
}
