//! Read and replay operations on event deliveries.

use std::sync::Arc;

use chrono::Utc;
use tracing::error;

use crate::error::{Error, Result};
use crate::repository::{
    ApplicationRepository, EventDeliveryFilter, EventDeliveryRepository,
};
use crate::types::{
    EndpointStatus, EventDelivery, EventDeliveryStatus, Pageable, PaginationData,
};

pub struct DeliveryService {
    delivery_repo: Arc<dyn EventDeliveryRepository>,
    app_repo: Arc<dyn ApplicationRepository>,
}

impl DeliveryService {
    pub fn new(
        delivery_repo: Arc<dyn EventDeliveryRepository>,
        app_repo: Arc<dyn ApplicationRepository>,
    ) -> Self {
        Self {
            delivery_repo,
            app_repo,
        }
    }

    pub async fn find_event_delivery(&self, uid: &str) -> Result<EventDelivery> {
        self.delivery_repo.find_event_delivery_by_id(uid).await
    }

    pub async fn get_event_deliveries(
        &self,
        filter: &EventDeliveryFilter,
        pageable: Pageable,
    ) -> Result<(Vec<EventDelivery>, PaginationData)> {
        self.delivery_repo
            .load_event_deliveries_paged(filter, pageable)
            .await
            .map_err(|e| {
                error!(error = %e, "could not load event deliveries");
                Error::Internal("failed to load event deliveries".to_string())
            })
    }

    /// Re-queue a terminal delivery for another attempt cycle.
    ///
    /// The retry budget is reset and the delivery goes back to Scheduled.
    /// An inactive endpoint is moved to pending so the dispatcher will
    /// attempt it again; its first success promotes it back to active.
    pub async fn resend_event_delivery(&self, uid: &str) -> Result<EventDelivery> {
        let mut delivery = self.delivery_repo.find_event_delivery_by_id(uid).await?;

        if !delivery.status.is_terminal() {
            return Err(Error::Invalid(
                "event delivery already scheduled for retry".to_string(),
            ));
        }

        let app = self
            .app_repo
            .find_application_by_id(&delivery.app_id)
            .await?;
        let endpoint = app
            .endpoint(&delivery.endpoint_id)
            .ok_or_else(|| Error::NotFound("endpoint not found".to_string()))?;

        if endpoint.status == EndpointStatus::Inactive {
            self.app_repo
                .update_endpoint_status(
                    &app.uid,
                    &[endpoint.uid.clone()],
                    EndpointStatus::Pending,
                )
                .await?;
        }

        delivery.status = EventDeliveryStatus::Scheduled;
        delivery.metadata.num_trials = 0;
        delivery.metadata.next_send_time = Utc::now();
        delivery.description = String::new();
        delivery.updated_at = Utc::now();

        self.delivery_repo.update_event_delivery(&delivery).await?;
        Ok(delivery)
    }

    /// Replay a batch of deliveries; returns (resent, failed) counts.
    pub async fn batch_resend(&self, uids: &[String]) -> Result<(usize, usize)> {
        let mut resent = 0;
        let mut failed = 0;
        for uid in uids {
            match self.resend_event_delivery(uid).await {
                Ok(_) => resent += 1,
                Err(e) => {
                    error!(error = %e, delivery = %uid, "could not resend event delivery");
                    failed += 1;
                }
            }
        }
        Ok((resent, failed))
    }
}
