//! One pass over one event delivery: claim, admit, sign, send, record.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use convoy_core::config::parse_duration;
use convoy_core::error::{Error, Result};
use convoy_core::signature::compute_signature;
use convoy_core::types::{
    self, DeliveryAttempt, Endpoint, EndpointStatus, Event, EventDelivery, EventDeliveryStatus,
    Group,
};

use crate::engine::EngineContext;

/// Hard ceiling on the retry backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(15 * 60);

/// Capped exponential backoff: `min(base * 2^trials, 15 min)`.
pub fn backoff_delay(trials: u16, interval_seconds: u64) -> Duration {
    let factor = 1u64 << trials.min(20) as u64;
    let delay = Duration::from_secs(interval_seconds.saturating_mul(factor));
    delay.min(MAX_BACKOFF)
}

struct SendOutcome {
    success: bool,
    http_status: u16,
    ip_address: String,
    request_headers: String,
    response_headers: String,
    response_data: String,
    error: String,
}

pub async fn process_delivery(ctx: &EngineContext, uid: &str) -> Result<()> {
    let claimed = ctx
        .repos
        .deliveries
        .update_status_of_event_delivery(
            uid,
            &[EventDeliveryStatus::Scheduled, EventDeliveryStatus::Retry],
            EventDeliveryStatus::Processing,
        )
        .await?;
    if !claimed {
        // Another worker owns this row.
        debug!(delivery = %uid, "claim lost, dropping row");
        return Ok(());
    }

    let mut delivery = match ctx.repos.deliveries.find_event_delivery_by_id(uid).await {
        Ok(delivery) => delivery,
        Err(e) => return release_claim(ctx, uid, e).await,
    };

    let event = match ctx.repos.events.find_event_by_id(&delivery.event_id).await {
        Ok(event) => event,
        Err(Error::NotFound(_)) => return discard(ctx, delivery, "event no longer exists").await,
        Err(e) => return release_claim(ctx, uid, e).await,
    };
    let app = match ctx
        .repos
        .applications
        .find_application_by_id(&delivery.app_id)
        .await
    {
        Ok(app) => app,
        Err(Error::NotFound(_)) => {
            return discard(ctx, delivery, "application no longer exists").await
        }
        Err(e) => return release_claim(ctx, uid, e).await,
    };
    let group = match find_group_cached(ctx, &delivery.group_id).await {
        Ok(group) => group,
        Err(Error::NotFound(_)) => return discard(ctx, delivery, "group no longer exists").await,
        Err(e) => return release_claim(ctx, uid, e).await,
    };

    let Some(endpoint) = app.endpoint(&delivery.endpoint_id).cloned() else {
        return discard(ctx, delivery, "endpoint no longer exists").await;
    };
    if endpoint.status == EndpointStatus::Inactive {
        return discard(ctx, delivery, "endpoint is inactive").await;
    }

    // Per-group admission. A throttled attempt is rescheduled without
    // consuming the retry budget.
    let window = parse_duration(&group.rate_limit_duration).unwrap_or(Duration::from_secs(60));
    let decision = ctx
        .limiter
        .allow(&group.uid, group.rate_limit, window)
        .await;
    if !decision.allowed {
        delivery.status = EventDeliveryStatus::Retry;
        delivery.metadata.next_send_time =
            Utc::now() + chrono::Duration::milliseconds(decision.retry_after.as_millis() as i64);
        delivery.description = "rate limit exceeded".to_string();
        delivery.updated_at = Utc::now();
        return ctx.repos.deliveries.update_event_delivery(&delivery).await;
    }

    let outcome = send(ctx, &group, &event, &endpoint).await;

    let trials = delivery.metadata.num_trials;
    delivery.metadata.num_trials = trials + 1;

    let attempt = DeliveryAttempt {
        uid: types::uid(),
        ip_address: outcome.ip_address.clone(),
        http_status: outcome.http_status,
        api_version: env!("CARGO_PKG_VERSION").to_string(),
        request_http_header: outcome.request_headers.clone(),
        response_http_header: outcome.response_headers.clone(),
        response_data: outcome.response_data.clone(),
        error: outcome.error.clone(),
        status: outcome.success,
        created_at: Utc::now(),
    };
    ctx.repos
        .deliveries
        .append_attempt(&delivery.uid, &attempt)
        .await?;

    if outcome.success {
        delivery.status = EventDeliveryStatus::Success;
        delivery.description = String::new();
        delivery.updated_at = Utc::now();
        ctx.repos.deliveries.update_event_delivery(&delivery).await?;

        // First success promotes a pending endpoint; this is also how a
        // replayed delivery re-enables a tripped endpoint.
        if endpoint.status == EndpointStatus::Pending {
            ctx.repos
                .applications
                .update_endpoint_status(&app.uid, &[endpoint.uid.clone()], EndpointStatus::Active)
                .await?;
        }
        return Ok(());
    }

    delivery.description = if outcome.error.is_empty() {
        format!("HTTP {}", outcome.http_status)
    } else {
        outcome.error.clone()
    };
    delivery.updated_at = Utc::now();

    if trials < delivery.metadata.retry_limit {
        delivery.status = EventDeliveryStatus::Retry;
        delivery.metadata.next_send_time = Utc::now()
            + chrono::Duration::from_std(backoff_delay(
                trials,
                delivery.metadata.interval_seconds,
            ))
            .unwrap_or_else(|_| chrono::Duration::seconds(MAX_BACKOFF.as_secs() as i64));
        ctx.repos.deliveries.update_event_delivery(&delivery).await?;
        return Ok(());
    }

    // Retry budget exhausted.
    delivery.status = EventDeliveryStatus::Failure;
    ctx.repos.deliveries.update_event_delivery(&delivery).await?;
    warn!(
        delivery = %delivery.uid,
        endpoint = %endpoint.uid,
        trials = delivery.metadata.num_trials,
        "delivery failed permanently"
    );

    if group.config.disable_endpoint && endpoint.status != EndpointStatus::Inactive {
        ctx.repos
            .applications
            .update_endpoint_status(&app.uid, &[endpoint.uid.clone()], EndpointStatus::Inactive)
            .await?;
    }
    Ok(())
}

/// Put a claimed row back so a later tick can pick it up again.
async fn release_claim(ctx: &EngineContext, uid: &str, cause: Error) -> Result<()> {
    let _ = ctx
        .repos
        .deliveries
        .update_status_of_event_delivery(
            uid,
            &[EventDeliveryStatus::Processing],
            EventDeliveryStatus::Scheduled,
        )
        .await;
    Err(cause)
}

async fn discard(ctx: &EngineContext, mut delivery: EventDelivery, reason: &str) -> Result<()> {
    delivery.status = EventDeliveryStatus::Discarded;
    delivery.description = reason.to_string();
    delivery.updated_at = Utc::now();
    ctx.repos.deliveries.update_event_delivery(&delivery).await
}

async fn find_group_cached(ctx: &EngineContext, uid: &str) -> Result<Group> {
    let key = format!("group:{}", uid);
    if let Some(group) = ctx.cache.get::<Group>(&key).await {
        return Ok(group);
    }
    let group = ctx.repos.groups.fetch_group_by_id(uid).await?;
    let _ = ctx.cache.set(&key, &group, ctx.config.cache_ttl).await;
    Ok(group)
}

/// Execute one signed HTTP POST. Success is any 2xx within the timeout;
/// everything else, including transport errors, is a failure.
async fn send(ctx: &EngineContext, group: &Group, event: &Event, endpoint: &Endpoint) -> SendOutcome {
    let body = match serde_json::to_vec(&event.data) {
        Ok(body) => body,
        Err(e) => return transport_failure(String::new(), format!("malformed payload: {}", e)),
    };
    let signature = compute_signature(
        group.config.signature.hash,
        endpoint.secret.as_bytes(),
        &body,
    );
    let timestamp = Utc::now().timestamp();

    let request = ctx
        .client
        .post(&endpoint.target_url)
        .header("Content-Type", "application/json")
        .header(group.config.signature.header.as_str(), signature)
        .header("X-Convoy-Event-Type", event.event_type.as_str())
        .header("X-Convoy-Event-ID", event.uid.as_str())
        .header("X-Convoy-Signature-Timestamp", timestamp.to_string())
        .body(body)
        .build();

    let request = match request {
        Ok(request) => request,
        Err(e) => return transport_failure(String::new(), format!("invalid request: {}", e)),
    };
    let request_headers = render_headers(request.headers());

    match ctx.client.execute(request).await {
        Ok(response) => {
            let http_status = response.status().as_u16();
            let success = response.status().is_success();
            let ip_address = response
                .remote_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_default();
            let response_headers = render_headers(response.headers());
            let response_data = match response.bytes().await {
                Ok(bytes) => {
                    let cut = bytes.len().min(ctx.config.max_response_size);
                    String::from_utf8_lossy(&bytes[..cut]).into_owned()
                }
                Err(_) => String::new(),
            };
            SendOutcome {
                success,
                http_status,
                ip_address,
                request_headers,
                response_headers,
                response_data,
                error: if success {
                    String::new()
                } else {
                    format!("HTTP {}", http_status)
                },
            }
        }
        Err(e) => {
            let error = if e.is_timeout() {
                "request timed out".to_string()
            } else if e.is_connect() {
                format!("connection failed: {}", e)
            } else {
                e.to_string()
            };
            transport_failure(request_headers, error)
        }
    }
}

fn transport_failure(request_headers: String, error: String) -> SendOutcome {
    SendOutcome {
        success: false,
        http_status: 0,
        ip_address: String::new(),
        request_headers,
        response_headers: String::new(),
        response_data: String::new(),
        error,
    }
}

fn render_headers(headers: &reqwest::header::HeaderMap) -> String {
    headers
        .iter()
        .map(|(name, value)| {
            format!("{}: {}", name, value.to_str().unwrap_or("<binary>"))
        })
        .collect::<Vec<_>>()
        .join("; ")
}
