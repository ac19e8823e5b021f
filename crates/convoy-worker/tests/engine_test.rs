use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::Utc;

use convoy_core::cache::Cache;
use convoy_core::limiter::TokenBucketLimiter;
use convoy_core::services::delivery::DeliveryService;
use convoy_core::signature::verify_signature;
use convoy_core::types::{
    Application, DefaultStrategyConfig, DeliveryMetadata, DocumentStatus, Endpoint,
    EndpointStatus, Event, EventDelivery, EventDeliveryStatus, Group, GroupConfig,
    HashAlgorithm, SignatureConfig, StrategyConfig,
};
use convoy_db::Repositories;
use convoy_worker::engine::{DispatchEngine, EngineConfig, EngineHandle};

const ENDPOINT_SECRET: &str = "endpoint-secret";

#[derive(Clone)]
struct Receiver {
    status: StatusCode,
    hits: Arc<Mutex<Vec<Hit>>>,
}

struct Hit {
    headers: HeaderMap,
    body: Vec<u8>,
}

async fn hook(State(receiver): State<Receiver>, headers: HeaderMap, body: Bytes) -> StatusCode {
    receiver.hits.lock().unwrap().push(Hit {
        headers,
        body: body.to_vec(),
    });
    receiver.status
}

async fn spawn_receiver(status: StatusCode) -> (SocketAddr, Arc<Mutex<Vec<Hit>>>) {
    let hits = Arc::new(Mutex::new(Vec::new()));
    let receiver = Receiver {
        status,
        hits: hits.clone(),
    };
    let app = Router::new().route("/hook", post(hook)).with_state(receiver);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, hits)
}

fn group(uid: &str, disable_endpoint: bool, rate_limit: u32) -> Group {
    let now = Utc::now();
    Group {
        uid: uid.to_string(),
        name: format!("group-{}", uid),
        logo_url: String::new(),
        config: GroupConfig {
            signature: SignatureConfig {
                header: "X-Convoy-Signature".to_string(),
                hash: HashAlgorithm::Sha256,
            },
            strategy: StrategyConfig {
                kind: "default".to_string(),
                default: DefaultStrategyConfig {
                    interval_seconds: 1,
                    retry_limit: 3,
                },
            },
            disable_endpoint,
            replay_attacks: false,
        },
        statistics: None,
        rate_limit,
        rate_limit_duration: "1m".to_string(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
        document_status: DocumentStatus::Active,
    }
}

fn app_with_endpoint(addr: SocketAddr, endpoint_status: EndpointStatus) -> Application {
    let now = Utc::now();
    Application {
        uid: "a1".to_string(),
        group_id: "g1".to_string(),
        title: "test app".to_string(),
        support_email: String::new(),
        is_disabled: false,
        endpoints: vec![Endpoint {
            uid: "e1".to_string(),
            target_url: format!("http://{}/hook", addr),
            description: String::new(),
            secret: ENDPOINT_SECRET.to_string(),
            status: endpoint_status,
            created_at: now,
            updated_at: now,
        }],
        created_at: now,
        updated_at: now,
        deleted_at: None,
        document_status: DocumentStatus::Active,
    }
}

fn event(uid: &str) -> Event {
    Event {
        uid: uid.to_string(),
        event_type: "invoice.created".to_string(),
        matched_endpoints: 1,
        group_id: "g1".to_string(),
        app_id: "a1".to_string(),
        data: serde_json::json!({"invoice": uid, "amount": 100}),
        created_at: Utc::now(),
        document_status: DocumentStatus::Active,
    }
}

fn delivery(uid: &str, event_id: &str, retry_limit: u16) -> EventDelivery {
    let now = Utc::now();
    EventDelivery {
        uid: uid.to_string(),
        group_id: "g1".to_string(),
        app_id: "a1".to_string(),
        event_id: event_id.to_string(),
        endpoint_id: "e1".to_string(),
        status: EventDeliveryStatus::Scheduled,
        metadata: DeliveryMetadata {
            num_trials: 0,
            retry_limit,
            // Immediate retries keep the test fast; backoff math is
            // covered by unit tests.
            interval_seconds: 0,
            next_send_time: now,
        },
        attempts: Vec::new(),
        description: String::new(),
        created_at: now,
        updated_at: now,
    }
}

async fn seed(
    repos: &Repositories,
    group_row: Group,
    app_row: Application,
    event_row: Event,
    deliveries: Vec<EventDelivery>,
) {
    repos.groups.create_group(&group_row).await.unwrap();
    repos
        .applications
        .create_application(&app_row)
        .await
        .unwrap();
    repos.events.create_event(&event_row).await.unwrap();
    for d in deliveries {
        repos.deliveries.create_event_delivery(&d).await.unwrap();
    }
}

fn start_engine(repos: &Repositories) -> EngineHandle {
    let config = EngineConfig {
        workers: 2,
        queue_capacity: 10,
        poll_interval: Duration::from_millis(25),
        request_timeout: Duration::from_secs(2),
        max_response_size: 10 * 1024,
        cache_ttl: Duration::from_secs(30),
    };
    let engine = DispatchEngine::new(
        repos.clone(),
        Arc::new(TokenBucketLimiter::new()),
        Arc::new(Cache::new()),
        config,
    )
    .unwrap();
    engine.start()
}

async fn wait_for_status(
    repos: &Repositories,
    uid: &str,
    status: EventDeliveryStatus,
) -> EventDelivery {
    for _ in 0..400 {
        let d = repos
            .deliveries
            .find_event_delivery_by_id(uid)
            .await
            .unwrap();
        if d.status == status {
            return d;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("delivery {} never reached {:?}", uid, status);
}

async fn endpoint_status(repos: &Repositories) -> EndpointStatus {
    repos
        .applications
        .find_application_by_id("a1")
        .await
        .unwrap()
        .endpoints[0]
        .status
}

#[tokio::test]
async fn delivers_signed_event() {
    let (addr, hits) = spawn_receiver(StatusCode::OK).await;
    let repos = Repositories::in_memory();
    seed(
        &repos,
        group("g1", false, 5000),
        app_with_endpoint(addr, EndpointStatus::Active),
        event("ev1"),
        vec![delivery("d1", "ev1", 3)],
    )
    .await;

    let handle = start_engine(&repos);
    let done = wait_for_status(&repos, "d1", EventDeliveryStatus::Success).await;
    handle.shutdown().await;

    assert_eq!(done.metadata.num_trials, 1);
    assert_eq!(done.attempts.len(), 1);
    assert!(done.attempts[0].status);
    assert_eq!(done.attempts[0].http_status, 200);

    let hits = hits.lock().unwrap();
    assert_eq!(hits.len(), 1);
    let hit = &hits[0];
    assert_eq!(
        hit.headers.get("Content-Type").unwrap(),
        "application/json"
    );
    assert_eq!(
        hit.headers.get("X-Convoy-Event-Type").unwrap(),
        "invoice.created"
    );
    assert_eq!(hit.headers.get("X-Convoy-Event-ID").unwrap(), "ev1");
    let timestamp: i64 = hit
        .headers
        .get("X-Convoy-Signature-Timestamp")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(timestamp > 0);

    // The signature verifies over the exact bytes that arrived.
    let signature = hit
        .headers
        .get("X-Convoy-Signature")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(verify_signature(
        HashAlgorithm::Sha256,
        ENDPOINT_SECRET.as_bytes(),
        &hit.body,
        signature
    ));
}

#[tokio::test]
async fn exhausted_retries_trip_the_circuit_breaker() {
    let (addr, hits) = spawn_receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
    let repos = Repositories::in_memory();
    seed(
        &repos,
        group("g1", true, 5000),
        app_with_endpoint(addr, EndpointStatus::Active),
        event("ev1"),
        vec![delivery("d1", "ev1", 3)],
    )
    .await;

    let handle = start_engine(&repos);
    let done = wait_for_status(&repos, "d1", EventDeliveryStatus::Failure).await;

    // retry_limit = 3 means exactly four attempts in total.
    assert_eq!(done.metadata.num_trials, 4);
    assert_eq!(done.attempts.len(), 4);
    assert!(done.attempts.iter().all(|a| !a.status));
    assert_eq!(done.description, "HTTP 500");
    assert_eq!(hits.lock().unwrap().len(), 4);

    for _ in 0..400 {
        if endpoint_status(&repos).await == EndpointStatus::Inactive {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(endpoint_status(&repos).await, EndpointStatus::Inactive);
    handle.shutdown().await;
}

#[tokio::test]
async fn zero_retry_limit_means_single_attempt() {
    // 300 is outside [200, 299] and must be treated as a failure.
    let (addr, hits) = spawn_receiver(StatusCode::MULTIPLE_CHOICES).await;
    let repos = Repositories::in_memory();
    seed(
        &repos,
        group("g1", false, 5000),
        app_with_endpoint(addr, EndpointStatus::Active),
        event("ev1"),
        vec![delivery("d1", "ev1", 0)],
    )
    .await;

    let handle = start_engine(&repos);
    let done = wait_for_status(&repos, "d1", EventDeliveryStatus::Failure).await;
    handle.shutdown().await;

    assert_eq!(done.attempts.len(), 1);
    assert_eq!(done.attempts[0].http_status, 300);
    assert!(!done.attempts[0].status);
    assert_eq!(hits.lock().unwrap().len(), 1);
    // disable_endpoint is off, so the endpoint stays active.
    assert_eq!(endpoint_status(&repos).await, EndpointStatus::Active);
}

#[tokio::test]
async fn throttled_deliveries_keep_their_retry_budget() {
    let (addr, _hits) = spawn_receiver(StatusCode::OK).await;
    let repos = Repositories::in_memory();
    seed(
        &repos,
        group("g1", false, 1),
        app_with_endpoint(addr, EndpointStatus::Active),
        event("ev1"),
        vec![delivery("d1", "ev1", 3), delivery("d2", "ev1", 3)],
    )
    .await;

    let handle = start_engine(&repos);

    // With limit 1 per minute, exactly one delivery goes out; the other
    // is pushed past the window without consuming a trial.
    let mut sent = None;
    let mut throttled = None;
    for _ in 0..400 {
        let d1 = repos
            .deliveries
            .find_event_delivery_by_id("d1")
            .await
            .unwrap();
        let d2 = repos
            .deliveries
            .find_event_delivery_by_id("d2")
            .await
            .unwrap();
        for d in [d1, d2] {
            match d.status {
                EventDeliveryStatus::Success => sent = Some(d),
                EventDeliveryStatus::Retry => throttled = Some(d),
                _ => {}
            }
        }
        if sent.is_some() && throttled.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    handle.shutdown().await;

    let sent = sent.expect("one delivery should have been sent");
    let throttled = throttled.expect("one delivery should have been throttled");

    assert_eq!(sent.metadata.num_trials, 1);
    assert_eq!(throttled.metadata.num_trials, 0);
    assert!(throttled.attempts.is_empty());
    assert_eq!(throttled.description, "rate limit exceeded");
    assert!(throttled.metadata.next_send_time > Utc::now());
}

#[tokio::test]
async fn inactive_endpoint_discards_without_attempt() {
    let (addr, hits) = spawn_receiver(StatusCode::OK).await;
    let repos = Repositories::in_memory();
    seed(
        &repos,
        group("g1", false, 5000),
        app_with_endpoint(addr, EndpointStatus::Inactive),
        event("ev1"),
        vec![delivery("d1", "ev1", 3)],
    )
    .await;

    let handle = start_engine(&repos);
    let done = wait_for_status(&repos, "d1", EventDeliveryStatus::Discarded).await;
    handle.shutdown().await;

    assert!(done.attempts.is_empty());
    assert_eq!(done.metadata.num_trials, 0);
    assert_eq!(done.description, "endpoint is inactive");
    assert!(hits.lock().unwrap().is_empty());
}

#[tokio::test]
async fn replaying_a_failure_reenables_the_endpoint() {
    let (addr, _hits) = spawn_receiver(StatusCode::OK).await;
    let repos = Repositories::in_memory();
    let mut failed = delivery("d1", "ev1", 3);
    failed.status = EventDeliveryStatus::Failure;
    failed.metadata.num_trials = 4;
    failed.description = "HTTP 500".to_string();
    seed(
        &repos,
        group("g1", true, 5000),
        app_with_endpoint(addr, EndpointStatus::Inactive),
        event("ev1"),
        vec![failed],
    )
    .await;

    let service = DeliveryService::new(repos.deliveries.clone(), repos.applications.clone());
    let replayed = service.resend_event_delivery("d1").await.unwrap();
    assert_eq!(replayed.status, EventDeliveryStatus::Scheduled);
    assert_eq!(replayed.metadata.num_trials, 0);
    assert_eq!(endpoint_status(&repos).await, EndpointStatus::Pending);

    let handle = start_engine(&repos);
    let done = wait_for_status(&repos, "d1", EventDeliveryStatus::Success).await;

    // num_trials was reset before the replay attempt.
    assert_eq!(done.metadata.num_trials, 1);

    for _ in 0..400 {
        if endpoint_status(&repos).await == EndpointStatus::Active {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    assert_eq!(endpoint_status(&repos).await, EndpointStatus::Active);
    handle.shutdown().await;
}

#[tokio::test]
async fn unreachable_endpoint_counts_as_failure() {
    // Nothing listens on this port; connections are refused.
    let repos = Repositories::in_memory();
    let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
    seed(
        &repos,
        group("g1", false, 5000),
        app_with_endpoint(addr, EndpointStatus::Active),
        event("ev1"),
        vec![delivery("d1", "ev1", 0)],
    )
    .await;

    let handle = start_engine(&repos);
    let done = wait_for_status(&repos, "d1", EventDeliveryStatus::Failure).await;
    handle.shutdown().await;

    assert_eq!(done.attempts.len(), 1);
    assert_eq!(done.attempts[0].http_status, 0);
    assert!(!done.attempts[0].error.is_empty());
}
