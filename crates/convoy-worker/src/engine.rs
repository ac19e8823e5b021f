//! The dispatch engine: a leaser task feeding a bounded worker pool.
//!
//! The leaser periodically queries for due deliveries and pushes their ids
//! onto a bounded queue, interleaving rows from distinct groups so one hot
//! tenant cannot starve the rest. Workers claim each row with a conditional
//! status update before touching it, so a row leased twice is executed
//! once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use convoy_core::cache::Cache;
use convoy_core::config::Config;
use convoy_core::limiter::RateLimiter;
use convoy_core::types::EventDelivery;
use convoy_db::Repositories;

use crate::delivery::process_delivery;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub max_response_size: usize,
    pub cache_ttl: Duration,
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let workers = if config.queue.workers > 0 {
            config.queue.workers
        } else {
            cores * 2
        };
        Self {
            workers,
            queue_capacity: config.queue.capacity.max(1),
            poll_interval: Duration::from_secs(config.queue.poll_interval_seconds.max(1)),
            request_timeout: Duration::from_secs(config.dispatch.timeout_seconds.max(1)),
            max_response_size: config.dispatch.max_response_size,
            cache_ttl: Duration::from_secs(config.cache.ttl_seconds),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Self {
            workers: cores * 2,
            queue_capacity: 100,
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
            max_response_size: 10 * 1024,
            cache_ttl: Duration::from_secs(30),
        }
    }
}

/// Shared, read-only context for all workers.
pub struct EngineContext {
    pub repos: Repositories,
    pub limiter: Arc<dyn RateLimiter>,
    pub cache: Arc<Cache>,
    pub client: reqwest::Client,
    pub config: EngineConfig,
}

pub struct DispatchEngine {
    ctx: Arc<EngineContext>,
}

impl DispatchEngine {
    pub fn new(
        repos: Repositories,
        limiter: Arc<dyn RateLimiter>,
        cache: Arc<Cache>,
        config: EngineConfig,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            ctx: Arc::new(EngineContext {
                repos,
                limiter,
                cache,
                client,
                config,
            }),
        })
    }

    /// Spawn the leaser and the worker pool.
    pub fn start(&self) -> EngineHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (task_tx, task_rx) = mpsc::channel::<String>(self.ctx.config.queue_capacity);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let in_flight = Arc::new(Mutex::new(HashSet::<String>::new()));

        let mut handles = Vec::with_capacity(self.ctx.config.workers + 1);

        for _ in 0..self.ctx.config.workers {
            let ctx = self.ctx.clone();
            let rx = task_rx.clone();
            let in_flight = in_flight.clone();
            handles.push(tokio::spawn(worker_loop(ctx, rx, in_flight)));
        }

        let leaser = tokio::spawn(leaser_loop(
            self.ctx.clone(),
            task_tx,
            in_flight,
            shutdown_rx,
        ));
        handles.push(leaser);

        info!(workers = self.ctx.config.workers, "dispatch engine started");

        EngineHandle {
            shutdown_tx,
            handles,
        }
    }
}

pub struct EngineHandle {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Stop leasing, drain the queue and wait for in-flight attempts.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("dispatch engine stopped");
    }
}

/// Lease due deliveries into the queue, bounded by free queue capacity.
async fn leaser_loop(
    ctx: Arc<EngineContext>,
    task_tx: mpsc::Sender<String>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(ctx.config.poll_interval);
    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown_rx.changed() => {
                // Dropping the sender closes the queue; workers drain
                // what is already leased and exit.
                return;
            }
        }

        let capacity = task_tx.capacity();
        if capacity == 0 {
            continue;
        }

        let due = match ctx
            .repos
            .deliveries
            .load_deliveries_scheduled_before(Utc::now(), None, capacity as u64)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "could not lease scheduled deliveries");
                continue;
            }
        };

        for delivery in interleave_by_group(due) {
            let uid = delivery.uid;
            {
                let mut in_flight = in_flight.lock().await;
                if !in_flight.insert(uid.clone()) {
                    continue;
                }
            }
            if task_tx.send(uid.clone()).await.is_err() {
                return;
            }
        }
    }
}

async fn worker_loop(
    ctx: Arc<EngineContext>,
    task_rx: Arc<Mutex<mpsc::Receiver<String>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
) {
    loop {
        let uid = {
            let mut rx = task_rx.lock().await;
            rx.recv().await
        };
        let Some(uid) = uid else { break };

        if let Err(e) = process_delivery(&ctx, &uid).await {
            error!(error = %e, delivery = %uid, "delivery pass failed");
        }
        in_flight.lock().await.remove(&uid);
    }
}

/// Round-robin rows across groups while keeping per-group order, so every
/// tenant in a leased batch makes progress.
fn interleave_by_group(rows: Vec<EventDelivery>) -> Vec<EventDelivery> {
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, VecDeque<EventDelivery>> = HashMap::new();
    for row in rows {
        if !buckets.contains_key(&row.group_id) {
            order.push(row.group_id.clone());
        }
        buckets.entry(row.group_id.clone()).or_default().push_back(row);
    }

    let mut interleaved = Vec::new();
    loop {
        let mut emitted = false;
        for group in &order {
            if let Some(row) = buckets.get_mut(group).and_then(VecDeque::pop_front) {
                interleaved.push(row);
                emitted = true;
            }
        }
        if !emitted {
            return interleaved;
        }
    }
}
