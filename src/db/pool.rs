//! Bounded async connection pools.
//!
//! One pool per database kind. A semaphore caps concurrent checkouts at
//! `max_size`; a background task probes idle connections with the dialect's
//! `SELECT 1`, recycles stale ones, and replenishes back to `min_size`.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::db::executor::QueryExecutor;
use crate::db::Dialect;
use crate::error::{ReconcileError, Result};
use crate::metrics;

/// Pool sizing and lifecycle limits.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_size: usize,
    pub max_size: usize,
    pub max_idle: Duration,
    pub max_lifetime: Duration,
    pub acquire_timeout: Duration,
    pub health_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 10,
            max_idle: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(3600),
            acquire_timeout: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
        }
    }
}

/// Factory for fresh connections of one database kind.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    fn dialect(&self) -> Dialect;
    async fn connect(&self) -> Result<Box<dyn QueryExecutor + Send>>;
}

struct PooledConn {
    executor: Box<dyn QueryExecutor + Send>,
    created_at: Instant,
    last_used: Instant,
}

impl PooledConn {
    fn new(executor: Box<dyn QueryExecutor + Send>) -> Self {
        let now = Instant::now();
        Self {
            executor,
            created_at: now,
            last_used: now,
        }
    }

    fn expired(&self, config: &PoolConfig) -> bool {
        let now = Instant::now();
        now.duration_since(self.created_at) > config.max_lifetime
            || now.duration_since(self.last_used) > config.max_idle
    }
}

struct PoolShared {
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    name: String,
    idle: Mutex<VecDeque<PooledConn>>,
    active: AtomicUsize,
}

impl PoolShared {
    fn db_label(&self) -> &'static str {
        self.connector.dialect().name()
    }

    fn update_gauges(&self) {
        let idle = self.idle.lock().map(|q| q.len()).unwrap_or(0);
        let active = self.active.load(Ordering::Relaxed);
        let labels = [self.db_label(), self.name.as_str()];
        metrics::POOL_IDLE.with_label_values(&labels).set(idle as i64);
        metrics::POOL_ACTIVE
            .with_label_values(&labels)
            .set(active as i64);
        metrics::POOL_SIZE
            .with_label_values(&labels)
            .set((idle + active) as i64);
    }
}

/// A pool of connections for one database kind.
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
    semaphore: Arc<Semaphore>,
    health_task: tokio::task::JoinHandle<()>,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig, name: impl Into<String>) -> Self {
        let shared = Arc::new(PoolShared {
            connector,
            config,
            name: name.into(),
            idle: Mutex::new(VecDeque::new()),
            active: AtomicUsize::new(0),
        });
        let semaphore = Arc::new(Semaphore::new(shared.config.max_size));
        let health_task = spawn_health_task(shared.clone());

        info!(
            db = shared.db_label(),
            pool = %shared.name,
            min = shared.config.min_size,
            max = shared.config.max_size,
            "initialized connection pool"
        );

        Self {
            shared,
            semaphore,
            health_task,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.shared.connector.dialect()
    }

    /// Check a connection out of the pool, waiting up to `acquire_timeout`.
    ///
    /// Exhaustion is a table-level failure: the orchestrator records it
    /// against the table being reconciled and moves on.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let started = Instant::now();
        let labels = [self.shared.db_label(), self.shared.name.as_str()];

        let permit = match tokio::time::timeout(
            self.shared.config.acquire_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            _ => {
                metrics::POOL_TIMEOUTS.with_label_values(&labels).inc();
                return Err(ReconcileError::PoolExhausted {
                    db: self.shared.db_label(),
                    waited_secs: started.elapsed().as_secs_f64(),
                });
            }
        };

        // Prefer a live idle connection; discard stale ones along the way.
        let conn = loop {
            let candidate = self
                .shared
                .idle
                .lock()
                .ok()
                .and_then(|mut idle| idle.pop_front());

            match candidate {
                Some(conn) if !conn.expired(&self.shared.config) => break conn,
                Some(_) => {
                    debug!(pool = %self.shared.name, "discarding stale idle connection");
                    continue;
                }
                None => {
                    let executor = self.shared.connector.connect().await.map_err(|e| {
                        metrics::POOL_ERRORS
                            .with_label_values(&[
                                self.shared.db_label(),
                                self.shared.name.as_str(),
                                "connect",
                            ])
                            .inc();
                        e
                    })?;
                    break PooledConn::new(executor);
                }
            }
        };

        self.shared.active.fetch_add(1, Ordering::Relaxed);
        metrics::POOL_ACQUIRE_TIME
            .with_label_values(&labels)
            .observe(started.elapsed().as_secs_f64());
        self.shared.update_gauges();

        Ok(PooledConnection {
            conn: Some(conn),
            shared: self.shared.clone(),
            _permit: permit,
        })
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.health_task.abort();
    }
}

fn spawn_health_task(shared: Arc<PoolShared>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(shared.config.health_check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            run_health_check(&shared).await;
        }
    })
}

/// Probe idle connections, drop the dead and expired, and replenish back to
/// `min_size`. Runs outside the idle lock so checkouts are never blocked on
/// a probe query.
async fn run_health_check(shared: &PoolShared) {
    let drained: Vec<PooledConn> = match shared.idle.lock() {
        Ok(mut idle) => idle.drain(..).collect(),
        Err(_) => return,
    };

    let probe = shared.connector.dialect().probe_query();
    let mut healthy: VecDeque<PooledConn> = VecDeque::new();

    for mut conn in drained {
        if conn.expired(&shared.config) {
            debug!(pool = %shared.name, "recycling expired connection");
            continue;
        }
        match conn.executor.query_scalar(probe, &[]).await {
            Ok(_) => healthy.push_back(conn),
            Err(e) => {
                warn!(pool = %shared.name, error = %e, "health probe failed, recycling connection");
                metrics::POOL_ERRORS
                    .with_label_values(&[shared.db_label(), shared.name.as_str(), "health_check"])
                    .inc();
            }
        }
    }

    while healthy.len() + shared.active.load(Ordering::Relaxed) < shared.config.min_size {
        match shared.connector.connect().await {
            Ok(executor) => healthy.push_back(PooledConn::new(executor)),
            Err(e) => {
                warn!(pool = %shared.name, error = %e, "failed to replenish pool");
                metrics::POOL_ERRORS
                    .with_label_values(&[shared.db_label(), shared.name.as_str(), "connect"])
                    .inc();
                break;
            }
        }
    }

    if let Ok(mut idle) = shared.idle.lock() {
        // Keep connections returned while we were probing.
        while let Some(conn) = idle.pop_front() {
            healthy.push_back(conn);
        }
        *idle = healthy;
    }
    shared.update_gauges();
}

/// A checked-out connection. Returns itself to the pool on drop.
pub struct PooledConnection {
    conn: Option<PooledConn>,
    shared: Arc<PoolShared>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").finish()
    }
}

impl Deref for PooledConnection {
    type Target = dyn QueryExecutor + Send;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .expect("connection present until drop")
            .executor
            .as_ref()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .expect("connection present until drop")
            .executor
            .as_mut()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            conn.last_used = Instant::now();
            if let Ok(mut idle) = self.shared.idle.lock() {
                idle.push_back(conn);
            }
        }
        self.shared.active.fetch_sub(1, Ordering::Relaxed);
        self.shared.update_gauges();
    }
}
