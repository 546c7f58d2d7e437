//! Transient-failure retry with exponential backoff.
//!
//! Classification is advisory: the default classifier recognizes the usual
//! connection/timeout/deadlock families, and callers may swap in their own.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::error::{DbError, ReconcileError, Result};

/// Message fragments that mark an error as transient regardless of its
/// structured kind. Matched case-insensitively.
const TRANSIENT_PATTERNS: &[&str] = &[
    "connection",
    "timeout",
    "deadlock",
    "lock wait timeout",
    "lost connection",
    "server has gone away",
    "connection refused",
    "connection reset",
    "broken pipe",
    "network error",
    "communication link failure",
    "interface error",
];

// SQL Server error numbers that come back from an otherwise healthy session.
// 1205 deadlock victim, 1222 lock request timeout, 233/10053/10054/10060
// transport drops, 40197/40501/40613 transient Azure states.
const SQLSERVER_TRANSIENT_CODES: &[u32] = &[1205, 1222, 233, 10053, 10054, 10060, 40197, 40501, 40613];

fn message_is_transient(message: &str) -> bool {
    let lowered = message.to_lowercase();
    TRANSIENT_PATTERNS.iter().any(|p| lowered.contains(p))
}

fn db_error_is_transient(err: &DbError) -> bool {
    match err {
        DbError::Postgres(e) => {
            if e.is_closed() {
                return true;
            }
            if let Some(state) = e.code() {
                let code = state.code();
                // 08xxx connection exceptions, serialization/deadlock
                // failures, lock_not_available, query_canceled.
                if code.starts_with("08")
                    || code == "40001"
                    || code == "40P01"
                    || code == "55P03"
                    || code == "57014"
                {
                    return true;
                }
            }
            message_is_transient(&e.to_string())
        }
        DbError::SqlServer(e) => match e {
            tiberius::error::Error::Io { .. } => true,
            tiberius::error::Error::Routing { .. } => true,
            tiberius::error::Error::Server(token) => {
                SQLSERVER_TRANSIENT_CODES.contains(&token.code())
                    || message_is_transient(token.message())
            }
            other => message_is_transient(&other.to_string()),
        },
        DbError::Decode(_) => false,
    }
}

/// Default classifier: transient database failures only. Identifier,
/// constraint, and syntax errors surface immediately.
pub fn is_transient(err: &ReconcileError) -> bool {
    match err {
        ReconcileError::Database(db) => db_error_is_transient(db),
        _ => false,
    }
}

/// Backoff policy. Attempt `i` (0-indexed among retries) sleeps
/// `min(base_delay * exponential_base^i, max_delay)`, jittered by ±25% and
/// floored at 100ms.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let raw = self.base_delay.as_secs_f64() * self.exponential_base.powi(attempt as i32);
        let mut delay = raw.min(self.max_delay.as_secs_f64());

        if self.jitter {
            let spread = delay * 0.25;
            delay += rand::thread_rng().gen_range(-spread..=spread);
            delay = delay.max(0.1);
        }

        Duration::from_secs_f64(delay)
    }
}

type Classifier = dyn Fn(&ReconcileError) -> bool + Send + Sync;
type OnRetry = dyn Fn(u32, &ReconcileError, Duration) -> anyhow::Result<()> + Send + Sync;

/// Retry executor for database operations.
pub struct Retry {
    config: RetryConfig,
    classifier: Box<Classifier>,
    on_retry: Option<Box<OnRetry>>,
}

impl Default for Retry {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl Retry {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            classifier: Box::new(is_transient),
            on_retry: None,
        }
    }

    /// Replace the transient classifier with an explicit one.
    pub fn retry_if<F>(mut self, classifier: F) -> Self
    where
        F: Fn(&ReconcileError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Box::new(classifier);
        self
    }

    /// Observe each retry. A failing hook is logged and otherwise ignored.
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &ReconcileError, Duration) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_retry = Some(Box::new(hook));
        self
    }

    /// Handle one failure: decide retry-versus-surface, log, invoke the
    /// hook, and sleep. Returns the next attempt index, or the original
    /// error once it should surface.
    pub async fn backoff(&self, attempt: u32, err: ReconcileError) -> Result<u32> {
        if !(self.classifier)(&err) {
            return Err(err);
        }
        if attempt >= self.config.max_retries {
            error!(attempts = attempt + 1, error = %err, "retries exhausted");
            return Err(err);
        }

        let delay = self.config.delay_for(attempt);
        warn!(
            attempt = attempt + 1,
            max_retries = self.config.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient database error, retrying"
        );

        if let Some(hook) = &self.on_retry {
            if let Err(hook_err) = hook(attempt + 1, &err, delay) {
                error!(error = %hook_err, "retry callback failed");
            }
        }

        tokio::time::sleep(delay).await;
        Ok(attempt + 1)
    }

    /// Run `op` until it succeeds, fails permanently, or exhausts
    /// `max_retries + 1` attempts. The last error is surfaced unchanged.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => attempt = self.backoff(attempt, err).await?,
            }
        }
    }
}

/// Executor adapter that retries each collected query under a [`Retry`]
/// policy. Streamed queries pass through untouched: a half-consumed stream
/// is not replayable, so streaming callers retry at the page level instead.
pub struct WithRetry<'a> {
    executor: &'a mut (dyn crate::db::QueryExecutor + Send),
    retry: &'a Retry,
}

impl<'a> WithRetry<'a> {
    pub fn new(executor: &'a mut (dyn crate::db::QueryExecutor + Send), retry: &'a Retry) -> Self {
        Self { executor, retry }
    }
}

#[async_trait::async_trait]
impl crate::db::QueryExecutor for WithRetry<'_> {
    fn dialect(&self) -> crate::db::Dialect {
        self.executor.dialect()
    }

    async fn query(
        &mut self,
        sql: &str,
        params: &[crate::db::SqlValue],
    ) -> Result<Vec<crate::db::SqlRow>> {
        let mut attempt: u32 = 0;
        loop {
            match self.executor.query(sql, params).await {
                Ok(rows) => return Ok(rows),
                Err(err) => attempt = self.retry.backoff(attempt, err).await?,
            }
        }
    }

    async fn query_stream<'b>(
        &'b mut self,
        sql: &str,
        params: &[crate::db::SqlValue],
    ) -> Result<Box<dyn crate::db::RowStream + 'b>> {
        self.executor.query_stream(sql, params).await
    }
}

/// Convenience wrapper with the default policy and classifier.
pub async fn retry_database_operation<T, F, Fut>(op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    Retry::default().run(op).await
}
