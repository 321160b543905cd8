//! Retry/Fallback Executor.
//!
//! Every radio operation runs as an ordered list of alternative strategies.
//! Within one round the strategies are tried in order; a strategy that reports
//! `Unsupported` is skipped for the rest of the call. When a whole round
//! fails on transient errors the executor waits `base_delay * 2^round` and
//! starts the next round, up to `max_attempts` rounds.

use crate::mesh::{MeshError, MeshResult};
use dashmap::DashMap;
use futures::future::BoxFuture;
use meshdp_core::{ExecutorConfig, LogLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Terminal executor failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("{operation}: no strategies")]
    NoStrategies { operation: String },

    /// Every strategy reported the operation unsupported.
    #[error("{operation}: unsupported by device ({last})")]
    Unsupported { operation: String, last: MeshError },

    /// Transient failures in every round.
    #[error("{operation}: gave up after {attempts} attempt(s): {last}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last: MeshError,
    },
}

impl ExecutorError {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}

/// Backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Rounds over the strategy list.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&ExecutorConfig::default())
    }
}

impl From<&ExecutorConfig> for RetryPolicy {
    fn from(config: &ExecutorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed round `attempt` (0-based): `base * 2^attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Single round, no retry.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// One alternative way of performing an operation.
pub struct Strategy<'a, T> {
    name: &'static str,
    run: Box<dyn Fn() -> BoxFuture<'a, MeshResult<T>> + Send + Sync + 'a>,
}

impl<'a, T> Strategy<'a, T> {
    pub fn new<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'a,
        Fut: Future<Output = MeshResult<T>> + Send + 'a,
    {
        Self {
            name,
            run: Box::new(move || Box::pin(run())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> std::fmt::Debug for Strategy<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy").field("name", &self.name).finish()
    }
}

/// Successful execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed<T> {
    pub value: T,
    /// Index of the strategy that succeeded.
    pub strategy: usize,
    pub strategy_name: &'static str,
    /// Rounds used, starting at 1.
    pub attempts: u32,
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    fallbacks: AtomicU64,
    retries: AtomicU64,
    total_duration_ms: AtomicU64,
}

/// Snapshot of one operation's counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStats {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    /// Strategy failures followed by another strategy in the same round.
    pub fallbacks: u64,
    /// Backoff rounds started.
    pub retries: u64,
    pub avg_duration_ms: f64,
}

/// Global per-operation statistics.
#[derive(Debug, Default)]
pub struct ExecutorStats {
    operations: DashMap<String, Counters>,
}

impl ExecutorStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<F: FnOnce(&Counters)>(&self, operation: &str, f: F) {
        if let Some(counters) = self.operations.get(operation) {
            f(&counters);
            return;
        }
        let entry = self.operations.entry(operation.to_string()).or_default();
        f(&entry);
    }

    fn record_call(&self, operation: &str) {
        self.with(operation, |c| {
            c.calls.fetch_add(1, Ordering::Relaxed);
        });
    }

    fn record_fallback(&self, operation: &str) {
        self.with(operation, |c| {
            c.fallbacks.fetch_add(1, Ordering::Relaxed);
        });
    }

    fn record_retry(&self, operation: &str) {
        self.with(operation, |c| {
            c.retries.fetch_add(1, Ordering::Relaxed);
        });
    }

    fn record_result(&self, operation: &str, success: bool, elapsed: Duration) {
        self.with(operation, |c| {
            if success {
                c.successes.fetch_add(1, Ordering::Relaxed);
            } else {
                c.failures.fetch_add(1, Ordering::Relaxed);
            }
            c.total_duration_ms
                .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
        });
    }

    pub fn operation(&self, operation: &str) -> Option<OperationStats> {
        self.operations.get(operation).map(|c| snapshot(&c))
    }

    /// All operations, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, OperationStats> {
        self.operations
            .iter()
            .map(|entry| (entry.key().clone(), snapshot(entry.value())))
            .collect()
    }

    /// Totals across all operations.
    pub fn totals(&self) -> OperationStats {
        let mut total = OperationStats::default();
        let mut duration = 0u64;
        for entry in self.operations.iter() {
            let c = entry.value();
            total.calls += c.calls.load(Ordering::Relaxed);
            total.successes += c.successes.load(Ordering::Relaxed);
            total.failures += c.failures.load(Ordering::Relaxed);
            total.fallbacks += c.fallbacks.load(Ordering::Relaxed);
            total.retries += c.retries.load(Ordering::Relaxed);
            duration += c.total_duration_ms.load(Ordering::Relaxed);
        }
        let finished = total.successes + total.failures;
        if finished > 0 {
            total.avg_duration_ms = duration as f64 / finished as f64;
        }
        total
    }

    pub fn reset(&self) {
        self.operations.clear();
        info!("Executor statistics reset");
    }
}

fn snapshot(c: &Counters) -> OperationStats {
    let successes = c.successes.load(Ordering::Relaxed);
    let failures = c.failures.load(Ordering::Relaxed);
    let finished = successes + failures;
    let total = c.total_duration_ms.load(Ordering::Relaxed);
    OperationStats {
        calls: c.calls.load(Ordering::Relaxed),
        successes,
        failures,
        fallbacks: c.fallbacks.load(Ordering::Relaxed),
        retries: c.retries.load(Ordering::Relaxed),
        avg_duration_ms: if finished > 0 {
            total as f64 / finished as f64
        } else {
            0.0
        },
    }
}

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {
        match $level {
            LogLevel::Trace => trace!($($arg)+),
            LogLevel::Debug => debug!($($arg)+),
            LogLevel::Info => info!($($arg)+),
            LogLevel::Warn => warn!($($arg)+),
        }
    };
}

/// Runs strategies with fallback and backoff.
#[derive(Debug, Clone)]
pub struct FallbackExecutor {
    policy: RetryPolicy,
    strategy_log_level: LogLevel,
    stats: Arc<ExecutorStats>,
}

impl Default for FallbackExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl FallbackExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            strategy_log_level: LogLevel::Debug,
            stats: Arc::new(ExecutorStats::new()),
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(RetryPolicy::from(config)).with_log_level(config.strategy_log_level)
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.strategy_log_level = level;
        self
    }

    /// Share statistics with another executor.
    pub fn with_stats(mut self, stats: Arc<ExecutorStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn stats(&self) -> &Arc<ExecutorStats> {
        &self.stats
    }

    /// Run `strategies` for `operation` with the executor's policy.
    pub async fn execute<T>(
        &self,
        operation: &str,
        strategies: Vec<Strategy<'_, T>>,
    ) -> Result<Executed<T>, ExecutorError> {
        self.execute_with(operation, &self.policy, strategies).await
    }

    /// Run with an explicit policy.
    pub async fn execute_with<T>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        strategies: Vec<Strategy<'_, T>>,
    ) -> Result<Executed<T>, ExecutorError> {
        if strategies.is_empty() {
            return Err(ExecutorError::NoStrategies {
                operation: operation.to_string(),
            });
        }

        let started = Instant::now();
        self.stats.record_call(operation);

        let max_attempts = policy.max_attempts.max(1);
        let mut unsupported = vec![false; strategies.len()];
        let mut last_error: Option<MeshError> = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let delay = policy.delay_for_attempt(attempt - 1);
                debug!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after backoff"
                );
                self.stats.record_retry(operation);
                tokio::time::sleep(delay).await;
            }

            for (index, strategy) in strategies.iter().enumerate() {
                if unsupported[index] {
                    continue;
                }
                match (strategy.run)().await {
                    Ok(value) => {
                        self.stats.record_result(operation, true, started.elapsed());
                        trace!(
                            operation,
                            strategy = strategy.name,
                            attempt = attempt + 1,
                            "Operation succeeded"
                        );
                        return Ok(Executed {
                            value,
                            strategy: index,
                            strategy_name: strategy.name,
                            attempts: attempt + 1,
                        });
                    }
                    Err(error) => {
                        log_at!(
                            self.strategy_log_level,
                            operation,
                            strategy = strategy.name,
                            attempt = attempt + 1,
                            error = %error,
                            "Strategy failed"
                        );
                        if error.is_unsupported() {
                            unsupported[index] = true;
                        }
                        if unsupported[index + 1..].iter().any(|u| !u) {
                            self.stats.record_fallback(operation);
                        }
                        last_error = Some(error);
                    }
                }
            }

            if unsupported.iter().all(|u| *u) {
                self.stats.record_result(operation, false, started.elapsed());
                let last = last_error.unwrap_or_else(|| MeshError::Unsupported(operation.to_string()));
                debug!(operation, error = %last, "No supported strategy left");
                return Err(ExecutorError::Unsupported {
                    operation: operation.to_string(),
                    last,
                });
            }
        }

        self.stats.record_result(operation, false, started.elapsed());
        let last = last_error.unwrap_or_else(|| MeshError::Transport("no attempt made".to_string()));
        warn!(
            operation,
            attempts = max_attempts,
            error = %last,
            "Operation failed after retries"
        );
        Err(ExecutorError::Exhausted {
            operation: operation.to_string(),
            attempts: max_attempts,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_delay_for_attempt() {
        let p = policy(5);
        assert_eq!(p.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(p.delay_for_attempt(20), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_no_strategies() {
        let executor = FallbackExecutor::new(policy(3));
        let result = executor.execute::<()>("noop", vec![]).await;
        assert!(matches!(result, Err(ExecutorError::NoStrategies { .. })));
    }

    #[tokio::test]
    async fn test_first_strategy_wins() {
        let executor = FallbackExecutor::new(policy(3));
        let result = executor
            .execute(
                "read",
                vec![
                    Strategy::new("fast", || async { Ok(1) }),
                    Strategy::new("slow", || async { Ok(2) }),
                ],
            )
            .await
            .unwrap();
        assert_eq!(result.value, 1);
        assert_eq!(result.strategy_name, "fast");
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_all_unsupported_fails_without_retry() {
        let executor = FallbackExecutor::new(policy(3));
        let calls = AtomicU32::new(0);
        let result = executor
            .execute::<()>(
                "configure",
                vec![Strategy::new("only", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(MeshError::Unsupported("no reporting".into())) }
                })],
            )
            .await;
        assert!(matches!(result, Err(ExecutorError::Unsupported { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_strategy_not_retried() {
        let executor = FallbackExecutor::new(policy(3));
        let first = AtomicU32::new(0);
        let second = AtomicU32::new(0);
        let result = executor
            .execute(
                "bind",
                vec![
                    Strategy::new("reporting", || {
                        first.fetch_add(1, Ordering::SeqCst);
                        async { Err::<u8, _>(MeshError::Unsupported("x".into())) }
                    }),
                    Strategy::new("read", || {
                        let n = second.fetch_add(1, Ordering::SeqCst);
                        async move {
                            if n == 0 {
                                Err(MeshError::Timeout(100))
                            } else {
                                Ok(9)
                            }
                        }
                    }),
                ],
            )
            .await
            .unwrap();
        assert_eq!(result.value, 9);
        assert_eq!(result.attempts, 2);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stats_snapshot_and_reset() {
        let executor = FallbackExecutor::new(policy(1));
        executor
            .execute("read", vec![Strategy::new("a", || async { Ok(()) })])
            .await
            .unwrap();
        let _ = executor
            .execute::<()>(
                "read",
                vec![Strategy::new("a", || async { Err(MeshError::Timeout(1)) })],
            )
            .await;

        let stats = executor.stats().operation("read").unwrap();
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(executor.stats().totals().calls, 2);

        executor.stats().reset();
        assert!(executor.stats().snapshot().is_empty());
    }
}
