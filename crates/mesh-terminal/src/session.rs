//! Session / rate limit (spec.md §4.6): per-Terminal suspicion and op-count
//! counters with soft and permanent rate limits, plus a concurrency pool
//! for bounding simultaneous setup work.

use mesh_core::{CancellationToken, ErrorId, MeshError};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Standard `report_suspicious_activity` weights (spec.md §4.6).
pub mod suspicion_factor {
    pub const COMMON: i64 = 1;
    pub const UNUSUAL: i64 = 5;
    pub const QUITE_UNUSUAL: i64 = 10;
    pub const MUST_BE_MALICIOUS: i64 = 100;
}

const CONCURRENCY_POOL_SIZE: usize = 30;

struct Inner {
    started_at: Instant,
    op_count: AtomicU64,
    suspicion_score: AtomicI64,
    permanently_blocked: std::sync::atomic::AtomicBool,
    concurrency_pool: Semaphore,
}

/// Per-Terminal rate-limiting and suspicion state. Cheaply cloneable.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                started_at: Instant::now(),
                op_count: AtomicU64::new(0),
                suspicion_score: AtomicI64::new(0),
                permanently_blocked: std::sync::atomic::AtomicBool::new(false),
                concurrency_pool: Semaphore::new(CONCURRENCY_POOL_SIZE),
            }),
        }
    }

    fn elapsed_secs(&self) -> f64 {
        self.inner.started_at.elapsed().as_secs_f64().max(1.0 / 1000.0)
    }

    pub fn op_count(&self) -> u64 {
        self.inner.op_count.load(Ordering::Relaxed)
    }

    pub fn suspicion_score(&self) -> i64 {
        self.inner.suspicion_score.load(Ordering::Relaxed)
    }

    /// Add `factor` to the suspicion score. Standard factors live in
    /// [`suspicion_factor`].
    pub fn report_suspicious_activity(&self, factor: i64) {
        self.inner.suspicion_score.fetch_add(factor, Ordering::Relaxed);
    }

    /// Checks suspicion first, then op-rate; increments `op_count` whenever
    /// the call is allowed through (spec.md: "op_count increments on every
    /// rate-limited operation slot").
    pub fn rate_limit(&self) -> mesh_core::Result<()> {
        if self.inner.permanently_blocked.load(Ordering::Relaxed) {
            return Err(MeshError::local(ErrorId::RateLimited));
        }

        let elapsed = self.elapsed_secs();
        let score = self.suspicion_score();
        if score > 25 && (score as f64 / elapsed) > 1.0 {
            if score > 2500 {
                let op_count = self.op_count().max(1);
                if (score as f64) > 0.8 * (op_count as f64) {
                    self.inner.permanently_blocked.store(true, Ordering::Relaxed);
                }
            }
            return Err(MeshError::local(ErrorId::RateLimited));
        }

        let count = self.op_count();
        if count > 250 && (count as f64 / elapsed) > 5.0 {
            return Err(MeshError::local(ErrorId::RateLimited));
        }

        self.inner.op_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Acquire a slot from the 30-wide concurrency pool before running
    /// `work`, cancellable via `cancel`.
    pub async fn limit_concurrency<F, T>(&self, cancel: &CancellationToken, work: F) -> mesh_core::Result<T>
    where
        F: std::future::Future<Output = T>,
    {
        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(MeshError::local(ErrorId::Canceled)),
            permit = self.inner.concurrency_pool.acquire() => permit,
        };
        let permit = permit.map_err(|_| MeshError::local(ErrorId::Internal))?;
        let result = work.await;
        drop(permit);
        Ok(result)
    }

    pub fn started_at_elapsed(&self) -> Duration {
        self.inner.started_at.elapsed()
    }
}
