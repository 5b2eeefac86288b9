//! The Unit Scheduler (spec.md §4.1): a single process-wide cooperative
//! scheduler that assigns a slot token ([`Unit`]) to every in-flight
//! message, paces advancement so a slow or flooding peer can't starve
//! others, and lets [`Unit::make_high_priority`] bypass the gate entirely.
//!
//! # Pacing model
//!
//! The scheduler keeps a set of *live* unit IDs (allocated but not yet
//! [`Unit::finish`]ed) and, once per slot, recomputes a `threshold =
//! min(live ids) + current_pace`. A unit clears the gate once its own ID is
//! `<= threshold` or it's flagged high-priority. This is why a leaked unit
//! (never finished) permanently blocks the pace: `min(live ids)` can never
//! advance past it, so `threshold` stalls.
//!
//! `current_pace` adapts every slot: the "work slot" phase (recomputing the
//! minimum live ID and publishing the new threshold) is timed; if it took
//! less than `work_slot_percentage` of the slot duration, the pace is
//! raised by `slot_change_rate_per_streak`, otherwise it's lowered, clamped
//! to `[min_slot_pace, min_slot_pace * PACE_CEILING_MULTIPLIER]`. See
//! `DESIGN.md` for why wall-clock time of the recompute step was chosen as
//! the measurement basis (spec.md leaves this open).

use mesh_core::config::SchedulerConfig;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

/// Upper bound on how far `current_pace` may grow above `min_slot_pace`,
/// so an idle scheduler doesn't let pace drift without limit.
const PACE_CEILING_MULTIPLIER: u64 = 1000;

struct LiveUnit {
    tag: Option<&'static str>,
    created_at: Instant,
}

struct Inner {
    config: SchedulerConfig,
    next_unit_id: AtomicU64,
    threshold: AtomicU64,
    current_pace: AtomicU64,
    notify: Notify,
    live: Mutex<BTreeMap<u64, LiveUnit>>,
    cancel: mesh_core::CancellationToken,
    debug_mode: AtomicBool,
}

/// The process-wide scheduler. Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let scheduler = Self {
            inner: Arc::new(Inner {
                current_pace: AtomicU64::new(config.min_slot_pace),
                config,
                next_unit_id: AtomicU64::new(0),
                threshold: AtomicU64::new(0),
                notify: Notify::new(),
                live: Mutex::new(BTreeMap::new()),
                cancel: mesh_core::CancellationToken::new(),
                debug_mode: AtomicBool::new(false),
            }),
        };
        scheduler.spawn_slot_loop();
        scheduler
    }

    pub fn with_debug_mode(self, enabled: bool) -> Self {
        self.inner.debug_mode.store(enabled, Ordering::Relaxed);
        self
    }

    /// Allocate a unit with the next 64-bit ID and register it as live.
    pub fn new_unit(&self) -> Unit {
        let id = self.inner.next_unit_id.fetch_add(1, Ordering::AcqRel);
        self.inner.live.lock().insert(
            id,
            LiveUnit {
                tag: None,
                created_at: Instant::now(),
            },
        );
        Unit {
            id,
            scheduler: self.inner.clone(),
            priority: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Snapshot of every unit that has not yet called `finish()`, for
    /// debug-mode leak diagnostics.
    pub fn live_units(&self) -> Vec<(u64, Option<&'static str>, Duration)> {
        let now = Instant::now();
        self.inner
            .live
            .lock()
            .iter()
            .map(|(id, info)| (*id, info.tag, now.duration_since(info.created_at)))
            .collect()
    }

    pub fn current_pace(&self) -> u64 {
        self.inner.current_pace.load(Ordering::Relaxed)
    }

    /// Stop the background slot loop. Idempotent.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    fn spawn_slot_loop(&self) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            slot_loop(inner).await;
        });
    }
}

async fn slot_loop(inner: Arc<Inner>) {
    loop {
        tokio::select! {
            _ = inner.cancel.cancelled() => return,
            _ = tokio::time::sleep(inner.config.slot_duration) => {}
        }

        let pace = inner.current_pace.load(Ordering::Relaxed).max(inner.config.min_slot_pace);
        let work_start = Instant::now();

        let min_live = {
            let live = inner.live.lock();
            live.keys().next().copied()
        };
        let next_id = inner.next_unit_id.load(Ordering::Acquire);
        let base = min_live.unwrap_or(next_id);
        inner.threshold.store(base.saturating_add(pace), Ordering::Release);
        inner.notify.notify_waiters();

        let work_elapsed = work_start.elapsed();
        let work_budget = inner
            .config
            .slot_duration
            .mul_f64(inner.config.work_slot_percentage);

        let rate = inner.config.slot_change_rate_per_streak;
        let new_pace = if work_elapsed < work_budget {
            ((pace as f64) * (1.0 + rate)) as u64
        } else {
            ((pace as f64) * (1.0 - rate)) as u64
        };
        let clamped = new_pace
            .max(inner.config.min_slot_pace)
            .min(inner.config.min_slot_pace.saturating_mul(PACE_CEILING_MULTIPLIER));
        inner.current_pace.store(clamped, Ordering::Relaxed);
        trace!(pace = clamped, threshold = base + pace, "scheduler slot tick");

        if inner.debug_mode.load(Ordering::Relaxed) {
            let stuck: Vec<_> = inner
                .live
                .lock()
                .iter()
                .filter(|(_, info)| info.created_at.elapsed() > Duration::from_secs(30))
                .map(|(id, info)| (*id, info.tag))
                .collect();
            for (id, tag) in stuck {
                warn!(unit_id = id, tag, "scheduler unit has been live for over 30s; possible leak");
            }
        }
    }
}

/// A handle attached to one logical message, gating its forward progress
/// through the pipeline (spec.md §3, §4.1).
pub struct Unit {
    id: u64,
    scheduler: Arc<Inner>,
    priority: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl Unit {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block (cooperatively) until the scheduler's threshold has advanced
    /// past this unit's ID, or until it's flagged high-priority.
    pub async fn wait_for_slot(&self) {
        if self.is_high_priority() {
            return;
        }
        loop {
            if self.id <= self.scheduler.threshold.load(Ordering::Acquire) {
                return;
            }
            let notified = self.scheduler.notify.notified();
            if self.id <= self.scheduler.threshold.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }

    /// Mark this unit done; idempotent. Releases it from the live set so
    /// the minimum-live-id watermark can advance past it.
    pub fn finish(&self) {
        if self
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.scheduler.live.lock().remove(&self.id);
        }
    }

    pub fn make_high_priority(&self) {
        self.priority.store(true, Ordering::Release);
    }

    pub fn remove_priority(&self) {
        self.priority.store(false, Ordering::Release);
    }

    pub fn is_high_priority(&self) -> bool {
        self.priority.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Attach a debug tag (typically the call site) surfaced by the
    /// scheduler's leak diagnostics when debug mode is on.
    pub fn debug(&self, tag: &'static str) {
        if let Some(info) = self.scheduler.live.lock().get_mut(&self.id) {
            info.tag = Some(tag);
        }
        debug!(unit_id = self.id, tag, "scheduler unit tagged");
    }

    /// Recycle a finished unit under a fresh ID, for call sites that want
    /// to pipeline a new message through the same `Unit` handle instead of
    /// allocating from the scheduler again.
    pub fn re_use(&mut self) {
        let new_id = self.scheduler.next_unit_id.fetch_add(1, Ordering::AcqRel);
        self.scheduler.live.lock().insert(
            new_id,
            LiveUnit {
                tag: None,
                created_at: Instant::now(),
            },
        );
        self.id = new_id;
        self.finished.store(false, Ordering::Release);
        self.priority.store(false, Ordering::Release);
    }
}

impl Drop for Unit {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::Acquire) {
            warn!(
                unit_id = self.id,
                "scheduler unit dropped without finish(); this leaks forward progress for every \
                 unit behind it"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            slot_duration: Duration::from_millis(5),
            min_slot_pace: 4,
            work_slot_percentage: 0.7,
            slot_change_rate_per_streak: 0.05,
            stat_cycle: Duration::from_secs(1),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn units_clear_in_order_as_slots_advance() {
        let scheduler = Scheduler::new(fast_config());
        let units: Vec<_> = (0..20).map(|_| scheduler.new_unit()).collect();
        for unit in &units {
            tokio::time::timeout(Duration::from_secs(2), unit.wait_for_slot())
                .await
                .expect("unit should eventually clear");
            unit.finish();
        }
        scheduler.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn priority_unit_skips_the_gate() {
        let scheduler = Scheduler::new(SchedulerConfig {
            min_slot_pace: 1,
            slot_duration: Duration::from_secs(10),
            ..fast_config()
        });
        // Flood IDs far ahead so a non-priority unit would never clear in
        // the test's lifetime, then confirm priority still gets through.
        for _ in 0..10_000 {
            let _ = scheduler.new_unit();
        }
        let unit = scheduler.new_unit();
        unit.make_high_priority();
        tokio::time::timeout(Duration::from_millis(200), unit.wait_for_slot())
            .await
            .expect("priority unit must not wait for the pace gate");
        unit.finish();
        scheduler.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn leaked_unit_blocks_units_behind_it() {
        let scheduler = Scheduler::new(fast_config());
        let leaked = scheduler.new_unit();
        std::mem::forget(leaked); // simulate a caller that never calls finish()
        let blocked = scheduler.new_unit();
        let result = tokio::time::timeout(Duration::from_millis(100), blocked.wait_for_slot()).await;
        assert!(result.is_err(), "unit behind a leaked one should stay gated");
        scheduler.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn finish_is_idempotent() {
        let scheduler = Scheduler::new(fast_config());
        let unit = scheduler.new_unit();
        unit.finish();
        unit.finish();
        assert!(unit.is_finished());
        scheduler.shutdown();
    }
}
