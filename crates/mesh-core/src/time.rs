//! Monotonic time abstraction. Kept as a trait (rather than calling
//! `Instant::now()` everywhere) so scheduler/idle-timeout tests can swap in
//! `tokio::time`'s paused virtual clock without touching call sites.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// The real wall clock, backed by `tokio::time::sleep`. `#[tokio::test(start_paused
/// = true)]` callers get deterministic, instantly-advancing sleeps for free.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}
