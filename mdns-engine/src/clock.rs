//! A small clock abstraction so responder/querier timers can be driven
//! deterministically in tests instead of depending on wall-clock time.
//!
//! `RealClock` delegates to `tokio::time::Instant`, which already returns
//! paused virtual time when a test runs under `#[tokio::test(start_paused =
//! true)]`; `FixedClock` is for synchronous unit tests that construct
//! records without a Tokio runtime at all.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// A source of the current time, abstracted so state-machine logic does not
/// depend directly on `tokio::time::Instant::now()`.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

/// The production clock: wall-clock time via Tokio, which is also what
/// `tokio::time::pause()`/`advance()` intercept in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A manually advanced clock for synchronous tests (no Tokio runtime
/// required). Time starts at the Tokio epoch and only moves when
/// [`FixedClock::advance`] is called.
#[derive(Debug, Default)]
pub struct FixedClock {
    elapsed_millis: AtomicU64,
}

impl FixedClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        self.elapsed_millis
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Instant {
        Instant::now() + Duration::from_millis(self.elapsed_millis.load(Ordering::SeqCst))
    }
}
