use std::fmt;
use std::sync::Arc;

use rand::Rng;
use tracing::trace;

use crate::config::Hook;

use super::budget::jitter;

/// Runs a memory-reclaim action between requests, every `interval` completed requests.
///
/// The interval is redrawn from `[min, max]` after each run.
pub struct OobCollector {
    min: Option<u64>,
    max: u64,
    interval: u64,
    since_last: u64,
    action: Hook,
}

impl fmt::Debug for OobCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OobCollector")
            .field("min", &self.min)
            .field("max", &self.max)
            .field("interval", &self.interval)
            .field("since_last", &self.since_last)
            .finish_non_exhaustive()
    }
}

impl OobCollector {
    pub fn new<R>(min: Option<u64>, max: u64, action: Hook, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        let mut collector = Self { min, max, interval: 0, since_last: 0, action };
        collector.redraw(rng);
        collector
    }

    /// Returns the allocator's free pages to the OS where that is supported.
    pub fn default_action() -> Hook {
        Arc::new(trim_heap)
    }

    #[inline]
    pub fn interval(&self) -> u64 {
        self.interval
    }

    /// Counts one completed request; runs the action when the interval is reached.
    pub fn after_request<R>(&mut self, rng: &mut R) -> bool
    where
        R: Rng + ?Sized,
    {
        self.since_last += 1;
        if self.since_last < self.interval {
            return false;
        }

        trace!(after = self.since_last, "running out-of-band collection");
        (self.action)();
        self.since_last = 0;
        self.redraw(rng);
        true
    }

    fn redraw<R>(&mut self, rng: &mut R)
    where
        R: Rng + ?Sized,
    {
        self.interval = jitter(self.min, self.max, rng).max(1);
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
fn trim_heap() {
    // SAFETY: malloc_trim has no preconditions and only releases free memory.
    unsafe {
        libc::malloc_trim(0);
    }
}

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
fn trim_heap() {}
