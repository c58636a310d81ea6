/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 * All rights reserved.
 *
 * This source code is licensed under the BSD-style license found in the
 * LICENSE file in the root directory of this source tree.
 */

//! The clock controls all time-dependent behavior in the submitter:
//! death-info deadlines, cancellation backoff, and the timeout sweeper all
//! read time and sleep through it, so tests can drive them in simulated
//! time.

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use tokio::sync::Notify;
use tokio::time::Duration;
use tokio::time::Instant;

/// A source of milliseconds and sleeps.
pub trait Clock {
    /// Milliseconds elapsed since the clock's epoch. Monotone.
    fn now_ms(&self) -> u64;

    /// Sleep for the specified duration.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}

/// An adapter selecting between the real clock for production use and the
/// simulated clock for tests.
#[derive(Debug, Clone)]
pub enum ClockKind {
    /// Wall-clock time via tokio.
    Real(RealClock),
    /// Manually advanced time.
    Sim(SimClock),
}

impl Default for ClockKind {
    fn default() -> Self {
        Self::Real(RealClock)
    }
}

impl Clock for ClockKind {
    fn now_ms(&self) -> u64 {
        match self {
            Self::Real(clock) => clock.now_ms(),
            Self::Sim(clock) => clock.now_ms(),
        }
    }

    async fn sleep(&self, duration: Duration) {
        match self {
            Self::Real(clock) => clock.sleep(duration).await,
            Self::Sim(clock) => clock.sleep(duration).await,
        }
    }
}

static REAL_CLOCK_EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// An adapter for tokio time, for production use. Milliseconds are counted
/// from the first use of the clock in this process.
#[derive(Debug, Clone)]
pub struct RealClock;

impl Clock for RealClock {
    fn now_ms(&self) -> u64 {
        REAL_CLOCK_EPOCH.elapsed().as_millis() as u64
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[derive(Debug)]
struct SimState {
    now_ms: AtomicU64,
    advanced: Notify,
}

/// A manually advanced clock. Clones share time; sleepers wake when an
/// `advance` moves the clock past their deadline.
#[derive(Debug, Clone)]
pub struct SimClock {
    state: Arc<SimState>,
}

impl SimClock {
    /// Create a simulated clock at time zero.
    pub fn new() -> Self {
        Self {
            state: Arc::new(SimState {
                now_ms: AtomicU64::new(0),
                advanced: Notify::new(),
            }),
        }
    }

    /// Advance the clock by `ms` milliseconds, waking eligible sleepers.
    pub fn advance(&self, ms: u64) {
        self.state.now_ms.fetch_add(ms, Ordering::SeqCst);
        self.state.advanced.notify_waiters();
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.state.now_ms.load(Ordering::SeqCst)
    }

    async fn sleep(&self, duration: Duration) {
        let deadline = self.now_ms() + duration.as_millis() as u64;
        loop {
            // Register for wakeup before checking, so an advance between
            // the check and the await is not lost.
            let advanced = self.state.advanced.notified();
            if self.now_ms() >= deadline {
                return;
            }
            advanced.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sim_clock_advance() {
        let clock = SimClock::new();
        assert_eq!(clock.now_ms(), 0);
        clock.advance(250);
        assert_eq!(clock.now_ms(), 250);

        let sleeper = clock.clone();
        let handle = tokio::spawn(async move {
            sleeper.sleep(Duration::from_millis(100)).await;
        });
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        clock.advance(100);
        handle.await.unwrap();
        assert_eq!(clock.now_ms(), 350);
    }

    #[tokio::test]
    async fn test_sim_clock_sleep_already_elapsed() {
        let clock = SimClock::new();
        clock.advance(10);
        // A zero-length sleep returns without an advance.
        clock.sleep(Duration::from_millis(0)).await;
    }

    #[test]
    fn test_real_clock_monotone() {
        let a = RealClock.now_ms();
        let b = RealClock.now_ms();
        assert!(b >= a);
    }
}
