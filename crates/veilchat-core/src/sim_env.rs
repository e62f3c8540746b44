//! Deterministic environment for tests and simulations.
//!
//! The clock only moves when something sleeps or a test calls
//! [`SimEnv::advance`]. Sleeping advances the clock by the full duration the
//! first time the sleep is polled, then yields once so racing futures get a
//! turn. A `select!` between an operation and its timeout therefore only
//! consumes simulated time when the operation is actually pending.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]
#![allow(clippy::disallowed_methods, reason = "Single origin instant, never re-read")]

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use rand_chacha::{
    ChaCha20Rng,
    rand_core::{RngCore, SeedableRng},
};

use crate::env::Environment;

/// Manual clock plus seeded RNG. Clones share the same clock and RNG.
#[derive(Clone)]
pub struct SimEnv {
    origin: Instant,
    inner: Arc<Mutex<SimState>>,
}

struct SimState {
    elapsed: Duration,
    rng: ChaCha20Rng,
    sleeps: Vec<Duration>,
}

impl SimEnv {
    /// Create an environment whose randomness is fully determined by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            origin: Instant::now(),
            inner: Arc::new(Mutex::new(SimState {
                elapsed: Duration::ZERO,
                rng: ChaCha20Rng::seed_from_u64(seed),
                sleeps: Vec::new(),
            })),
        }
    }

    /// Move the clock forward without sleeping.
    pub fn advance(&self, duration: Duration) {
        self.state().elapsed += duration;
    }

    /// Total simulated time since creation.
    pub fn elapsed(&self) -> Duration {
        self.state().elapsed
    }

    /// Every duration passed to a sleep that was actually awaited, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state().sleeps.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("elapsed", &self.elapsed()).finish_non_exhaustive()
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        let env = self.clone();
        async move {
            {
                let mut state = env.state();
                state.elapsed += duration;
                state.sleeps.push(duration);
            }
            tokio::task::yield_now().await;
        }
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.state().rng.fill_bytes(buffer);
    }
}
