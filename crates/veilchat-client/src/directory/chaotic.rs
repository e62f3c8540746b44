//! Chaotic directory wrapper for fault injection testing
//!
//! Directory wrapper that fails requests to exercise retry, timeout and
//! degraded-state handling. Failures are either random with a fixed seed
//! (reproducible), the first N requests, or every request hanging forever.

#![allow(clippy::disallowed_types, reason = "Locking simple RNG state")]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{Credential, DirectoryError, KeyDirectory, PublicKeyRecord};

/// How the wrapper decides to fail a request.
#[derive(Debug, Clone, Copy)]
enum Chaos {
    /// Fail with probability `rate`.
    Random { rate: f64 },
    /// Fail this many requests, then pass everything through.
    FirstN { remaining: usize },
    /// Never complete.
    Hang,
}

/// Directory wrapper that injects transport failures.
///
/// Delegates to an underlying directory. Injected failures are
/// [`DirectoryError::Transport`], which the client treats as transient.
/// Clone shares the RNG and counters.
#[derive(Clone)]
pub struct ChaoticKeyDirectory<D: KeyDirectory> {
    inner: D,
    state: Arc<Mutex<ChaosState>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    Pass,
    Fail,
    Hang,
}

struct ChaosState {
    chaos: Chaos,
    rng: ChaoticRng,
    requests: usize,
    injected: usize,
}

/// Simple deterministic RNG for chaos injection
///
/// Linear congruential generator; reproducible for a given seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<D: KeyDirectory> ChaoticKeyDirectory<D> {
    /// Fail requests at random with the default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: D, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Fail requests at random with an explicit seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: D, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self::with_chaos(inner, Chaos::Random { rate: failure_rate }, seed)
    }

    /// Fail the first `count` requests, then behave normally.
    pub fn failing_first(inner: D, count: usize) -> Self {
        Self::with_chaos(inner, Chaos::FirstN { remaining: count }, 0)
    }

    /// Never answer. For timeout tests.
    pub fn hanging(inner: D) -> Self {
        Self::with_chaos(inner, Chaos::Hang, 0)
    }

    fn with_chaos(inner: D, chaos: Chaos, seed: u64) -> Self {
        Self {
            inner,
            state: Arc::new(Mutex::new(ChaosState {
                chaos,
                rng: ChaoticRng::new(seed),
                requests: 0,
                injected: 0,
            })),
        }
    }

    /// Underlying directory (for checking state after chaos).
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Requests received, including failed ones.
    pub fn request_count(&self) -> usize {
        self.lock().requests
    }

    /// Requests that were failed on purpose.
    pub fn injected_failures(&self) -> usize {
        self.lock().injected
    }

    /// Record a request and decide its fate.
    fn decide(&self) -> Fate {
        let mut state = self.lock();
        state.requests += 1;

        let chaos = state.chaos;
        let fate = match chaos {
            Chaos::Random { rate } if state.rng.next() < rate => Fate::Fail,
            Chaos::Random { .. } | Chaos::FirstN { remaining: 0 } => Fate::Pass,
            Chaos::FirstN { remaining } => {
                state.chaos = Chaos::FirstN { remaining: remaining - 1 };
                Fate::Fail
            },
            Chaos::Hang => Fate::Hang,
        };

        if fate == Fate::Fail {
            state.injected += 1;
        }
        fate
    }

    async fn gate(&self) -> Result<(), DirectoryError> {
        match self.decide() {
            Fate::Pass => Ok(()),
            Fate::Fail => Err(DirectoryError::Transport("chaotic failure injection".to_owned())),
            Fate::Hang => std::future::pending().await,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChaosState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<D: KeyDirectory> KeyDirectory for ChaoticKeyDirectory<D> {
    async fn get_public_key(
        &self,
        user_id: &str,
        credential: &Credential,
    ) -> Result<PublicKeyRecord, DirectoryError> {
        self.gate().await?;
        self.inner.get_public_key(user_id, credential).await
    }

    async fn put_public_key(
        &self,
        user_id: &str,
        record: &PublicKeyRecord,
        credential: &Credential,
    ) -> Result<u64, DirectoryError> {
        self.gate().await?;
        self.inner.put_public_key(user_id, record, credential).await
    }
}
