//! Environment abstraction for deterministic testing.
//!
//! Decouples key lifecycle and directory logic from system resources (time,
//! randomness). Tests drive the same code with [`crate::SimEnv`], a manual
//! clock with a seeded RNG; production uses real system resources.

use std::time::Duration;

use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};

/// Abstract environment providing time, randomness, and async sleep.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    type Instant: Copy + Ord + Send + Sync + std::fmt::Debug + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Used for retry backoff and per-attempt timeouts.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// RNG for a single cryptographic operation, seeded from this environment.
    ///
    /// The crypto provider never touches global entropy; every key, IV and
    /// padding byte traces back to `random_bytes`.
    fn crypto_rng(&self) -> ChaCha20Rng {
        let mut seed = [0u8; 32];
        self.random_bytes(&mut seed);
        ChaCha20Rng::from_seed(seed)
    }
}
