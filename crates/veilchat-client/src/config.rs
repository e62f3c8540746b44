//! Service configuration.

use std::time::Duration;

use veilchat_core::RetryPolicy;
use veilchat_crypto::asymmetric::DEFAULT_MODULUS_BITS;

use crate::directory::cache::{DEFAULT_CAPACITY, DEFAULT_TTL};

/// Settings for [`crate::KeyDirectoryClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryClientConfig {
    /// How long a fetched key is served from cache.
    pub cache_ttl: Duration,
    /// Maximum number of cached keys.
    pub cache_capacity: usize,
    /// Retry policy for fetches and uploads.
    pub retry: RetryPolicy,
    /// Upper bound on a single directory attempt.
    pub attempt_timeout: Duration,
}

impl Default for DirectoryClientConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_TTL,
            cache_capacity: DEFAULT_CAPACITY,
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

/// Settings for [`crate::EncryptionService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// RSA modulus size for generated keys.
    pub modulus_bits: usize,
    /// Retry policy for generate-then-validate.
    pub keygen_retry: RetryPolicy,
    /// Directory client settings.
    pub directory: DirectoryClientConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            modulus_bits: DEFAULT_MODULUS_BITS,
            keygen_retry: RetryPolicy {
                base_delay: Duration::from_millis(50),
                ..RetryPolicy::default()
            },
            directory: DirectoryClientConfig::default(),
        }
    }
}
