//! Key directory: where users publish and look up public keys.
//!
//! [`KeyDirectory`] is the transport seam. [`KeyDirectoryClient`] layers the
//! TTL cache, per-attempt timeouts and the retry policy on top of any
//! directory.

pub(crate) mod cache;
mod chaotic;
mod client;
mod http;
mod memory;

use std::time::Duration;

use async_trait::async_trait;
pub use cache::{CacheLookup, CachedPublicKey, KeyCache, StoreResult};
pub use chaotic::ChaoticKeyDirectory;
pub use client::{FetchedKey, KeyDirectoryClient};
pub use http::{HttpDirectoryConfig, HttpKeyDirectory};
pub use memory::MemoryKeyDirectory;
use thiserror::Error;
pub use veilchat_core::PublicKeyRecord;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Bearer credential presented to the directory.
///
/// Zeroized on drop; `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credential(String);

impl Credential {
    /// Wrap a bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token text, for building the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Directory request failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The user has not published a key.
    #[error("no public key published for user {user_id}")]
    NotFound {
        /// User looked up
        user_id: String,
    },

    /// The credential was missing, expired or not allowed.
    #[error("directory rejected the credential")]
    Unauthorized,

    /// The directory refused the request itself (4xx other than auth).
    #[error("directory rejected the request (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Reason reported by the directory
        message: String,
    },

    /// Server-side failure or throttling. Transient.
    #[error("directory returned HTTP {status}")]
    Status {
        /// HTTP status code
        status: u16,
    },

    /// Connection-level failure. Transient.
    #[error("directory transport error: {0}")]
    Transport(String),

    /// A single attempt exceeded its timeout. Transient.
    #[error("directory request timed out after {0:?}")]
    Timeout(Duration),

    /// The directory answered but the body could not be understood.
    #[error("invalid directory response: {0}")]
    InvalidResponse(String),

    /// The user id cannot name a directory entry.
    #[error("invalid user id {user_id:?}")]
    InvalidUserId {
        /// Rejected id
        user_id: String,
    },

    /// The published key is not a well-formed public key.
    #[error("malformed public key for user {user_id}: {reason}")]
    MalformedKey {
        /// Owner of the key
        user_id: String,
        /// Parse failure
        reason: String,
    },
}

impl DirectoryError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Transport(_) | Self::Timeout(_))
    }
}

/// Remote directory of public keys.
#[async_trait]
pub trait KeyDirectory: Send + Sync + 'static {
    /// Currently published key for `user_id`.
    async fn get_public_key(
        &self,
        user_id: &str,
        credential: &Credential,
    ) -> Result<PublicKeyRecord, DirectoryError>;

    /// Publish `record` for `user_id`. Idempotent. Returns the version the
    /// directory acknowledged.
    async fn put_public_key(
        &self,
        user_id: &str,
        record: &PublicKeyRecord,
        credential: &Credential,
    ) -> Result<u64, DirectoryError>;
}

#[async_trait]
impl<D: KeyDirectory + ?Sized> KeyDirectory for std::sync::Arc<D> {
    async fn get_public_key(
        &self,
        user_id: &str,
        credential: &Credential,
    ) -> Result<PublicKeyRecord, DirectoryError> {
        (**self).get_public_key(user_id, credential).await
    }

    async fn put_public_key(
        &self,
        user_id: &str,
        record: &PublicKeyRecord,
        credential: &Credential,
    ) -> Result<u64, DirectoryError> {
        (**self).put_public_key(user_id, record, credential).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_server_and_network_failures_are_transient() {
        assert!(DirectoryError::Status { status: 503 }.is_transient());
        assert!(DirectoryError::Transport("reset".into()).is_transient());
        assert!(DirectoryError::Timeout(Duration::from_secs(1)).is_transient());

        assert!(!DirectoryError::NotFound { user_id: "bob".into() }.is_transient());
        assert!(!DirectoryError::Unauthorized.is_transient());
        assert!(!DirectoryError::InvalidUserId { user_id: "..".into() }.is_transient());
        assert!(
            !DirectoryError::MalformedKey { user_id: "bob".into(), reason: "x".into() }
                .is_transient()
        );
    }

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("secret-token");

        assert_eq!(format!("{credential:?}"), "Credential(<redacted>)");
        assert_eq!(credential.expose(), "secret-token");
    }
}
