//! Error types for cryptographic primitives and key validation.

use thiserror::Error;

/// Errors produced by the primitives adapter.
///
/// Messages never contain key material; they describe which operation failed
/// and, where useful, the underlying library's reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Asymmetric key pair generation failed.
    #[error("key generation failed: {reason}")]
    KeyGeneration {
        /// Why generation failed
        reason: String,
    },

    /// Key material could not be parsed or encoded.
    #[error("invalid key format: {reason}")]
    InvalidKeyFormat {
        /// What was wrong with the material
        reason: String,
    },

    /// Input exceeds what the asymmetric scheme can encrypt.
    #[error("input too large: {len} bytes exceeds limit of {max} bytes")]
    InputTooLarge {
        /// Length of the rejected input
        len: usize,
        /// Largest input the key can wrap
        max: usize,
    },

    /// Encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption {
        /// Why encryption failed
        reason: String,
    },

    /// Decryption failed (wrong key, tampered ciphertext or IV).
    #[error("decryption failed: {reason}")]
    Decryption {
        /// Why decryption failed
        reason: String,
    },

    /// Signing failed.
    #[error("signing failed: {reason}")]
    Signing {
        /// Why signing failed
        reason: String,
    },
}

/// Reasons a key pair fails the functional self-test.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Stored or received material is not a well-formed key.
    #[error("malformed key material: {0}")]
    Malformed(#[from] CryptoError),

    /// The public half does not belong to the private half.
    #[error("public key does not match private key")]
    Mismatch,

    /// A wrap/unwrap or sign/verify round trip did not reproduce its input.
    #[error("round trip failed: {stage}")]
    RoundTrip {
        /// Which round trip failed
        stage: &'static str,
    },
}
