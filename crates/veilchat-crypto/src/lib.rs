//! veilchat Cryptographic Primitives
//!
//! Hybrid encryption building blocks for one-to-one chat messages. Pure
//! functions; callers provide a seeded RNG so tests are deterministic.
//!
//! # Hybrid Scheme
//!
//! Each message gets its own content key. The content key encrypts the
//! message, the recipient's RSA key wraps the content key, and the sender's
//! RSA key signs the plaintext.
//!
//! ```text
//! plaintext ──► AES-256-GCM(content key, fresh IV) ──► ciphertext
//!                    │
//!                    ▼
//! content key ──► RSA-OAEP-SHA256(recipient public key) ──► wrapped key
//!
//! plaintext ──► RSA-PKCS1v15-SHA256(sender private key) ──► signature
//! ```
//!
//! # Security
//!
//! Confidentiality:
//! - Content keys are random per message and zeroized on drop
//! - IVs are random per message, never reused
//!
//! Integrity:
//! - GCM tag covers the ciphertext; a modified ciphertext, IV or wrapped key
//!   fails decryption
//! - The signature covers the plaintext, so it survives re-encryption but
//!   binds the content to the sender's key
//!
//! Key hygiene:
//! - Key material is parsed only through format-checked constructors
//! - [`KeyValidator`] round-trips every generated or loaded key pair before
//!   it is trusted

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod asymmetric;
mod error;
pub mod keys;
mod provider;
pub mod symmetric;
mod validator;

pub use error::{CryptoError, ValidationError};
pub use keys::{KeyPair, PrivateKey, PublicKey, SymmetricKey};
pub use provider::{CryptoProvider, RsaAesProvider};
pub use rand_chacha::ChaCha20Rng;
pub use symmetric::{IV_SIZE, SealedPayload};
pub use validator::KeyValidator;
