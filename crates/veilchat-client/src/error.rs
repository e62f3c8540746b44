//! Caller-facing error types.
//!
//! Every failure a caller can observe maps onto one of seven [`ErrorKind`]s.
//! Each kind has a stable, human-readable message safe to show in a UI; no
//! message ever includes key material or internal detail.

use thiserror::Error;
use veilchat_crypto::{CryptoError, ValidationError};

use crate::{directory::DirectoryError, key_store::StorageError};

/// Category of an end-to-end encryption failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Key pair generation or validation of a fresh pair failed.
    KeyGeneration,
    /// Outgoing message could not be encrypted.
    Encryption,
    /// Incoming message could not be decrypted.
    Decryption,
    /// The key directory could not be reached or rejected the request.
    KeyExchange,
    /// A decrypted message's signature did not verify.
    SignatureVerification,
    /// Local key storage failed.
    Storage,
    /// The service could not reach the ready state.
    Initialization,
}

impl ErrorKind {
    /// Stable message for display to end users.
    pub fn user_message(self) -> &'static str {
        match self {
            Self::KeyGeneration => "could not create encryption keys",
            Self::Encryption => "message could not be encrypted",
            Self::Decryption => "message could not be decrypted, possibly corrupted or key mismatch",
            Self::KeyExchange => "could not reach key directory",
            Self::SignatureVerification => "message signature could not be verified",
            Self::Storage => "could not access local key storage",
            Self::Initialization => "secure messaging could not be set up",
        }
    }
}

/// Errors returned by [`crate::EncryptionService`].
///
/// `Clone` so one initialization outcome can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum E2eeError {
    /// Key pair generation failed, or the service is not in a state that
    /// allows generating keys.
    #[error("key generation failed: {reason}")]
    KeyGeneration {
        /// What went wrong
        reason: String,
    },

    /// Encryption of an outgoing message failed.
    #[error("encryption failed: {reason}")]
    Encryption {
        /// What went wrong
        reason: String,
    },

    /// Decryption of an incoming message failed.
    #[error("decryption failed: {reason}")]
    Decryption {
        /// What went wrong
        reason: String,
    },

    /// Directory lookup or upload failed after retries.
    #[error("key exchange failed: {0}")]
    KeyExchange(#[from] DirectoryError),

    /// Local key storage failed.
    #[error("key storage failed: {0}")]
    Storage(#[from] StorageError),

    /// Initialization did not complete.
    #[error("initialization failed: {cause}")]
    Initialization {
        /// The failure that stopped initialization
        #[source]
        cause: Box<E2eeError>,
    },
}

impl E2eeError {
    /// Category of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyGeneration { .. } => ErrorKind::KeyGeneration,
            Self::Encryption { .. } => ErrorKind::Encryption,
            Self::Decryption { .. } => ErrorKind::Decryption,
            Self::KeyExchange(_) => ErrorKind::KeyExchange,
            Self::Storage(_) => ErrorKind::Storage,
            Self::Initialization { .. } => ErrorKind::Initialization,
        }
    }

    /// Stable message for display to end users.
    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }

    pub(crate) fn not_initialized(kind: ErrorKind) -> Self {
        let reason = "not initialized".to_owned();
        match kind {
            ErrorKind::Decryption => Self::Decryption { reason },
            ErrorKind::KeyGeneration => Self::KeyGeneration { reason },
            _ => Self::Encryption { reason },
        }
    }

    pub(crate) fn initialization(cause: Self) -> Self {
        match cause {
            already @ Self::Initialization { .. } => already,
            cause => Self::Initialization { cause: Box::new(cause) },
        }
    }

    pub(crate) fn key_generation(error: impl std::fmt::Display) -> Self {
        Self::KeyGeneration { reason: error.to_string() }
    }

    pub(crate) fn encryption(error: &CryptoError) -> Self {
        Self::Encryption { reason: error.to_string() }
    }
}

impl From<ValidationError> for E2eeError {
    fn from(error: ValidationError) -> Self {
        Self::key_generation(error)
    }
}

/// Non-fatal verification failure carried alongside decrypted plaintext.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("signature verification failed: {reason}")]
pub struct SignatureFailure {
    /// Why the message could not be attributed to its sender
    pub reason: String,
}

impl SignatureFailure {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    /// Always [`ErrorKind::SignatureVerification`].
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::SignatureVerification
    }

    /// Stable message for display to end users.
    pub fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }
}
