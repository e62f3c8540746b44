//! Wire format errors.

use thiserror::Error;

/// Failure to map between [`crate::EncryptedEnvelope`] and its transport form.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// A binary field is not valid standard base64.
    #[error("field `{field}` is not valid base64: {reason}")]
    Base64 {
        /// Wire field name
        field: &'static str,
        /// Decoder message
        reason: String,
    },

    /// An encrypted message lacks a required field.
    #[error("encrypted message is missing `{field}`")]
    MissingField {
        /// Wire field name
        field: &'static str,
    },

    /// Passthrough content must be UTF-8 text.
    #[error("plaintext content is not valid UTF-8")]
    NotUtf8,

    /// JSON encoding or decoding failed.
    #[error("invalid JSON: {0}")]
    Json(String),
}
