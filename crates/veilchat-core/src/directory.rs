//! Key directory wire records.
//!
//! The directory answers `GET /users/{id}/public-key` and accepts
//! `POST /users/{id}/public-key`. Deployed backends wrap payloads as
//! `{"status": "success", "data": {...}}`; minimal ones return the record
//! flat. [`DirectoryResponse`] accepts both.

use serde::{Deserialize, Serialize};

/// A user's published public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    /// SPKI PEM text.
    pub public_key: String,
    /// Monotonic key version, starting at 1.
    pub key_version: u64,
}

/// Body returned by a successful upload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadAck {
    /// Version the directory recorded, when it reports one.
    #[serde(default)]
    pub key_version: Option<u64>,
}

/// Body of a non-success response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorBody {
    /// Human readable reason from the directory.
    #[serde(default)]
    pub message: Option<String>,
}

/// Either the wrapped or the flat form of a directory payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DirectoryResponse<T> {
    /// `{"status": ..., "data": T}`
    Wrapped {
        /// Response status string, informational only.
        #[serde(default)]
        status: Option<String>,
        /// Payload.
        data: T,
    },
    /// `T` at the top level.
    Flat(T),
}

impl<T> DirectoryResponse<T> {
    /// The payload regardless of framing.
    pub fn into_inner(self) -> T {
        match self {
            Self::Wrapped { data, .. } | Self::Flat(data) => data,
        }
    }
}
