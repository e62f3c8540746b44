//! Encrypted message envelope and its transport representation.
//!
//! [`EncryptedEnvelope`] is the in-memory form produced by the orchestrator.
//! [`WireMessage`] is what travels over the chat transport: the field names
//! follow the chat backend's message record (`content`, `encrypted_aes_key`,
//! `iv`, `is_encrypted`) plus the signature and sender. Binary fields are
//! standard base64.
//!
//! # Passthrough
//!
//! `is_encrypted = false` marks a plaintext message. Its `content` is the
//! UTF-8 text itself and the key, IV and signature fields are absent. Ready
//! services never produce such envelopes; they exist so legacy plaintext
//! history still renders.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// Hybrid-encrypted chat message.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptedEnvelope {
    /// AES-GCM ciphertext with tag, or the raw plaintext for passthrough.
    pub ciphertext: Vec<u8>,
    /// Content key wrapped with the recipient's public key.
    pub wrapped_symmetric_key: Vec<u8>,
    /// AES-GCM initialization vector.
    pub iv: Vec<u8>,
    /// Sender's signature over the plaintext.
    pub signature: Vec<u8>,
    /// User id of the sender, as claimed by the sender.
    pub sender_id: String,
    /// False for plaintext passthrough.
    pub is_encrypted: bool,
}

impl EncryptedEnvelope {
    /// Unencrypted message carrying `text` verbatim.
    pub fn plaintext(sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            ciphertext: text.into().into_bytes(),
            wrapped_symmetric_key: Vec::new(),
            iv: Vec::new(),
            signature: Vec::new(),
            sender_id: sender_id.into(),
            is_encrypted: false,
        }
    }

    /// Transport representation.
    ///
    /// Fails only for a passthrough envelope whose content is not UTF-8.
    pub fn to_wire(&self) -> Result<WireMessage, WireError> {
        if !self.is_encrypted {
            let content =
                String::from_utf8(self.ciphertext.clone()).map_err(|_| WireError::NotUtf8)?;
            return Ok(WireMessage {
                content,
                encrypted_aes_key: None,
                iv: None,
                signature: None,
                sender_id: self.sender_id.clone(),
                is_encrypted: false,
            });
        }

        Ok(WireMessage {
            content: STANDARD.encode(&self.ciphertext),
            encrypted_aes_key: Some(STANDARD.encode(&self.wrapped_symmetric_key)),
            iv: Some(STANDARD.encode(&self.iv)),
            signature: Some(STANDARD.encode(&self.signature)),
            sender_id: self.sender_id.clone(),
            is_encrypted: true,
        })
    }

    /// Parse a transport message. Encrypted messages must carry every field.
    pub fn from_wire(wire: &WireMessage) -> Result<Self, WireError> {
        if !wire.is_encrypted {
            return Ok(Self::plaintext(wire.sender_id.clone(), wire.content.clone()));
        }

        Ok(Self {
            ciphertext: decode_field("content", &wire.content)?,
            wrapped_symmetric_key: decode_field(
                "encrypted_aes_key",
                require("encrypted_aes_key", wire.encrypted_aes_key.as_deref())?,
            )?,
            iv: decode_field("iv", require("iv", wire.iv.as_deref())?)?,
            signature: decode_field("signature", require("signature", wire.signature.as_deref())?)?,
            sender_id: wire.sender_id.clone(),
            is_encrypted: true,
        })
    }

    /// JSON text of the transport representation.
    pub fn to_json(&self) -> Result<String, WireError> {
        serde_json::to_string(&self.to_wire()?).map_err(|e| WireError::Json(e.to_string()))
    }

    /// Parse JSON text produced by [`Self::to_json`] or the chat backend.
    pub fn from_json(json: &str) -> Result<Self, WireError> {
        let wire: WireMessage =
            serde_json::from_str(json).map_err(|e| WireError::Json(e.to_string()))?;
        Self::from_wire(&wire)
    }
}

impl std::fmt::Debug for EncryptedEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedEnvelope")
            .field("sender_id", &self.sender_id)
            .field("is_encrypted", &self.is_encrypted)
            .field("ciphertext_len", &self.ciphertext.len())
            .field("wrapped_key_len", &self.wrapped_symmetric_key.len())
            .field("iv_len", &self.iv.len())
            .field("signature_len", &self.signature.len())
            .finish()
    }
}

/// Message record as exchanged with the chat backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Base64 ciphertext, or plaintext when `is_encrypted` is false.
    pub content: String,
    /// Base64 wrapped content key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_aes_key: Option<String>,
    /// Base64 IV.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    /// Base64 signature over the plaintext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// Claimed sender.
    pub sender_id: String,
    /// Whether `content` is ciphertext.
    #[serde(default)]
    pub is_encrypted: bool,
}

fn require<'a>(field: &'static str, value: Option<&'a str>) -> Result<&'a str, WireError> {
    value.ok_or(WireError::MissingField { field })
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, WireError> {
    STANDARD.decode(value).map_err(|e| WireError::Base64 { field, reason: e.to_string() })
}
