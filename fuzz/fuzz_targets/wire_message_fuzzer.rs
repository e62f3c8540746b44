//! Fuzz target for inbound chat message decoding
//!
//! Messages arrive as JSON from the chat backend and are fully attacker
//! controlled.
//!
//! # Strategy
//!
//! - Raw text: arbitrary bytes fed to the JSON decoder
//! - Structured: well-formed JSON whose fields hold arbitrary strings, so the
//!   base64 and required-field checks are reached
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - Any envelope that decodes re-encodes to a message that decodes to the
//!   same envelope

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use veilchat_core::{EncryptedEnvelope, WireMessage};

#[derive(Debug, Arbitrary)]
enum Input {
    Raw(Vec<u8>),
    Structured {
        content: String,
        encrypted_aes_key: Option<String>,
        iv: Option<String>,
        signature: Option<String>,
        sender_id: String,
        is_encrypted: bool,
    },
}

fuzz_target!(|input: Input| {
    let decoded = match input {
        Input::Raw(bytes) => match std::str::from_utf8(&bytes) {
            Ok(text) => EncryptedEnvelope::from_json(text),
            Err(_) => return,
        },
        Input::Structured { content, encrypted_aes_key, iv, signature, sender_id, is_encrypted } => {
            EncryptedEnvelope::from_wire(&WireMessage {
                content,
                encrypted_aes_key,
                iv,
                signature,
                sender_id,
                is_encrypted,
            })
        },
    };

    if let Ok(envelope) = decoded {
        let wire = envelope.to_wire().expect("decoded envelope must encode");
        let again = EncryptedEnvelope::from_wire(&wire).expect("re-encoded envelope must decode");
        assert_eq!(again, envelope);
    }
});
