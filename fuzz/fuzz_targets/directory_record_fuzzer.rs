//! Fuzz target for key directory responses
//!
//! The directory is a remote service; its responses and the PEM text inside
//! them are untrusted.
//!
//! # Invariants
//!
//! - NEVER panic on malformed JSON or PEM
//! - A PEM that parses re-serializes to text that parses to the same key

#![no_main]

use libfuzzer_sys::fuzz_target;
use veilchat_core::{PublicKeyRecord, directory::DirectoryResponse};
use veilchat_crypto::PublicKey;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(response) = serde_json::from_str::<DirectoryResponse<PublicKeyRecord>>(text) {
        let _ = PublicKey::from_pem(&response.into_inner().public_key);
    }

    if let Ok(key) = PublicKey::from_pem(text) {
        let again = PublicKey::from_pem(key.to_pem()).expect("serialized key must parse");
        assert_eq!(again, key);
    }
});
