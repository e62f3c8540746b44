//! End-to-end message exchange between two users.
//!
//! Alice and Bob each run their own `EncryptionService` with their own key
//! store, sharing one in-memory directory. Covers the happy path, tampering,
//! plaintext passthrough, recipient key expiry and the not-initialized
//! guards.

use std::{sync::Arc, time::Duration};

use veilchat_client::{
    Authenticity, Credential, DirectoryClientConfig, DirectoryError, E2eeError,
    EncryptedEnvelope, EncryptionService, ErrorKind, MemoryKeyDirectory, MemoryKeyStore,
    RetryPolicy, ServiceConfig, SimEnv,
};

fn config() -> ServiceConfig {
    ServiceConfig {
        modulus_bits: 1024,
        keygen_retry: RetryPolicy::immediate(3),
        directory: DirectoryClientConfig {
            retry: RetryPolicy::immediate(3),
            ..DirectoryClientConfig::default()
        },
    }
}

fn service(directory: &MemoryKeyDirectory, seed: u64) -> EncryptionService<SimEnv> {
    EncryptionService::new(
        Arc::new(MemoryKeyStore::new()),
        Arc::new(directory.clone()),
        SimEnv::with_seed(seed),
        config(),
    )
}

async fn alice_and_bob() -> (EncryptionService<SimEnv>, EncryptionService<SimEnv>) {
    let directory = MemoryKeyDirectory::new();
    let alice = service(&directory, 1);
    let bob = service(&directory, 2);

    alice.initialize("alice", Credential::new("alice-token")).await.unwrap();
    bob.initialize("bob", Credential::new("bob-token")).await.unwrap();

    (alice, bob)
}

#[tokio::test]
async fn alice_sends_bob_a_verified_message() {
    let (alice, bob) = alice_and_bob().await;

    let envelope = alice.encrypt_message(b"hi bob", "bob").await.unwrap();
    let message = bob.decrypt_message(&envelope, "alice").await.unwrap();

    assert_eq!(message.plaintext, b"hi bob");
    assert_eq!(message.authenticity, Authenticity::Verified { sender_key_version: 1 });
    assert!(envelope.is_encrypted);
    assert_eq!(envelope.sender_id, "alice");
    assert_ne!(envelope.ciphertext, b"hi bob");
}

#[tokio::test]
async fn sender_cannot_read_her_own_outgoing_message() {
    let (alice, _bob) = alice_and_bob().await;

    let envelope = alice.encrypt_message(b"for bob only", "bob").await.unwrap();
    let result = alice.decrypt_message(&envelope, "alice").await;

    assert_eq!(result, Err(E2eeError::Decryption { reason: "key unwrap failed".into() }));
}

#[tokio::test]
async fn message_survives_wire_transport() {
    let (alice, bob) = alice_and_bob().await;

    let envelope = alice.encrypt_message("héllo 👋".as_bytes(), "bob").await.unwrap();
    let json = envelope.to_json().unwrap();
    let received = EncryptedEnvelope::from_json(&json).unwrap();
    let message = bob.decrypt_message(&received, "alice").await.unwrap();

    assert_eq!(String::from_utf8(message.plaintext.clone()).unwrap(), "héllo 👋");
    assert!(message.is_verified());
}

#[tokio::test]
async fn fresh_iv_and_key_per_message() {
    let (alice, _bob) = alice_and_bob().await;

    let first = alice.encrypt_message(b"same", "bob").await.unwrap();
    let second = alice.encrypt_message(b"same", "bob").await.unwrap();

    assert_ne!(first.iv, second.iv);
    assert_ne!(first.ciphertext, second.ciphertext);
    assert_ne!(first.wrapped_symmetric_key, second.wrapped_symmetric_key);
}

#[tokio::test]
async fn tampered_ciphertext_fails_content_decrypt() {
    let (alice, bob) = alice_and_bob().await;

    let mut envelope = alice.encrypt_message(b"attack at dawn", "bob").await.unwrap();
    envelope.ciphertext[0] ^= 0x01;
    let result = bob.decrypt_message(&envelope, "alice").await;

    assert_eq!(result, Err(E2eeError::Decryption { reason: "content decrypt failed".into() }));
}

#[tokio::test]
async fn tampered_iv_fails_content_decrypt() {
    let (alice, bob) = alice_and_bob().await;

    let mut envelope = alice.encrypt_message(b"attack at dawn", "bob").await.unwrap();
    envelope.iv[11] ^= 0x80;
    let result = bob.decrypt_message(&envelope, "alice").await;

    assert_eq!(result, Err(E2eeError::Decryption { reason: "content decrypt failed".into() }));
}

#[tokio::test]
async fn tampered_wrapped_key_fails_unwrap() {
    let (alice, bob) = alice_and_bob().await;

    let mut envelope = alice.encrypt_message(b"attack at dawn", "bob").await.unwrap();
    envelope.wrapped_symmetric_key[10] ^= 0xFF;
    let result = bob.decrypt_message(&envelope, "alice").await;

    assert_eq!(result, Err(E2eeError::Decryption { reason: "key unwrap failed".into() }));
}

#[tokio::test]
async fn forged_signature_still_yields_plaintext() {
    let (alice, bob) = alice_and_bob().await;

    let mut envelope = alice.encrypt_message(b"trust me", "bob").await.unwrap();
    envelope.signature[0] ^= 0x01;
    let message = bob.decrypt_message(&envelope, "alice").await.unwrap();

    assert_eq!(message.plaintext, b"trust me");
    let failure = message.signature_failure().unwrap();
    assert_eq!(failure.kind(), ErrorKind::SignatureVerification);
    assert_eq!(failure.user_message(), "message signature could not be verified");
}

#[tokio::test]
async fn claimed_sender_must_match_envelope() {
    let (alice, bob) = alice_and_bob().await;

    let envelope = alice.encrypt_message(b"it's me, carol", "bob").await.unwrap();
    let message = bob.decrypt_message(&envelope, "carol").await.unwrap();

    assert!(!message.is_verified());
    assert!(message.signature_failure().is_some());
}

#[tokio::test]
async fn plaintext_passes_through_in_any_state() {
    let directory = MemoryKeyDirectory::new();
    let uninitialized = service(&directory, 3);
    let envelope = EncryptedEnvelope::plaintext("alice", "legacy message");

    let message = uninitialized.decrypt_message(&envelope, "alice").await.unwrap();

    assert_eq!(message.plaintext, b"legacy message");
    assert_eq!(message.authenticity, Authenticity::Plaintext);
}

#[tokio::test]
async fn operations_require_initialization() {
    let (alice, _bob) = alice_and_bob().await;
    let envelope = alice.encrypt_message(b"hello", "bob").await.unwrap();
    let idle = service(&MemoryKeyDirectory::new(), 4);

    let encrypt = idle.encrypt_message(b"hello", "bob").await;
    let decrypt = idle.decrypt_message(&envelope, "alice").await;

    assert_eq!(encrypt, Err(E2eeError::Encryption { reason: "not initialized".into() }));
    assert_eq!(decrypt, Err(E2eeError::Decryption { reason: "not initialized".into() }));
}

#[tokio::test]
async fn unknown_recipient_is_key_exchange_failure() {
    let (alice, _bob) = alice_and_bob().await;

    let error = alice.encrypt_message(b"hello?", "nobody").await.unwrap_err();

    assert_eq!(error, E2eeError::KeyExchange(DirectoryError::NotFound { user_id: "nobody".into() }));
    assert_eq!(error.user_message(), "could not reach key directory");
}

#[tokio::test]
async fn empty_message_roundtrips() {
    let (alice, bob) = alice_and_bob().await;

    let envelope = alice.encrypt_message(b"", "bob").await.unwrap();
    let message = bob.decrypt_message(&envelope, "alice").await.unwrap();

    assert!(message.plaintext.is_empty());
    assert!(message.is_verified());
}

#[tokio::test]
async fn expired_recipient_key_is_fetched_again() {
    let directory = MemoryKeyDirectory::new();
    let env = SimEnv::with_seed(1);
    let alice = EncryptionService::new(
        Arc::new(MemoryKeyStore::new()),
        Arc::new(directory.clone()),
        env.clone(),
        config(),
    );
    let bob = service(&directory, 2);
    alice.initialize("alice", Credential::new("alice-token")).await.unwrap();
    bob.initialize("bob", Credential::new("bob-token")).await.unwrap();
    let baseline = directory.get_count();

    alice.encrypt_message(b"one", "bob").await.unwrap();
    alice.encrypt_message(b"two", "bob").await.unwrap();
    assert_eq!(directory.get_count(), baseline + 1);

    env.advance(config().directory.cache_ttl);
    alice.encrypt_message(b"three", "bob").await.unwrap();
    assert_eq!(directory.get_count(), baseline + 1);

    env.advance(Duration::from_secs(1));
    let envelope = alice.encrypt_message(b"four", "bob").await.unwrap();
    assert_eq!(directory.get_count(), baseline + 2);

    let message = bob.decrypt_message(&envelope, "alice").await.unwrap();
    assert_eq!(message.plaintext, b"four");
}
