//! Encryption orchestrator.
//!
//! [`EncryptionService`] owns the local key pair and drives the hybrid
//! scheme on top of the key store, the directory client and the crypto
//! provider.
//!
//! # Lifecycle
//!
//! ```text
//!                 initialize
//! Uninitialized ─────────────► Initializing ──ok──► Ready ◄─┐
//!       ▲                           │                 │     │ rotate ok
//!       │ logout                    │ err             ├─────┘
//!       │                           ▼                 │ rotate err
//!       └──────────────────────── Error ◄─────────────┘
//!                                   │ initialize
//!                                   └──────────► Initializing
//! ```
//!
//! Concurrent `initialize` calls for the same user share one in-flight
//! attempt: the first caller installs a shared future and every later caller
//! awaits a clone of it. The transition to `Ready` or `Error` happens inside
//! that future, so it runs exactly once no matter how many callers are
//! waiting or which of them drives it. A caller for a different user waits
//! for the in-flight attempt to settle and then starts its own.
//!
//! Each attempt carries an id. An attempt only commits its outcome while it
//! is still the current one, so a logout or a newer attempt is never undone.
//! Rotation likewise commits only onto the session it started from, and
//! logout is serialized with rotation so a cleared key is never written back.
//!
//! # Ordering
//!
//! A new private key is written to the key store before its public half is
//! uploaded. A stored but unpublished key is recovered on the next
//! initialization by re-uploading; a published key whose private half was
//! lost could never be recovered.

#![allow(clippy::disallowed_types, reason = "Lifecycle lock is never held across an await")]

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use veilchat_core::{EncryptedEnvelope, Environment};
use veilchat_crypto::{CryptoProvider, KeyPair, KeyValidator, PublicKey, RsaAesProvider, SymmetricKey};
use zeroize::Zeroizing;

use crate::{
    config::ServiceConfig,
    directory::{Credential, DirectoryError, KeyDirectory, KeyDirectoryClient},
    error::{E2eeError, ErrorKind, SignatureFailure},
    key_store::{KeyStore, StoredKey},
};

type InitAttempt = Shared<BoxFuture<'static, Result<Arc<Session>, E2eeError>>>;

/// Externally visible lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// No key pair loaded.
    Uninitialized,
    /// An initialization attempt is in flight.
    Initializing,
    /// Encryption and decryption are available.
    Ready,
    /// The last initialization or rotation failed.
    Error,
}

/// Point-in-time view of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    /// Lifecycle state.
    pub state: ServiceState,
    /// User the service is initialized (or initializing) for.
    pub user_id: Option<String>,
    /// Version of the active key pair, when ready.
    pub key_version: Option<u64>,
    /// Failure that put the service in the error state.
    pub last_error: Option<E2eeError>,
    /// The directory could not confirm the local key at initialization.
    pub degraded: bool,
}

/// Whether a decrypted message is attributable to its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authenticity {
    /// Signature verified against the sender's published key.
    Verified {
        /// Version of the sender key that verified the signature
        sender_key_version: u64,
    },
    /// Content decrypted but the sender could not be confirmed.
    Unverified(SignatureFailure),
    /// The message was never encrypted.
    Plaintext,
}

/// Result of [`EncryptionService::decrypt_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedMessage {
    /// Decrypted content.
    pub plaintext: Vec<u8>,
    /// Signature outcome.
    pub authenticity: Authenticity,
}

impl DecryptedMessage {
    /// Whether the signature verified.
    pub fn is_verified(&self) -> bool {
        matches!(self.authenticity, Authenticity::Verified { .. })
    }

    /// The verification failure, if the signature did not verify.
    pub fn signature_failure(&self) -> Option<&SignatureFailure> {
        match &self.authenticity {
            Authenticity::Unverified(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Immutable snapshot of an initialized user. Replaced wholesale on rotation
/// so in-flight operations finish under the key they started with.
struct Session {
    user_id: String,
    credential: Credential,
    key_pair: KeyPair,
    degraded: bool,
}

enum Lifecycle {
    Uninitialized,
    Initializing { user_id: String, attempt_id: u64, attempt: InitAttempt },
    Ready(Arc<Session>),
    Error { user_id: String, error: E2eeError },
}

struct Inner<E: Environment> {
    provider: Arc<dyn CryptoProvider>,
    validator: KeyValidator,
    key_store: Arc<dyn KeyStore>,
    directory: KeyDirectoryClient<E>,
    env: E,
    config: ServiceConfig,
    lifecycle: Mutex<Lifecycle>,
    next_attempt: AtomicU64,
    rotation: tokio::sync::Mutex<()>,
}

/// End-to-end encryption for one local user.
///
/// Cheap to clone; clones share state.
pub struct EncryptionService<E: Environment> {
    inner: Arc<Inner<E>>,
}

impl<E: Environment> Clone for EncryptionService<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E: Environment> EncryptionService<E> {
    /// Service using RSA/AES with the configured modulus size.
    pub fn new(
        key_store: Arc<dyn KeyStore>,
        directory: Arc<dyn KeyDirectory>,
        env: E,
        config: ServiceConfig,
    ) -> Self {
        let provider = Arc::new(RsaAesProvider::with_modulus_bits(config.modulus_bits));
        Self::with_provider(provider, key_store, directory, env, config)
    }

    /// Service using a caller-supplied crypto provider.
    pub fn with_provider(
        provider: Arc<dyn CryptoProvider>,
        key_store: Arc<dyn KeyStore>,
        directory: Arc<dyn KeyDirectory>,
        env: E,
        config: ServiceConfig,
    ) -> Self {
        let directory = KeyDirectoryClient::with_config(directory, env.clone(), &config.directory);
        Self {
            inner: Arc::new(Inner {
                validator: KeyValidator::new(Arc::clone(&provider)),
                provider,
                key_store,
                directory,
                env,
                config,
                lifecycle: Mutex::new(Lifecycle::Uninitialized),
                next_attempt: AtomicU64::new(0),
                rotation: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The directory client, shared with the service.
    pub fn directory(&self) -> &KeyDirectoryClient<E> {
        &self.inner.directory
    }

    /// Load or create the key pair for `user_id` and publish it.
    ///
    /// A no-op when already ready for the same user. Joins the in-flight
    /// attempt for the same user. An attempt for another user is awaited
    /// first and then replaced.
    ///
    /// # Errors
    ///
    /// `Initialization` wrapping the failure that stopped the attempt.
    pub async fn initialize(&self, user_id: &str, credential: Credential) -> Result<(), E2eeError> {
        loop {
            let (attempt, ours) = {
                let mut lifecycle = self.inner.lock();
                match &*lifecycle {
                    Lifecycle::Ready(session) if session.user_id == user_id => return Ok(()),
                    Lifecycle::Initializing { user_id: pending, attempt, .. } => {
                        (attempt.clone(), pending == user_id)
                    },
                    _ => (self.start_initialize(&mut lifecycle, user_id, credential.clone()), true),
                }
            };

            if ours {
                return attempt.await.map(|_| ());
            }

            tracing::debug!(user_id, "waiting for another user's initialization to settle");
            let _ = attempt.await;
        }
    }

    fn start_initialize(
        &self,
        lifecycle: &mut Lifecycle,
        user_id: &str,
        credential: Credential,
    ) -> InitAttempt {
        let attempt_id = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);
        let owned_user = user_id.to_owned();
        let attempt = async move { inner.run_initialize(attempt_id, owned_user, credential).await }
            .boxed()
            .shared();

        *lifecycle = Lifecycle::Initializing {
            user_id: user_id.to_owned(),
            attempt_id,
            attempt: attempt.clone(),
        };
        attempt
    }

    /// Encrypt `plaintext` for `recipient_id` and sign it with our key.
    ///
    /// # Errors
    ///
    /// - `Encryption("not initialized")` unless ready
    /// - `KeyExchange` if the recipient's key cannot be obtained
    /// - `Encryption` if a primitive fails
    pub async fn encrypt_message(
        &self,
        plaintext: &[u8],
        recipient_id: &str,
    ) -> Result<EncryptedEnvelope, E2eeError> {
        let session =
            self.inner.session().ok_or_else(|| E2eeError::not_initialized(ErrorKind::Encryption))?;
        let recipient =
            self.inner.directory.fetch_public_key(recipient_id, &session.credential).await?;

        let provider = &self.inner.provider;
        let mut rng = self.inner.env.crypto_rng();

        let content_key = provider.generate_symmetric_key(&mut rng);
        let sealed = provider
            .encrypt_symmetric(plaintext, &content_key, &mut rng)
            .map_err(|e| E2eeError::encryption(&e))?;
        let wrapped_symmetric_key = provider
            .encrypt_asymmetric(content_key.as_bytes(), &recipient.public_key, &mut rng)
            .map_err(|e| E2eeError::encryption(&e))?;
        let signature = provider
            .sign(plaintext, session.key_pair.private_key())
            .map_err(|e| E2eeError::encryption(&e))?;

        tracing::debug!(
            recipient_id,
            recipient_version = recipient.version,
            len = plaintext.len(),
            "message encrypted"
        );

        Ok(EncryptedEnvelope {
            ciphertext: sealed.ciphertext,
            wrapped_symmetric_key,
            iv: sealed.iv.to_vec(),
            signature,
            sender_id: session.user_id.clone(),
            is_encrypted: true,
        })
    }

    /// Decrypt an envelope addressed to us and check the sender's signature.
    ///
    /// A signature that does not verify does not fail decryption; it is
    /// reported through [`DecryptedMessage::authenticity`].
    ///
    /// # Errors
    ///
    /// - `Decryption("not initialized")` unless ready (plaintext passes
    ///   through in any state)
    /// - `Decryption("key unwrap failed")` if the envelope was not wrapped
    ///   for our current key
    /// - `Decryption("content decrypt failed")` if the ciphertext or IV was
    ///   modified
    pub async fn decrypt_message(
        &self,
        envelope: &EncryptedEnvelope,
        sender_id: &str,
    ) -> Result<DecryptedMessage, E2eeError> {
        if !envelope.is_encrypted {
            return Ok(DecryptedMessage {
                plaintext: envelope.ciphertext.clone(),
                authenticity: Authenticity::Plaintext,
            });
        }

        let session =
            self.inner.session().ok_or_else(|| E2eeError::not_initialized(ErrorKind::Decryption))?;
        let provider = &self.inner.provider;

        let content_key = provider
            .decrypt_asymmetric(&envelope.wrapped_symmetric_key, session.key_pair.private_key())
            .map(Zeroizing::new)
            .and_then(|bytes| SymmetricKey::from_slice(&bytes))
            .map_err(|_| E2eeError::Decryption { reason: "key unwrap failed".to_owned() })?;
        let plaintext = provider
            .decrypt_symmetric(&envelope.ciphertext, &envelope.iv, &content_key)
            .map_err(|_| E2eeError::Decryption { reason: "content decrypt failed".to_owned() })?;

        let authenticity = self.inner.verify_sender(&session, &plaintext, envelope, sender_id).await;
        if let Authenticity::Unverified(failure) = &authenticity {
            tracing::warn!(sender_id, reason = %failure.reason, "message signature not verified");
        }

        Ok(DecryptedMessage { plaintext, authenticity })
    }

    /// Replace the key pair with a new version and publish it.
    ///
    /// Envelopes encrypted to the previous key can no longer be decrypted.
    /// Serialized against itself; encryptions already in flight finish
    /// under the old key.
    ///
    /// # Errors
    ///
    /// - `KeyGeneration("not initialized")` unless ready for `user_id`
    /// - The failing step's error otherwise; the service moves to `Error`
    pub async fn rotate_keys(&self, user_id: &str, credential: Credential) -> Result<u64, E2eeError> {
        let _rotation = self.inner.rotation.lock().await;

        let session = match self.inner.session() {
            Some(session) if session.user_id == user_id => session,
            _ => return Err(E2eeError::not_initialized(ErrorKind::KeyGeneration)),
        };

        let result = self.inner.rotate(&session, credential).await;

        let mut lifecycle = self.inner.lock();
        if !matches!(&*lifecycle, Lifecycle::Ready(active) if Arc::ptr_eq(active, &session)) {
            // Another user initialized while the new pair was generated
            tracing::debug!(user_id, "rotation superseded, session left unchanged");
            return result.map(|rotated| rotated.key_pair.version());
        }

        match result {
            Ok(rotated) => {
                let version = rotated.key_pair.version();
                tracing::info!(user_id, version, "key pair rotated");
                *lifecycle = Lifecycle::Ready(rotated);
                Ok(version)
            },
            Err(error) => {
                tracing::warn!(user_id, %error, "key rotation failed");
                *lifecycle =
                    Lifecycle::Error { user_id: user_id.to_owned(), error: error.clone() };
                Err(error)
            },
        }
    }

    /// Snapshot of the lifecycle.
    pub fn status(&self) -> Status {
        match &*self.inner.lock() {
            Lifecycle::Uninitialized => Status {
                state: ServiceState::Uninitialized,
                user_id: None,
                key_version: None,
                last_error: None,
                degraded: false,
            },
            Lifecycle::Initializing { user_id, .. } => Status {
                state: ServiceState::Initializing,
                user_id: Some(user_id.clone()),
                key_version: None,
                last_error: None,
                degraded: false,
            },
            Lifecycle::Ready(session) => Status {
                state: ServiceState::Ready,
                user_id: Some(session.user_id.clone()),
                key_version: Some(session.key_pair.version()),
                last_error: None,
                degraded: session.degraded,
            },
            Lifecycle::Error { user_id, error } => Status {
                state: ServiceState::Error,
                user_id: Some(user_id.clone()),
                key_version: None,
                last_error: Some(error.clone()),
                degraded: false,
            },
        }
    }

    /// Our current public key, when ready.
    pub fn public_key(&self) -> Option<PublicKey> {
        self.inner.session().map(|session| session.key_pair.public_key().clone())
    }

    /// Drop the session and the key cache and return to `Uninitialized`.
    ///
    /// With `clear_stored`, also delete the user's private key from the key
    /// store, so the next initialization generates a new pair.
    ///
    /// Waits for a rotation in progress, and for an abandoned initialization
    /// to finish its key store writes, before clearing.
    pub async fn logout(&self, clear_stored: bool) -> Result<(), E2eeError> {
        let _rotation = self.inner.rotation.lock().await;

        let previous = std::mem::replace(&mut *self.inner.lock(), Lifecycle::Uninitialized);

        let user_id = match previous {
            Lifecycle::Uninitialized => None,
            Lifecycle::Initializing { user_id, attempt, .. } => {
                let _ = attempt.await;
                Some(user_id)
            },
            Lifecycle::Error { user_id, .. } => Some(user_id),
            Lifecycle::Ready(session) => Some(session.user_id.clone()),
        };
        self.inner.directory.clear_cache();

        if let Some(user_id) = user_id {
            if clear_stored {
                self.inner.key_store.clear(&user_id).await?;
            }
            tracing::info!(user_id, clear_stored, "logged out");
        }

        Ok(())
    }
}

impl<E: Environment> std::fmt::Debug for EncryptionService<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionService").field("status", &self.status()).finish_non_exhaustive()
    }
}

impl<E: Environment> Inner<E> {
    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session(&self) -> Option<Arc<Session>> {
        match &*self.lock() {
            Lifecycle::Ready(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Body of the shared initialization future. Performs the lifecycle
    /// transition itself.
    async fn run_initialize(
        self: Arc<Self>,
        attempt_id: u64,
        user_id: String,
        credential: Credential,
    ) -> Result<Arc<Session>, E2eeError> {
        tracing::info!(user_id, "initializing end-to-end encryption");
        let result = self.establish_session(&user_id, credential).await;

        let mut lifecycle = self.lock();
        let current = matches!(
            &*lifecycle,
            Lifecycle::Initializing { attempt_id: id, .. } if *id == attempt_id
        );
        if !current {
            // Logged out or replaced while in flight
            tracing::debug!(user_id, "initialization superseded");
            return result.map_err(E2eeError::initialization);
        }

        match result {
            Ok(session) => {
                tracing::info!(
                    user_id,
                    version = session.key_pair.version(),
                    degraded = session.degraded,
                    "encryption ready"
                );
                *lifecycle = Lifecycle::Ready(Arc::clone(&session));
                Ok(session)
            },
            Err(error) => {
                let error = E2eeError::initialization(error);
                tracing::warn!(user_id, %error, "initialization failed");
                *lifecycle = Lifecycle::Error { user_id, error: error.clone() };
                Err(error)
            },
        }
    }

    async fn establish_session(
        &self,
        user_id: &str,
        credential: Credential,
    ) -> Result<Arc<Session>, E2eeError> {
        let mut local_version = 0;

        match self.key_store.retrieve(user_id).await {
            Ok(Some(stored)) => {
                let mut rng = self.env.crypto_rng();
                match self.validator.validate_stored(&stored.private_key_pem, stored.version, &mut rng) {
                    Ok(key_pair) => {
                        let degraded = self.confirm_published(user_id, &key_pair, &credential).await;
                        return Ok(Arc::new(Session {
                            user_id: user_id.to_owned(),
                            credential,
                            key_pair,
                            degraded,
                        }));
                    },
                    Err(error) => {
                        tracing::warn!(user_id, %error, "stored key is corrupted, generating a new one");
                        local_version = stored.version;
                    },
                }
            },
            Ok(None) => tracing::debug!(user_id, "no stored key"),
            Err(error) => {
                tracing::warn!(user_id, %error, "could not read stored key, generating a new one");
            },
        }

        let remote_version = match self.directory.fetch_remote(user_id, &credential).await {
            Ok(remote) => remote.version,
            Err(DirectoryError::NotFound { .. }) => 0,
            Err(error) => {
                tracing::debug!(user_id, %error, "directory version unknown");
                0
            },
        };
        let version = local_version.max(remote_version) + 1;

        let key_pair = self.generate_validated(version).await?;
        let stored = StoredKey::from_pair(&key_pair).map_err(E2eeError::key_generation)?;
        self.key_store.store(user_id, &stored).await?;
        self.directory.upload_public_key(user_id, key_pair.public_key(), version, &credential).await?;

        Ok(Arc::new(Session { user_id: user_id.to_owned(), credential, key_pair, degraded: false }))
    }

    /// Best-effort check that the directory serves our key. Returns whether
    /// the session is degraded.
    async fn confirm_published(
        &self,
        user_id: &str,
        key_pair: &KeyPair,
        credential: &Credential,
    ) -> bool {
        let version = key_pair.version();
        match self.directory.fetch_remote(user_id, credential).await {
            Ok(remote) if remote.public_key == *key_pair.public_key() => return false,
            Ok(remote) if remote.version < version => {
                tracing::info!(user_id, local = version, remote = remote.version, "directory is behind local key");
            },
            Ok(remote) => {
                tracing::warn!(
                    user_id,
                    local = version,
                    remote = remote.version,
                    "directory key does not match local key"
                );
                return true;
            },
            Err(DirectoryError::NotFound { .. }) => {
                tracing::info!(user_id, "local key was never published");
            },
            Err(error) => {
                tracing::warn!(user_id, %error, "could not confirm key with directory");
                return true;
            },
        }

        match self.directory.upload_public_key(user_id, key_pair.public_key(), version, credential).await {
            Ok(_) => false,
            Err(error) => {
                tracing::warn!(user_id, %error, "re-upload of local key failed");
                true
            },
        }
    }

    /// Generate a key pair and validate it, retrying both together.
    async fn generate_validated(&self, version: u64) -> Result<KeyPair, E2eeError> {
        self.config
            .keygen_retry
            .run(&self.env, "generate_key_pair", |_: &E2eeError| true, |_| {
                let provider = Arc::clone(&self.provider);
                let validator = self.validator.clone();
                let mut rng = self.env.crypto_rng();

                async move {
                    let task = tokio::task::spawn_blocking(move || -> Result<KeyPair, E2eeError> {
                        let key_pair = provider
                            .generate_key_pair(version, &mut rng)
                            .map_err(E2eeError::key_generation)?;
                        validator.validate(&key_pair, &mut rng)?;
                        Ok(key_pair)
                    });

                    match task.await {
                        Ok(result) => result,
                        Err(e) => Err(E2eeError::key_generation(format!("key generation task failed: {e}"))),
                    }
                }
            })
            .await
    }

    async fn rotate(
        &self,
        session: &Session,
        credential: Credential,
    ) -> Result<Arc<Session>, E2eeError> {
        let user_id = session.user_id.as_str();
        let version = session.key_pair.version() + 1;

        let key_pair = self.generate_validated(version).await?;
        let stored = StoredKey::from_pair(&key_pair).map_err(E2eeError::key_generation)?;
        self.key_store.replace(user_id, &stored).await?;
        self.directory.upload_public_key(user_id, key_pair.public_key(), version, &credential).await?;
        self.directory.invalidate(user_id);

        Ok(Arc::new(Session { user_id: user_id.to_owned(), credential, key_pair, degraded: false }))
    }

    async fn verify_sender(
        &self,
        session: &Session,
        plaintext: &[u8],
        envelope: &EncryptedEnvelope,
        sender_id: &str,
    ) -> Authenticity {
        if envelope.sender_id != sender_id {
            return Authenticity::Unverified(SignatureFailure::new(format!(
                "envelope names sender {}, expected {sender_id}",
                envelope.sender_id
            )));
        }

        let credential = &session.credential;
        let sender_key = match self.directory.fetch_public_key(sender_id, credential).await {
            Ok(key) => key,
            Err(error) => {
                return Authenticity::Unverified(SignatureFailure::new(format!(
                    "sender key unavailable: {error}"
                )));
            },
        };

        if self.provider.verify(plaintext, &envelope.signature, &sender_key.public_key) {
            return Authenticity::Verified { sender_key_version: sender_key.version };
        }

        // The sender may have rotated since we cached their key
        match self.directory.check_rotation_needed(sender_id, credential).await {
            Ok(true) => match self.directory.refresh(sender_id, credential).await {
                Ok(fresh) if self.provider.verify(plaintext, &envelope.signature, &fresh.public_key) => {
                    return Authenticity::Verified { sender_key_version: fresh.version };
                },
                Ok(_) => {},
                Err(error) => {
                    return Authenticity::Unverified(SignatureFailure::new(format!(
                        "sender key refresh failed: {error}"
                    )));
                },
            },
            Ok(false) => {},
            Err(error) => {
                return Authenticity::Unverified(SignatureFailure::new(format!(
                    "sender key check failed: {error}"
                )));
            },
        }

        Authenticity::Unverified(SignatureFailure::new("signature does not match sender key"))
    }
}
