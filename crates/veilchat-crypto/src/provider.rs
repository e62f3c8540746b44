//! Uniform interface over the asymmetric and symmetric primitives.
//!
//! [`CryptoProvider`] is the seam the rest of the system programs against.
//! [`RsaAesProvider`] is the production implementation; tests wrap it to
//! count calls or inject faulty key generation.

use rand_chacha::ChaCha20Rng;

use crate::{
    asymmetric::{self, DEFAULT_MODULUS_BITS},
    error::CryptoError,
    keys::{KeyPair, PrivateKey, PublicKey, SymmetricKey},
    symmetric::{self, SealedPayload},
};

/// Primitives used by the hybrid encryption scheme.
///
/// Implementations are pure with respect to external state: all randomness
/// comes from the caller-provided RNG. Object safe so components can share an
/// `Arc<dyn CryptoProvider>`.
pub trait CryptoProvider: Send + Sync + 'static {
    /// Generate an asymmetric key pair tagged with `version`.
    fn generate_key_pair(&self, version: u64, rng: &mut ChaCha20Rng)
    -> Result<KeyPair, CryptoError>;

    /// Sign `data` with the private key.
    fn sign(&self, data: &[u8], private_key: &PrivateKey) -> Result<Vec<u8>, CryptoError>;

    /// Check a signature over `data`.
    fn verify(&self, data: &[u8], signature: &[u8], public_key: &PublicKey) -> bool;

    /// Encrypt a short secret to a public key. Only used to wrap content keys.
    fn encrypt_asymmetric(
        &self,
        data: &[u8],
        public_key: &PublicKey,
        rng: &mut ChaCha20Rng,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt a secret wrapped for our public key.
    fn decrypt_asymmetric(
        &self,
        ciphertext: &[u8],
        private_key: &PrivateKey,
    ) -> Result<Vec<u8>, CryptoError>;

    /// Generate a fresh 256-bit content key.
    fn generate_symmetric_key(&self, rng: &mut ChaCha20Rng) -> SymmetricKey;

    /// Encrypt content with a fresh random IV.
    fn encrypt_symmetric(
        &self,
        plaintext: &[u8],
        key: &SymmetricKey,
        rng: &mut ChaCha20Rng,
    ) -> Result<SealedPayload, CryptoError>;

    /// Decrypt and authenticate content.
    fn decrypt_symmetric(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        key: &SymmetricKey,
    ) -> Result<Vec<u8>, CryptoError>;
}

/// RSA-OAEP / RSA-PKCS#1 v1.5 signatures with AES-256-GCM content encryption.
#[derive(Debug, Clone)]
pub struct RsaAesProvider {
    modulus_bits: usize,
}

impl Default for RsaAesProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl RsaAesProvider {
    /// Provider generating 2048-bit keys.
    pub fn new() -> Self {
        Self::with_modulus_bits(DEFAULT_MODULUS_BITS)
    }

    /// Provider generating keys of a specific modulus size.
    pub fn with_modulus_bits(modulus_bits: usize) -> Self {
        Self { modulus_bits }
    }

    /// Modulus size used for generated keys.
    pub fn modulus_bits(&self) -> usize {
        self.modulus_bits
    }
}

impl CryptoProvider for RsaAesProvider {
    fn generate_key_pair(
        &self,
        version: u64,
        rng: &mut ChaCha20Rng,
    ) -> Result<KeyPair, CryptoError> {
        let (public_key, private_key) = asymmetric::generate_rsa(self.modulus_bits, rng)?;
        Ok(KeyPair::new(public_key, private_key, version))
    }

    fn sign(&self, data: &[u8], private_key: &PrivateKey) -> Result<Vec<u8>, CryptoError> {
        asymmetric::sign(data, private_key)
    }

    fn verify(&self, data: &[u8], signature: &[u8], public_key: &PublicKey) -> bool {
        asymmetric::verify(data, signature, public_key)
    }

    fn encrypt_asymmetric(
        &self,
        data: &[u8],
        public_key: &PublicKey,
        rng: &mut ChaCha20Rng,
    ) -> Result<Vec<u8>, CryptoError> {
        asymmetric::wrap_key(data, public_key, rng)
    }

    fn decrypt_asymmetric(
        &self,
        ciphertext: &[u8],
        private_key: &PrivateKey,
    ) -> Result<Vec<u8>, CryptoError> {
        asymmetric::unwrap_key(ciphertext, private_key)
    }

    fn generate_symmetric_key(&self, rng: &mut ChaCha20Rng) -> SymmetricKey {
        symmetric::generate_key(rng)
    }

    fn encrypt_symmetric(
        &self,
        plaintext: &[u8],
        key: &SymmetricKey,
        rng: &mut ChaCha20Rng,
    ) -> Result<SealedPayload, CryptoError> {
        symmetric::seal(plaintext, key, rng)
    }

    fn decrypt_symmetric(
        &self,
        ciphertext: &[u8],
        iv: &[u8],
        key: &SymmetricKey,
    ) -> Result<Vec<u8>, CryptoError> {
        symmetric::open(ciphertext, iv, key)
    }
}
