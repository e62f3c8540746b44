//! Message content encryption using AES-256-GCM.
//!
//! Every call to [`seal`] draws a fresh 96-bit IV from the caller's RNG; an
//! IV is never reused across messages.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand_chacha::{ChaCha20Rng, rand_core::RngCore};

use crate::{error::CryptoError, keys::SymmetricKey};

/// AES-GCM IV size in bytes.
pub const IV_SIZE: usize = 12;

/// GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Output of symmetric encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    /// Ciphertext including the 16-byte GCM tag
    pub ciphertext: Vec<u8>,
    /// The IV used for this message
    pub iv: [u8; IV_SIZE],
}

/// Generate a random 256-bit content key.
pub fn generate_key(rng: &mut ChaCha20Rng) -> SymmetricKey {
    let mut bytes = [0u8; 32];
    rng.fill_bytes(&mut bytes);
    SymmetricKey::from_array(bytes)
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
pub fn seal(
    plaintext: &[u8],
    key: &SymmetricKey,
    rng: &mut ChaCha20Rng,
) -> Result<SealedPayload, CryptoError> {
    let mut iv = [0u8; IV_SIZE];
    rng.fill_bytes(&mut iv);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::Encryption { reason: "AES-GCM encryption failed".to_string() })?;

    Ok(SealedPayload { ciphertext, iv })
}

/// Decrypt and authenticate an AES-256-GCM ciphertext.
///
/// # Errors
///
/// - `Decryption` if the IV has the wrong length, or the tag does not verify
///   (wrong key, modified ciphertext or IV)
pub fn open(ciphertext: &[u8], iv: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::Decryption {
            reason: format!("IV is {} bytes, expected {IV_SIZE}", iv.len()),
        });
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::Decryption { reason: "authentication failed".to_string() })
}
