//! RSA key generation, key wrapping (OAEP) and signatures (PKCS#1 v1.5).
//!
//! All functions are pure - randomness is provided by the caller.

use rand_chacha::ChaCha20Rng;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, traits::PublicKeyParts};
use sha2::{Digest, Sha256};

use crate::{
    error::CryptoError,
    keys::{PrivateKey, PublicKey},
};

/// Default RSA modulus size in bits.
pub const DEFAULT_MODULUS_BITS: usize = 2048;

/// SHA-256 output size, used in the OAEP overhead calculation.
const SHA256_LEN: usize = 32;

/// Generate a fresh RSA key pair.
///
/// CPU-bound; callers on an async runtime should offload it to a blocking
/// thread.
pub fn generate_rsa(
    modulus_bits: usize,
    rng: &mut ChaCha20Rng,
) -> Result<(PublicKey, PrivateKey), CryptoError> {
    let private = RsaPrivateKey::new(rng, modulus_bits)
        .map_err(|e| CryptoError::KeyGeneration { reason: e.to_string() })?;
    let public = PublicKey::from_rsa(private.to_public_key())?;

    Ok((public, PrivateKey::from_rsa(private)))
}

/// Largest input `wrap_key` accepts for this key (`k - 2*hLen - 2`).
pub fn max_wrap_len(public_key: &PublicKey) -> usize {
    public_key.as_rsa().size().saturating_sub(2 * SHA256_LEN + 2)
}

/// Encrypt a short secret (a symmetric key) with RSA-OAEP-SHA256.
///
/// # Errors
///
/// - `InputTooLarge` if `data` exceeds [`max_wrap_len`]
/// - `Encryption` if the RSA operation fails
pub fn wrap_key(
    data: &[u8],
    public_key: &PublicKey,
    rng: &mut ChaCha20Rng,
) -> Result<Vec<u8>, CryptoError> {
    let max = max_wrap_len(public_key);
    if data.len() > max {
        return Err(CryptoError::InputTooLarge { len: data.len(), max });
    }

    public_key
        .as_rsa()
        .encrypt(rng, Oaep::new::<Sha256>(), data)
        .map_err(|e| CryptoError::Encryption { reason: e.to_string() })
}

/// Decrypt an RSA-OAEP-SHA256 ciphertext.
///
/// # Errors
///
/// - `Decryption` if the ciphertext was produced for a different key or was
///   modified
pub fn unwrap_key(ciphertext: &[u8], private_key: &PrivateKey) -> Result<Vec<u8>, CryptoError> {
    private_key
        .as_rsa()
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map_err(|e| CryptoError::Decryption { reason: e.to_string() })
}

/// Sign `data` with RSASSA-PKCS1-v1_5 over SHA-256.
pub fn sign(data: &[u8], private_key: &PrivateKey) -> Result<Vec<u8>, CryptoError> {
    let digest = Sha256::digest(data);

    private_key
        .as_rsa()
        .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| CryptoError::Signing { reason: e.to_string() })
}

/// Verify an RSASSA-PKCS1-v1_5 SHA-256 signature.
pub fn verify(data: &[u8], signature: &[u8], public_key: &PublicKey) -> bool {
    let digest = Sha256::digest(data);

    public_key.as_rsa().verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature).is_ok()
}
