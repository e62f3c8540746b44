//! Functional self-test for key pairs.
//!
//! Used at initialization (before trusting a stored key), after every key
//! generation, and at directory boundaries (format checks on public keys).
//! A key pair passes only if its halves match and both round trips work:
//!
//! 1. Private key structure is consistent (CRT parameters, primes)
//! 2. Public half derived from the private key equals the claimed public key
//! 3. OAEP wrap/unwrap of a random challenge reproduces the challenge
//! 4. A signature over a random challenge verifies

use std::sync::Arc;

use rand_chacha::{ChaCha20Rng, rand_core::RngCore};

use crate::{
    error::{CryptoError, ValidationError},
    keys::{KeyPair, PrivateKey, PublicKey},
    provider::CryptoProvider,
};

/// Size of the random challenge used in round-trip checks.
const CHALLENGE_SIZE: usize = 32;

/// Round-trip validator for key pairs and key material.
#[derive(Clone)]
pub struct KeyValidator {
    provider: Arc<dyn CryptoProvider>,
}

impl KeyValidator {
    /// Validator that exercises keys through `provider`.
    pub fn new(provider: Arc<dyn CryptoProvider>) -> Self {
        Self { provider }
    }

    /// Run the full self-test on a key pair.
    ///
    /// # Errors
    ///
    /// - `Malformed` if the private key is structurally invalid
    /// - `Mismatch` if the public key does not belong to the private key
    /// - `RoundTrip` if wrap/unwrap or sign/verify does not reproduce input
    pub fn validate(&self, pair: &KeyPair, rng: &mut ChaCha20Rng) -> Result<(), ValidationError> {
        pair.private_key()
            .as_rsa()
            .validate()
            .map_err(|e| CryptoError::InvalidKeyFormat { reason: e.to_string() })?;

        let derived = pair.private_key().public_key()?;
        if &derived != pair.public_key() {
            return Err(ValidationError::Mismatch);
        }

        let mut challenge = [0u8; CHALLENGE_SIZE];
        rng.fill_bytes(&mut challenge);

        let wrapped = self
            .provider
            .encrypt_asymmetric(&challenge, pair.public_key(), rng)
            .map_err(|_| ValidationError::RoundTrip { stage: "wrap" })?;
        let unwrapped = self
            .provider
            .decrypt_asymmetric(&wrapped, pair.private_key())
            .map_err(|_| ValidationError::RoundTrip { stage: "unwrap" })?;
        if unwrapped != challenge {
            return Err(ValidationError::RoundTrip { stage: "unwrap" });
        }

        rng.fill_bytes(&mut challenge);
        let signature = self
            .provider
            .sign(&challenge, pair.private_key())
            .map_err(|_| ValidationError::RoundTrip { stage: "sign" })?;
        if !self.provider.verify(&challenge, &signature, pair.public_key()) {
            return Err(ValidationError::RoundTrip { stage: "verify" });
        }

        Ok(())
    }

    /// Rebuild and validate a key pair from a stored PKCS#8 PEM private key.
    ///
    /// The public half is derived from the private key, so this only fails
    /// on malformed or internally inconsistent material.
    pub fn validate_stored(
        &self,
        private_key_pem: &str,
        version: u64,
        rng: &mut ChaCha20Rng,
    ) -> Result<KeyPair, ValidationError> {
        let private_key = PrivateKey::from_pem(private_key_pem)?;
        let public_key = private_key.public_key()?;
        let pair = KeyPair::new(public_key, private_key, version);

        self.validate(&pair, rng)?;
        Ok(pair)
    }

    /// Format check for public key material received from outside.
    pub fn validate_public_pem(&self, pem: &str) -> Result<PublicKey, ValidationError> {
        Ok(PublicKey::from_pem(pem)?)
    }
}

impl std::fmt::Debug for KeyValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyValidator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use rand_chacha::rand_core::SeedableRng;

    use super::*;
    use crate::provider::RsaAesProvider;

    fn validator() -> KeyValidator {
        KeyValidator::new(Arc::new(RsaAesProvider::new()))
    }

    fn pairs() -> &'static (KeyPair, KeyPair) {
        static PAIRS: OnceLock<(KeyPair, KeyPair)> = OnceLock::new();
        PAIRS.get_or_init(|| {
            let provider = RsaAesProvider::new();
            let mut rng = ChaCha20Rng::seed_from_u64(11);
            let first = provider.generate_key_pair(1, &mut rng).unwrap();
            let second = provider.generate_key_pair(2, &mut rng).unwrap();
            (first, second)
        })
    }

    #[test]
    fn fresh_pair_validates() {
        let (pair, _) = pairs();
        let mut rng = ChaCha20Rng::seed_from_u64(0);

        assert!(validator().validate(pair, &mut rng).is_ok());
    }

    #[test]
    fn mismatched_halves_rejected() {
        let (first, second) = pairs();
        let mut rng = ChaCha20Rng::seed_from_u64(0);

        let franken =
            KeyPair::new(second.public_key().clone(), first.private_key().clone(), 3);

        assert_eq!(validator().validate(&franken, &mut rng), Err(ValidationError::Mismatch));
    }

    #[test]
    fn stored_pem_rebuilds_pair() {
        let (pair, _) = pairs();
        let mut rng = ChaCha20Rng::seed_from_u64(0);

        let pem = pair.private_key().to_pem().unwrap();
        let rebuilt = validator().validate_stored(&pem, 9, &mut rng).unwrap();

        assert_eq!(rebuilt.public_key(), pair.public_key());
        assert_eq!(rebuilt.version(), 9);
    }

    #[test]
    fn corrupted_stored_pem_rejected() {
        let mut rng = ChaCha20Rng::seed_from_u64(0);

        let result = validator().validate_stored("\u{0}\u{1}garbage", 1, &mut rng);
        assert!(matches!(result, Err(ValidationError::Malformed(_))));
    }

    #[test]
    fn truncated_stored_pem_rejected() {
        let (pair, _) = pairs();
        let mut rng = ChaCha20Rng::seed_from_u64(0);

        let pem = pair.private_key().to_pem().unwrap();
        let truncated = &pem[..pem.len() / 2];

        assert!(validator().validate_stored(truncated, 1, &mut rng).is_err());
    }

    #[test]
    fn public_pem_format_check() {
        let (pair, _) = pairs();
        let validator = validator();

        assert!(validator.validate_public_pem(pair.public_key().to_pem()).is_ok());
        assert!(validator.validate_public_pem("-----BEGIN PUBLIC KEY-----").is_err());
    }
}
