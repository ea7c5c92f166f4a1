//! Encryption for secret settings
//!
//! Encrypted settings keep only ciphertext in defaults, overrides, and
//! serialized snapshots; the plaintext exists solely inside materialized
//! settings instances. The reference implementation uses AES-256-GCM with
//! base64 framing (requires the `encryption` feature).

use crate::error::{Error, Result};

/// A string-to-string cipher for encrypted settings.
///
/// `decrypt(encrypt(x))` must equal `x` for every `x`; schema construction
/// verifies this with a probe round-trip.
pub trait SettingsEncryptor: Send + Sync {
    /// Encrypt a plaintext setting value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] on cipher failure.
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    /// Decrypt a stored ciphertext.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Crypto`] when the input is not a ciphertext
    /// produced by this encryptor (wrong key, truncated, or malformed).
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

/// Verify that an encryptor round-trips, as required before it may back a schema.
///
/// # Errors
///
/// Returns [`Error::InvalidEncryptor`] if the probe value does not survive
/// encrypt-then-decrypt.
pub fn validate_encryptor(encryptor: &dyn SettingsEncryptor) -> Result<()> {
    const PROBE: &str = "nfig encryptor probe \u{2713}";
    let cipher = encryptor
        .encrypt(PROBE)
        .map_err(|e| Error::InvalidEncryptor(format!("encrypt failed: {e}")))?;
    let plain = encryptor
        .decrypt(&cipher)
        .map_err(|e| Error::InvalidEncryptor(format!("decrypt failed: {e}")))?;
    if plain != PROBE {
        return Err(Error::InvalidEncryptor(
            "encrypt-then-decrypt is not the identity".into(),
        ));
    }
    Ok(())
}

#[cfg(feature = "encryption")]
pub use aes::AesGcmEncryptor;

#[cfg(feature = "encryption")]
mod aes {
    use super::SettingsEncryptor;
    use crate::error::{Error, Result};
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use rand::Rng;

    const NONCE_LEN: usize = 12;

    /// AES-256-GCM encryptor with `base64(nonce || ciphertext)` framing.
    pub struct AesGcmEncryptor {
        cipher: Aes256Gcm,
    }

    impl AesGcmEncryptor {
        /// Create an encryptor from a 32-byte key.
        ///
        /// # Errors
        ///
        /// Returns [`Error::Crypto`] if the key length is invalid.
        pub fn new(key: &[u8; 32]) -> Result<Self> {
            Ok(Self {
                cipher: Aes256Gcm::new_from_slice(key)
                    .map_err(|_| Error::Crypto("invalid key length".into()))?,
            })
        }

        /// Generate a random 32-byte encryption key.
        #[must_use]
        pub fn generate_key() -> [u8; 32] {
            rand::rng().random()
        }
    }

    impl SettingsEncryptor for AesGcmEncryptor {
        fn encrypt(&self, plaintext: &str) -> Result<String> {
            let nonce_bytes: [u8; NONCE_LEN] = rand::rng().random();
            let nonce = Nonce::from_slice(&nonce_bytes);

            let ciphertext = self
                .cipher
                .encrypt(nonce, plaintext.as_bytes())
                .map_err(|e| Error::Crypto(format!("encryption failed: {e}")))?;

            let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
            framed.extend_from_slice(&nonce_bytes);
            framed.extend_from_slice(&ciphertext);
            Ok(STANDARD.encode(framed))
        }

        fn decrypt(&self, ciphertext: &str) -> Result<String> {
            let framed = STANDARD
                .decode(ciphertext)
                .map_err(|e| Error::Crypto(format!("invalid base64 framing: {e}")))?;

            if framed.len() <= NONCE_LEN {
                return Err(Error::Crypto("ciphertext too short".into()));
            }
            let (nonce_bytes, body) = framed.split_at(NONCE_LEN);
            let nonce = Nonce::from_slice(nonce_bytes);

            let plaintext = self
                .cipher
                .decrypt(nonce, body)
                .map_err(|_| Error::Crypto("decryption failed (wrong key?)".into()))?;

            String::from_utf8(plaintext).map_err(|e| Error::Crypto(format!("invalid UTF-8: {e}")))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
