//! Sealed credential blobs: ChaCha20-Poly1305 with a per-blob salt and nonce
//!
//! Blob format (binary, then standard base64 for storage):
//! ```text
//! [16 bytes: salt][12 bytes: nonce][N >= 1 bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```
//!
//! The salt is always fresh and always present so the layout never depends on
//! key mode. With [`KeyMaterial::Passphrase`] it feeds Argon2id; with
//! [`KeyMaterial::Key`] it is carried but unused.
//!
//! Opening a blob is the only passphrase check there is: a wrong passphrase
//! derives a different key and the tag fails to verify.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::{derive_key, generate_salt, DerivedKey, KdfParams};
use crate::material::KeyMaterial;
use crate::{NONCE_SIZE, SALT_SIZE, TAG_SIZE};

/// Smallest decodable blob: header + one ciphertext byte + tag.
pub const MIN_BLOB_LEN: usize = SALT_SIZE + NONCE_SIZE + TAG_SIZE + 1;

/// Base64 text of a sealed blob. Opaque to everything except [`Codec`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedBlob(String);

impl EncryptedBlob {
    /// Wrap base64 text read back from storage.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptedBlob")
            .field("encoded_len", &self.0.len())
            .finish()
    }
}

/// Seals and opens [`EncryptedBlob`]s. Stateless apart from the KDF cost, and
/// safe to share across threads.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    kdf: KdfParams,
}

impl Codec {
    /// Codec with the production KDF parameters ([`KdfParams::VAULT`]).
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec with custom Argon2id costs. Blobs sealed in passphrase mode only
    /// open under the same parameters; meant for tests and benchmarks.
    pub fn with_kdf_params(kdf: KdfParams) -> Self {
        Self { kdf }
    }

    /// Derive a session key from a passphrase and a stored per-user salt.
    pub fn derive_key(
        &self,
        passphrase: &[u8],
        salt: &[u8; SALT_SIZE],
    ) -> Result<DerivedKey, CryptoError> {
        derive_key(passphrase, salt, &self.kdf)
    }

    /// Seal `plaintext` under `material` with a fresh salt and nonce.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        material: &KeyMaterial,
    ) -> Result<EncryptedBlob, CryptoError> {
        if plaintext.is_empty() {
            return Err(CryptoError::EmptyPlaintext);
        }

        let salt = generate_salt();
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let key = self.resolve_key(material, &salt)?;
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut combined = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
        combined.extend_from_slice(&salt);
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);

        Ok(EncryptedBlob(STANDARD.encode(&combined)))
    }

    /// Open a blob produced by [`Codec::encrypt`].
    ///
    /// Structural checks (base64, minimum length) run before any key work, so
    /// `DataMalformed` is reported without touching the key. Past that point a
    /// wrong key and a tampered body are the same `AuthenticationFailed`.
    pub fn decrypt(
        &self,
        blob: &EncryptedBlob,
        material: &KeyMaterial,
    ) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let combined = STANDARD
            .decode(blob.as_str())
            .map_err(|e| CryptoError::DataMalformed(format!("invalid base64: {e}")))?;

        if combined.len() < MIN_BLOB_LEN {
            return Err(CryptoError::DataMalformed(format!(
                "blob too short: {} bytes (minimum {MIN_BLOB_LEN})",
                combined.len()
            )));
        }

        let (salt, rest) = combined.split_at(SALT_SIZE);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);
        let salt: &[u8; SALT_SIZE] = salt
            .try_into()
            .map_err(|_| CryptoError::DataMalformed("salt slice".into()))?;

        let key = self.resolve_key(material, salt)?;
        let cipher = ChaCha20Poly1305::new(key.as_bytes().into());

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::AuthenticationFailed)
    }

    fn resolve_key(
        &self,
        material: &KeyMaterial,
        salt: &[u8; SALT_SIZE],
    ) -> Result<DerivedKey, CryptoError> {
        match material {
            KeyMaterial::Passphrase(passphrase) => derive_key(passphrase, salt, &self.kdf),
            KeyMaterial::Key(key) => Ok(key.clone()),
        }
    }
}
