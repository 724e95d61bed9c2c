//! Key derivation: Argon2id passphrase + salt → 256-bit key

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::{KEY_SIZE, SALT_SIZE};

/// A 256-bit key derived from a passphrase via Argon2id.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Zeroize for DerivedKey {
    fn zeroize(&mut self) {
        self.bytes.zeroize();
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id cost parameters.
///
/// Only the salt is stored with a user or blob, never these values, so
/// every sealed record silently depends on [`KdfParams::VAULT`] staying fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub mem_cost_kib: u32,
    /// Time cost / passes
    pub time_cost: u32,
    /// Parallelism (lanes)
    pub parallelism: u32,
}

impl KdfParams {
    /// The production parameters: 1 pass, 64 MiB, 4 lanes, 32-byte output.
    pub const VAULT: KdfParams = KdfParams {
        mem_cost_kib: 64 * 1024,
        time_cost: 1,
        parallelism: 4,
    };
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::VAULT
    }
}

/// Generate a fresh random 16-byte salt.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit key from a passphrase and salt using Argon2id.
///
/// Deterministic: the same (passphrase, salt, params) always yields the same key.
/// This is CPU- and memory-bound; async callers should run it on a
/// blocking thread.
pub fn derive_key(
    passphrase: &[u8],
    salt: &[u8; SALT_SIZE],
    params: &KdfParams,
) -> Result<DerivedKey, CryptoError> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::Kdf(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);
    tracing::trace!(
        mem_cost_kib = params.mem_cost_kib,
        time_cost = params.time_cost,
        parallelism = params.parallelism,
        "argon2id derive"
    );

    let mut key = [0u8; KEY_SIZE];
    if let Err(e) = argon2.hash_password_into(passphrase, salt, &mut key) {
        key.zeroize();
        return Err(CryptoError::Kdf(e.to_string()));
    }

    let derived = DerivedKey::from_bytes(key);
    key.zeroize();
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_kdf_deterministic() {
        let salt = [1u8; 16];

        let key1 = derive_key(b"test-passphrase-123", &salt, &fast_params()).unwrap();
        let key2 = derive_key(b"test-passphrase-123", &salt, &fast_params()).unwrap();

        assert_eq!(
            key1.as_bytes(),
            key2.as_bytes(),
            "KDF must be deterministic"
        );
    }

    #[test]
    fn test_kdf_different_passphrases() {
        let salt = [1u8; 16];

        let key1 = derive_key(b"passphrase-a", &salt, &fast_params()).unwrap();
        let key2 = derive_key(b"passphrase-b", &salt, &fast_params()).unwrap();

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different passphrases must produce different keys"
        );
    }

    #[test]
    fn test_kdf_different_salts() {
        let key1 = derive_key(b"same-passphrase", &[1u8; 16], &fast_params()).unwrap();
        let key2 = derive_key(b"same-passphrase", &[2u8; 16], &fast_params()).unwrap();

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different salts must produce different keys"
        );
    }

    #[test]
    fn test_vault_params_are_pinned() {
        assert_eq!(KdfParams::default(), KdfParams::VAULT);
        assert_eq!(KdfParams::VAULT.mem_cost_kib, 65536);
        assert_eq!(KdfParams::VAULT.time_cost, 1);
        assert_eq!(KdfParams::VAULT.parallelism, 4);
    }

    #[test]
    fn test_vault_params_derive() {
        let salt = [7u8; 16];
        let key1 = derive_key(b"correct horse", &salt, &KdfParams::VAULT).unwrap();
        let key2 = derive_key(b"correct horse", &salt, &KdfParams::VAULT).unwrap();
        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KdfParams {
            mem_cost_kib: 1,
            time_cost: 0,
            parallelism: 0,
        };
        let result = derive_key(b"pw", &[0u8; 16], &params);
        assert!(matches!(result, Err(CryptoError::Kdf(_))));
    }

    #[test]
    fn test_salts_are_random() {
        assert_ne!(generate_salt(), generate_salt());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = DerivedKey::from_bytes([0xAB; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("171"));
    }
}
