//! Session key material: either the raw passphrase or an already-derived key.

use secrecy::{ExposeSecret, SecretString};
use zeroize::{Zeroize, Zeroizing};

use crate::error::CryptoError;
use crate::kdf::DerivedKey;
use crate::KEY_SIZE;

const TAG_PASSPHRASE: u8 = 0x01;
const TAG_KEY: u8 = 0x02;

/// What an unlocked session holds, and what the codec seals/opens with.
///
/// Both variants live in owned, mutable, non-moving heap/inline buffers that are
/// overwritten with zeros by [`KeyMaterial::wipe`] and again on drop. This is
/// best effort: copies made by the allocator on reallocation, by the OS (swap,
/// core dumps) or by a networked session backend are outside its reach.
#[derive(Clone)]
pub enum KeyMaterial {
    /// Raw passphrase bytes; every encrypt/decrypt runs Argon2id with the blob's salt.
    Passphrase(Vec<u8>),
    /// Key derived once at unlock; used directly.
    Key(DerivedKey),
}

impl KeyMaterial {
    pub fn from_passphrase(passphrase: &SecretString) -> Self {
        KeyMaterial::Passphrase(passphrase.expose_secret().as_bytes().to_vec())
    }

    pub fn from_key(key: DerivedKey) -> Self {
        KeyMaterial::Key(key)
    }

    pub fn is_derived_key(&self) -> bool {
        matches!(self, KeyMaterial::Key(_))
    }

    /// Raw bytes of the material (passphrase bytes or the 32 key bytes).
    pub fn expose_bytes(&self) -> &[u8] {
        match self {
            KeyMaterial::Passphrase(bytes) => bytes.as_slice(),
            KeyMaterial::Key(key) => key.as_bytes().as_slice(),
        }
    }

    /// Overwrite the secret buffer with zeros in place.
    pub fn wipe(&mut self) {
        match self {
            KeyMaterial::Passphrase(bytes) => bytes.zeroize(),
            KeyMaterial::Key(key) => key.zeroize(),
        }
    }

    /// Tagged encoding for session backends that store bytes out of process:
    /// `[1 byte: tag][material]`.
    pub fn to_tagged_bytes(&self) -> Zeroizing<Vec<u8>> {
        let (tag, body) = match self {
            KeyMaterial::Passphrase(bytes) => (TAG_PASSPHRASE, bytes.as_slice()),
            KeyMaterial::Key(key) => (TAG_KEY, key.as_bytes().as_slice()),
        };
        let mut out = Zeroizing::new(Vec::with_capacity(1 + body.len()));
        out.push(tag);
        out.extend_from_slice(body);
        out
    }

    /// Inverse of [`KeyMaterial::to_tagged_bytes`].
    pub fn from_tagged_bytes(data: &[u8]) -> Result<Self, CryptoError> {
        match data.split_first() {
            Some((&TAG_PASSPHRASE, body)) => Ok(KeyMaterial::Passphrase(body.to_vec())),
            Some((&TAG_KEY, body)) => {
                let bytes: [u8; KEY_SIZE] = body.try_into().map_err(|_| {
                    CryptoError::DataMalformed(format!(
                        "session key has {} bytes (expected {KEY_SIZE})",
                        body.len()
                    ))
                })?;
                Ok(KeyMaterial::Key(DerivedKey::from_bytes(bytes)))
            }
            Some((tag, _)) => Err(CryptoError::DataMalformed(format!(
                "unknown key material tag 0x{tag:02x}"
            ))),
            None => Err(CryptoError::DataMalformed("empty key material".into())),
        }
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.wipe();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            KeyMaterial::Passphrase(_) => "Passphrase",
            KeyMaterial::Key(_) => "Key",
        };
        f.debug_tuple(kind).field(&"[REDACTED]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wipe_zeroes_passphrase() {
        let mut material = KeyMaterial::from_passphrase(&SecretString::from("hunter2"));
        material.wipe();
        assert!(material.expose_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn wipe_zeroes_key() {
        let mut material = KeyMaterial::from_key(DerivedKey::from_bytes([9u8; KEY_SIZE]));
        material.wipe();
        assert_eq!(material.expose_bytes(), &[0u8; KEY_SIZE]);
    }

    #[test]
    fn clone_is_independent() {
        let original = KeyMaterial::from_passphrase(&SecretString::from("pw"));
        let mut copy = original.clone();
        copy.wipe();
        assert_eq!(original.expose_bytes(), b"pw");
    }

    #[test]
    fn tagged_bytes_preserve_variant() {
        let pass = KeyMaterial::from_passphrase(&SecretString::from("pw1"));
        let decoded = KeyMaterial::from_tagged_bytes(&pass.to_tagged_bytes()).unwrap();
        assert!(!decoded.is_derived_key());
        assert_eq!(decoded.expose_bytes(), b"pw1");

        let key = KeyMaterial::from_key(DerivedKey::from_bytes([3u8; KEY_SIZE]));
        let decoded = KeyMaterial::from_tagged_bytes(&key.to_tagged_bytes()).unwrap();
        assert!(decoded.is_derived_key());
        assert_eq!(decoded.expose_bytes(), &[3u8; KEY_SIZE]);
    }

    #[test]
    fn tagged_bytes_reject_garbage() {
        assert!(KeyMaterial::from_tagged_bytes(&[]).is_err());
        assert!(KeyMaterial::from_tagged_bytes(&[0x7F, 1, 2]).is_err());
        assert!(KeyMaterial::from_tagged_bytes(&[TAG_KEY, 1, 2, 3]).is_err());
    }

    #[test]
    fn debug_is_redacted() {
        let material = KeyMaterial::from_passphrase(&SecretString::from("do-not-print"));
        let dbg = format!("{material:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("do-not-print"));
    }
}
