//! passportier-crypto: zero-knowledge credential sealing
//!
//! A credential is sealed into a self-describing blob; a passphrase is only
//! ever "checked" by whether that blob opens. No hash or verifier is stored.
//!
//! Blob layout (base64 text at rest):
//! ```text
//! [16 bytes: salt][12 bytes: nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```
//!
//! Key material comes in two shapes (see [`KeyMaterial`]):
//! ```text
//! Passphrase ──Argon2id(salt from blob)──► 256-bit key ──► ChaCha20-Poly1305
//! Key (already derived at unlock) ───────────────────────► ChaCha20-Poly1305
//! ```

pub mod codec;
pub mod error;
pub mod kdf;
pub mod material;

pub use codec::{Codec, EncryptedBlob, MIN_BLOB_LEN};
pub use error::CryptoError;
pub use kdf::{derive_key, generate_salt, DerivedKey, KdfParams};
pub use material::KeyMaterial;

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an Argon2id salt (128-bit)
pub const SALT_SIZE: usize = 16;

/// Size of a ChaCha20-Poly1305 nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
