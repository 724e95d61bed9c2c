use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The AEAD tag did not verify: wrong passphrase/key, or tampered data.
    #[error("authentication failed: wrong passphrase or tampered data")]
    AuthenticationFailed,

    /// The blob is not valid base64 or is shorter than the fixed header.
    #[error("encrypted data is malformed: {0}")]
    DataMalformed(String),

    #[error("plaintext must not be empty")]
    EmptyPlaintext,

    #[error("Argon2id KDF failed: {0}")]
    Kdf(String),

    #[error("encryption failed: {0}")]
    Encryption(String),
}
