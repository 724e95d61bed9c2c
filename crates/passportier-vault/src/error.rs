use passportier_crypto::CryptoError;
use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

/// Every outcome a caller has to tell apart to give the user an accurate message.
#[derive(Debug, Error)]
pub enum VaultError {
    /// No unlocked session for this user; they must unlock first.
    #[error("no unlocked session")]
    SessionNotFound,

    /// AEAD tag mismatch: the session passphrase does not open this record.
    #[error("wrong passphrase")]
    AuthenticationFailed,

    /// The stored blob is corrupt or truncated; that one record is lost.
    #[error("stored data is malformed: {0}")]
    DataMalformed(String),

    /// Nothing stored under that name.
    #[error("no matching entry")]
    NotFound,

    #[error("storage error: {0}")]
    StorageFailed(String),

    #[error("session backend error: {0}")]
    SessionBackend(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}

impl VaultError {
    /// Errors caused by the user's own input or state, as opposed to system faults.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            VaultError::SessionNotFound
                | VaultError::AuthenticationFailed
                | VaultError::NotFound
                | VaultError::InvalidInput(_)
        )
    }
}

impl From<CryptoError> for VaultError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::AuthenticationFailed => VaultError::AuthenticationFailed,
            CryptoError::DataMalformed(msg) => VaultError::DataMalformed(msg),
            CryptoError::EmptyPlaintext => VaultError::InvalidInput(e.to_string()),
            CryptoError::Kdf(_) | CryptoError::Encryption(_) => VaultError::Crypto(e.to_string()),
        }
    }
}
