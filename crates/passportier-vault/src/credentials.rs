//! Credential store: sealing secrets on the way into the repository and
//! opening them on the way out.
//!
//! Cipher work (and Argon2id in passphrase mode) runs on the blocking pool so
//! a slow derivation never stalls the async workers or holds a store lock.

use std::sync::Arc;

use passportier_core::{unix_now, UserId};
use passportier_crypto::{Codec, EncryptedBlob, KeyMaterial};
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};
use crate::repository::{CredentialRecord, CredentialRepository};

/// A decrypted secret and the name it is stored under.
#[derive(Debug)]
pub struct Credential {
    pub service_name: String,
    pub secret: SecretString,
}

/// One row of a bulk reveal; a failure here affects only this row.
#[derive(Debug)]
pub struct RevealedCredential {
    pub service_name: String,
    pub secret: VaultResult<SecretString>,
}

pub struct CredentialStore {
    repo: Arc<dyn CredentialRepository>,
    codec: Arc<Codec>,
}

impl CredentialStore {
    pub fn new(repo: Arc<dyn CredentialRepository>, codec: Arc<Codec>) -> Self {
        Self { repo, codec }
    }

    /// Seal `plaintext` and insert or replace it under the exact `service_name`.
    pub async fn upsert(
        &self,
        user_id: UserId,
        service_name: &str,
        plaintext: &SecretString,
        material: KeyMaterial,
    ) -> VaultResult<()> {
        let service_name = normalize_name(service_name)?;
        let plaintext = Zeroizing::new(plaintext.expose_secret().as_bytes().to_vec());

        let codec = self.codec.clone();
        let blob = blocking(move || Ok(codec.encrypt(&plaintext, &material)?)).await?;

        let now = unix_now();
        self.repo
            .upsert(CredentialRecord {
                user_id,
                service_name: service_name.to_string(),
                blob,
                created_at: now,
                updated_at: now,
            })
            .await?;

        tracing::debug!(user_id, service = service_name, "credential saved");
        Ok(())
    }

    /// Open the first record whose name contains `query`, ignoring case.
    pub async fn retrieve(
        &self,
        user_id: UserId,
        query: &str,
        material: KeyMaterial,
    ) -> VaultResult<Credential> {
        let query = normalize_name(query)?;
        let Some(record) = self.repo.find_matching(user_id, query).await? else {
            tracing::debug!(user_id, "no credential matches query");
            return Err(VaultError::NotFound);
        };

        let secret = self.open(record.blob, material).await;
        match &secret {
            Err(VaultError::AuthenticationFailed) => {
                tracing::info!(user_id, "credential did not open under the session key");
            }
            Err(VaultError::DataMalformed(reason)) => {
                tracing::warn!(
                    user_id,
                    service = %record.service_name,
                    %reason,
                    "stored credential is corrupt"
                );
            }
            _ => {}
        }

        Ok(Credential {
            service_name: record.service_name,
            secret: secret?,
        })
    }

    /// All records for the user, sorted by name, still sealed.
    pub async fn list(&self, user_id: UserId) -> VaultResult<Vec<CredentialRecord>> {
        self.repo.list(user_id).await
    }

    /// Open every record in `records`, reporting each outcome separately.
    pub async fn reveal(
        &self,
        records: Vec<CredentialRecord>,
        material: KeyMaterial,
    ) -> Vec<RevealedCredential> {
        let mut revealed = Vec::with_capacity(records.len());
        for record in records {
            let secret = self.open(record.blob, material.clone()).await;
            if let Err(e) = &secret {
                tracing::debug!(
                    user_id = record.user_id,
                    service = %record.service_name,
                    error = %e,
                    "credential failed to open during reveal"
                );
            }
            revealed.push(RevealedCredential {
                service_name: record.service_name,
                secret,
            });
        }
        revealed
    }

    /// Exact-name delete; deleting something absent is not an error.
    pub async fn delete(&self, user_id: UserId, service_name: &str) -> VaultResult<bool> {
        let service_name = normalize_name(service_name)?;
        self.repo.delete(user_id, service_name).await
    }

    pub async fn count(&self, user_id: UserId) -> VaultResult<usize> {
        self.repo.count(user_id).await
    }

    async fn open(&self, blob: EncryptedBlob, material: KeyMaterial) -> VaultResult<SecretString> {
        let codec = self.codec.clone();
        blocking(move || {
            let plaintext = codec.decrypt(&blob, &material)?;
            into_secret(plaintext)
        })
        .await
    }
}

fn normalize_name(name: &str) -> VaultResult<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(VaultError::InvalidInput("service name is empty".into()));
    }
    Ok(trimmed)
}

fn into_secret(plaintext: Zeroizing<Vec<u8>>) -> VaultResult<SecretString> {
    match std::str::from_utf8(&plaintext) {
        Ok(text) => Ok(SecretString::from(text.to_owned())),
        Err(_) => Err(VaultError::DataMalformed("plaintext is not UTF-8".into())),
    }
}

/// Run CPU-bound crypto on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> VaultResult<T>
where
    F: FnOnce() -> VaultResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::Crypto(format!("crypto task failed: {e}")))?
}
