//! Persistence interfaces for encrypted records and user profiles.
//!
//! The engine only needs two primitives from a store: an atomic
//! insert-or-replace keyed on `(user_id, service_name)` and an ordered scan by
//! user. Both backends keep their rows in [`Tables`] behind a single lock, so
//! every write is one critical section:
//!   - **memory** ([`MemoryStore`]): ephemeral, for tests and throwaway runs.
//!   - **json** ([`JsonFileStore`]): whole-file JSON, flushed via temp+rename.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use passportier_core::config::{StorageBackendKind, StorageConfig};
use passportier_core::UserId;
use passportier_crypto::{EncryptedBlob, SALT_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::VaultResult;

mod json;
mod memory;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

/// One sealed secret. The blob is only ever produced by `Codec::encrypt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub user_id: UserId,
    /// Display case as typed; also the exact upsert key.
    pub service_name: String,
    pub blob: EncryptedBlob,
    /// Unix seconds
    pub created_at: u64,
    /// Unix seconds
    pub updated_at: u64,
}

/// Per-user salt and auto-lock preference, created on first unlock.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub salt: [u8; SALT_SIZE],
    pub session_ttl_secs: u64,
    pub created_at: u64,
}

impl UserProfile {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl std::fmt::Debug for UserProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserProfile")
            .field("user_id", &self.user_id)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Insert or replace the record for the exact `(user_id, service_name)`.
    /// A replacement keeps `created_at` and takes the new blob and `updated_at`.
    async fn upsert(&self, record: CredentialRecord) -> VaultResult<()>;

    /// First record, in ascending name order, whose name contains `query`
    /// ignoring case.
    async fn find_matching(
        &self,
        user_id: UserId,
        query: &str,
    ) -> VaultResult<Option<CredentialRecord>>;

    /// All of a user's records ordered by service name.
    async fn list(&self, user_id: UserId) -> VaultResult<Vec<CredentialRecord>>;

    /// Exact-name delete. Returns whether a record was removed.
    async fn delete(&self, user_id: UserId, service_name: &str) -> VaultResult<bool>;

    async fn count(&self, user_id: UserId) -> VaultResult<usize>;
}

#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn get_profile(&self, user_id: UserId) -> VaultResult<Option<UserProfile>>;

    /// Store `profile` unless one already exists for the user; either way,
    /// return the profile that is now stored.
    async fn create_profile_if_absent(&self, profile: UserProfile) -> VaultResult<UserProfile>;

    /// Rewrite only the TTL preference. Returns `NotFound` for an unknown user.
    async fn set_session_ttl(&self, user_id: UserId, ttl_secs: u64) -> VaultResult<()>;
}

/// The two repository halves of one configured store.
pub struct Repositories {
    pub credentials: Arc<dyn CredentialRepository>,
    pub profiles: Arc<dyn ProfileRepository>,
}

/// Open the storage backend selected in config.
pub async fn open(config: &StorageConfig) -> VaultResult<Repositories> {
    match config.backend {
        StorageBackendKind::Memory => {
            let store = Arc::new(MemoryStore::new());
            Ok(Repositories {
                credentials: store.clone(),
                profiles: store,
            })
        }
        StorageBackendKind::Json => {
            let store = Arc::new(JsonFileStore::open(&config.path).await?);
            Ok(Repositories {
                credentials: store.clone(),
                profiles: store,
            })
        }
    }
}

/// Rows shared by both backends. Keys are `(user_id, exact service name)`, so
/// a range scan over one user yields records already sorted by name.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub(crate) struct Tables {
    #[serde(with = "credential_rows")]
    credentials: BTreeMap<(UserId, String), CredentialRecord>,
    profiles: BTreeMap<UserId, UserProfile>,
}

impl Tables {
    /// Returns the previous record, if any, so a failed flush can restore it.
    pub(crate) fn upsert(&mut self, mut record: CredentialRecord) -> Option<CredentialRecord> {
        let key = (record.user_id, record.service_name.clone());
        if let Some(existing) = self.credentials.get(&key) {
            record.created_at = existing.created_at;
        }
        self.credentials.insert(key, record)
    }

    pub(crate) fn restore(
        &mut self,
        user_id: UserId,
        service_name: &str,
        previous: Option<CredentialRecord>,
    ) {
        let key = (user_id, service_name.to_string());
        match previous {
            Some(record) => {
                self.credentials.insert(key, record);
            }
            None => {
                self.credentials.remove(&key);
            }
        }
    }

    fn user_rows(&self, user_id: UserId) -> impl Iterator<Item = &CredentialRecord> {
        self.credentials
            .range((user_id, String::new())..)
            .take_while(move |((uid, _), _)| *uid == user_id)
            .map(|(_, record)| record)
    }

    pub(crate) fn find_matching(&self, user_id: UserId, query: &str) -> Option<CredentialRecord> {
        let needle = query.to_lowercase();
        self.user_rows(user_id)
            .find(|r| r.service_name.to_lowercase().contains(&needle))
            .cloned()
    }

    pub(crate) fn list(&self, user_id: UserId) -> Vec<CredentialRecord> {
        self.user_rows(user_id).cloned().collect()
    }

    pub(crate) fn count(&self, user_id: UserId) -> usize {
        self.user_rows(user_id).count()
    }

    pub(crate) fn delete(
        &mut self,
        user_id: UserId,
        service_name: &str,
    ) -> Option<CredentialRecord> {
        self.credentials.remove(&(user_id, service_name.to_string()))
    }

    pub(crate) fn profile(&self, user_id: UserId) -> Option<&UserProfile> {
        self.profiles.get(&user_id)
    }

    /// Returns the stored profile and whether it was inserted by this call.
    pub(crate) fn create_profile_if_absent(&mut self, profile: UserProfile) -> (UserProfile, bool) {
        match self.profiles.get(&profile.user_id) {
            Some(existing) => (existing.clone(), false),
            None => {
                self.profiles.insert(profile.user_id, profile.clone());
                (profile, true)
            }
        }
    }

    pub(crate) fn profile_mut(&mut self, user_id: UserId) -> Option<&mut UserProfile> {
        self.profiles.get_mut(&user_id)
    }

    pub(crate) fn remove_profile(&mut self, user_id: UserId) {
        self.profiles.remove(&user_id);
    }
}

/// JSON object keys must be strings, so credentials are stored as a plain
/// array of records and re-keyed on load.
mod credential_rows {
    use std::collections::BTreeMap;

    use passportier_core::UserId;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::CredentialRecord;

    pub fn serialize<S: Serializer>(
        rows: &BTreeMap<(UserId, String), CredentialRecord>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(rows.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<(UserId, String), CredentialRecord>, D::Error> {
        let records = Vec::<CredentialRecord>::deserialize(deserializer)?;
        Ok(records
            .into_iter()
            .map(|r| ((r.user_id, r.service_name.clone()), r))
            .collect())
    }
}
