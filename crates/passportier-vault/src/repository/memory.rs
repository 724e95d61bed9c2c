//! In-memory store. Nothing survives the process.

use async_trait::async_trait;
use passportier_core::UserId;
use tokio::sync::RwLock;

use super::{CredentialRecord, CredentialRepository, ProfileRepository, Tables, UserProfile};
use crate::error::{VaultError, VaultResult};

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for MemoryStore {
    async fn upsert(&self, record: CredentialRecord) -> VaultResult<()> {
        self.tables.write().await.upsert(record);
        Ok(())
    }

    async fn find_matching(
        &self,
        user_id: UserId,
        query: &str,
    ) -> VaultResult<Option<CredentialRecord>> {
        Ok(self.tables.read().await.find_matching(user_id, query))
    }

    async fn list(&self, user_id: UserId) -> VaultResult<Vec<CredentialRecord>> {
        Ok(self.tables.read().await.list(user_id))
    }

    async fn delete(&self, user_id: UserId, service_name: &str) -> VaultResult<bool> {
        Ok(self
            .tables
            .write()
            .await
            .delete(user_id, service_name)
            .is_some())
    }

    async fn count(&self, user_id: UserId) -> VaultResult<usize> {
        Ok(self.tables.read().await.count(user_id))
    }
}

#[async_trait]
impl ProfileRepository for MemoryStore {
    async fn get_profile(&self, user_id: UserId) -> VaultResult<Option<UserProfile>> {
        Ok(self.tables.read().await.profile(user_id).cloned())
    }

    async fn create_profile_if_absent(&self, profile: UserProfile) -> VaultResult<UserProfile> {
        let (stored, _) = self.tables.write().await.create_profile_if_absent(profile);
        Ok(stored)
    }

    async fn set_session_ttl(&self, user_id: UserId, ttl_secs: u64) -> VaultResult<()> {
        let mut tables = self.tables.write().await;
        let profile = tables.profile_mut(user_id).ok_or(VaultError::NotFound)?;
        profile.session_ttl_secs = ttl_secs;
        Ok(())
    }
}
