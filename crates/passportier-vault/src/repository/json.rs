//! JSON file store: whole vault loaded into memory, flushed atomically.
//!
//! Every mutation runs under one mutex: apply to the in-memory tables, write
//! `<path>.tmp` (created owner-only), rename over `<path>`. If the write fails the in-memory change
//! is undone, so memory never runs ahead of disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use passportier_core::UserId;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{CredentialRecord, CredentialRepository, ProfileRepository, Tables, UserProfile};
use crate::error::{VaultError, VaultResult};

pub struct JsonFileStore {
    path: PathBuf,
    tables: Mutex<Tables>,
}

impl JsonFileStore {
    /// Load the store at `path`, or start empty if the file does not exist yet.
    pub async fn open(path: &Path) -> VaultResult<Self> {
        let tables = match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                VaultError::StorageFailed(format!("parsing {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(e) => {
                return Err(VaultError::StorageFailed(format!(
                    "reading {}: {e}",
                    path.display()
                )))
            }
        };

        tracing::debug!(path = %path.display(), "opened json vault store");
        Ok(Self {
            path: path.to_path_buf(),
            tables: Mutex::new(tables),
        })
    }

    async fn flush(&self, tables: &Tables) -> VaultResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| storage_error("creating store dir", parent, e))?;
            }
        }

        let json = serde_json::to_vec_pretty(tables)
            .map_err(|e| VaultError::StorageFailed(format!("serializing store: {e}")))?;

        let tmp_path = temp_path(&self.path);
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options
            .open(&tmp_path)
            .await
            .map_err(|e| storage_error("creating store temp", &tmp_path, e))?;
        file.write_all(&json)
            .await
            .map_err(|e| storage_error("writing store temp", &tmp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| storage_error("syncing store temp", &tmp_path, e))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|e| storage_error("renaming store", &self.path, e))?;
        Ok(())
    }
}

/// `<path>.tmp`, appended to the full file name so `vault.tmp` gets `vault.tmp.tmp`.
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn storage_error(what: &str, path: &Path, e: std::io::Error) -> VaultError {
    tracing::error!(path = %path.display(), error = %e, "{what} failed");
    VaultError::StorageFailed(format!("{what}: {}: {e}", path.display()))
}

#[async_trait]
impl CredentialRepository for JsonFileStore {
    async fn upsert(&self, record: CredentialRecord) -> VaultResult<()> {
        let mut tables = self.tables.lock().await;
        let user_id = record.user_id;
        let service_name = record.service_name.clone();

        let previous = tables.upsert(record);
        if let Err(e) = self.flush(&tables).await {
            tables.restore(user_id, &service_name, previous);
            return Err(e);
        }
        Ok(())
    }

    async fn find_matching(
        &self,
        user_id: UserId,
        query: &str,
    ) -> VaultResult<Option<CredentialRecord>> {
        Ok(self.tables.lock().await.find_matching(user_id, query))
    }

    async fn list(&self, user_id: UserId) -> VaultResult<Vec<CredentialRecord>> {
        Ok(self.tables.lock().await.list(user_id))
    }

    async fn delete(&self, user_id: UserId, service_name: &str) -> VaultResult<bool> {
        let mut tables = self.tables.lock().await;
        let Some(removed) = tables.delete(user_id, service_name) else {
            return Ok(false);
        };
        if let Err(e) = self.flush(&tables).await {
            tables.restore(user_id, service_name, Some(removed));
            return Err(e);
        }
        Ok(true)
    }

    async fn count(&self, user_id: UserId) -> VaultResult<usize> {
        Ok(self.tables.lock().await.count(user_id))
    }
}

#[async_trait]
impl ProfileRepository for JsonFileStore {
    async fn get_profile(&self, user_id: UserId) -> VaultResult<Option<UserProfile>> {
        Ok(self.tables.lock().await.profile(user_id).cloned())
    }

    async fn create_profile_if_absent(&self, profile: UserProfile) -> VaultResult<UserProfile> {
        let mut tables = self.tables.lock().await;
        let user_id = profile.user_id;
        let (stored, inserted) = tables.create_profile_if_absent(profile);
        if inserted {
            if let Err(e) = self.flush(&tables).await {
                tables.remove_profile(user_id);
                return Err(e);
            }
        }
        Ok(stored)
    }

    async fn set_session_ttl(&self, user_id: UserId, ttl_secs: u64) -> VaultResult<()> {
        let mut tables = self.tables.lock().await;
        let profile = tables.profile_mut(user_id).ok_or(VaultError::NotFound)?;
        let previous = std::mem::replace(&mut profile.session_ttl_secs, ttl_secs);
        if let Err(e) = self.flush(&tables).await {
            if let Some(profile) = tables.profile_mut(user_id) {
                profile.session_ttl_secs = previous;
            }
            return Err(e);
        }
        Ok(())
    }
}
