//! Redis/Valkey session backend.
//!
//! Key: `{prefix}{user_id}` (default prefix `session:`).
//! Value: tagged key material (`KeyMaterial::to_tagged_bytes`).
//! Expiry: `PSETEX`, so every unlock replaces value and TTL in one command.
//!
//! The material leaves process memory here; local zeroing only covers the
//! buffers this process owns.

use std::time::Duration;

use async_trait::async_trait;
use passportier_core::UserId;
use passportier_crypto::KeyMaterial;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use zeroize::Zeroize;

use super::SessionStore;
use crate::error::{VaultError, VaultResult};

pub struct RedisSessionStore {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisSessionStore {
    /// Connect to Redis/Valkey (`redis://host:port[/db]`, or `rediss://` for TLS).
    pub async fn connect(url: &str, key_prefix: &str) -> VaultResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| VaultError::SessionBackend(format!("invalid redis url: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| VaultError::SessionBackend(format!("connecting to redis: {e}")))?;

        let store = Self {
            conn,
            key_prefix: key_prefix.to_string(),
        };
        store.ping().await?;

        tracing::info!(prefix = %store.key_prefix, "session backend: connected to Redis");
        Ok(store)
    }

    pub async fn ping(&self) -> VaultResult<()> {
        let mut conn = self.conn.clone();
        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(backend_error)?;
        if reply != "PONG" {
            return Err(VaultError::SessionBackend(format!(
                "unexpected PING reply: {reply}"
            )));
        }
        Ok(())
    }

    fn key(&self, user_id: UserId) -> String {
        format!("{}{}", self.key_prefix, user_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn unlock(
        &self,
        user_id: UserId,
        material: KeyMaterial,
        ttl: Duration,
    ) -> VaultResult<()> {
        let value = material.to_tagged_bytes();
        drop(material);
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let mut conn = self.conn.clone();
        let _: () = conn
            .pset_ex(self.key(user_id), value.as_slice(), millis)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn peek(&self, user_id: UserId) -> VaultResult<KeyMaterial> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = conn.get(self.key(user_id)).await.map_err(backend_error)?;

        let Some(mut bytes) = data else {
            return Err(VaultError::SessionNotFound);
        };
        let material = KeyMaterial::from_tagged_bytes(&bytes);
        bytes.zeroize();
        material.map_err(VaultError::from)
    }

    async fn lock(&self, user_id: UserId) -> VaultResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(self.key(user_id)).await.map_err(backend_error)?;
        Ok(removed > 0)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

fn backend_error(e: redis::RedisError) -> VaultError {
    VaultError::SessionBackend(e.to_string())
}
