//! Session stores: where a user's unlocked key material lives between requests.
//!
//! Two interchangeable backends, chosen by `[session] backend`:
//!   - **memory** ([`SessionVault`]): in-process map, one eviction timer per
//!     unlock, version-checked expiry, zeroed on every exit path.
//!   - **redis** ([`RedisSessionStore`], feature `redis`): networked store with
//!     native key TTLs; a write replaces value and TTL together, so there is
//!     no local timer to race.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use passportier_core::config::{SessionBackendKind, SessionConfig};
use passportier_core::UserId;
use passportier_crypto::KeyMaterial;

use crate::error::VaultResult;

mod memory;
#[cfg(feature = "redis")]
mod redis_backend;

pub use memory::SessionVault;
#[cfg(feature = "redis")]
pub use redis_backend::RedisSessionStore;

/// Contract shared by every session backend.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Install `material` as the user's only live session for `ttl`,
    /// superseding (and wiping) any previous one.
    async fn unlock(&self, user_id: UserId, material: KeyMaterial, ttl: Duration)
        -> VaultResult<()>;

    /// A copy of the live material, or `SessionNotFound`. Does not extend the TTL.
    async fn peek(&self, user_id: UserId) -> VaultResult<KeyMaterial>;

    /// End the session. Returns whether there was one; absent is not an error.
    async fn lock(&self, user_id: UserId) -> VaultResult<bool>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Build the session backend selected in config.
pub async fn connect(config: &SessionConfig) -> VaultResult<Arc<dyn SessionStore>> {
    match config.backend {
        SessionBackendKind::Memory => Ok(Arc::new(SessionVault::new())),
        SessionBackendKind::Redis => connect_redis(config).await,
    }
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &SessionConfig) -> VaultResult<Arc<dyn SessionStore>> {
    let store = RedisSessionStore::connect(&config.redis_url, &config.key_prefix).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_config: &SessionConfig) -> VaultResult<Arc<dyn SessionStore>> {
    Err(crate::error::VaultError::SessionBackend(
        "session.backend = \"redis\" requires the redis feature: cargo build --features redis"
            .into(),
    ))
}
