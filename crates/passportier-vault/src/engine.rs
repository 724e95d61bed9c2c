//! The vault engine: what a bot or API handler calls.
//!
//! `unlock` bootstraps the user's profile on first use, turns the passphrase
//! into session material according to `session.key_mode` and hands it to the
//! session backend. Every read or write of a secret then borrows a copy of
//! that material. Nothing here checks a passphrase directly: a wrong one is
//! discovered when a stored record fails to open.

use std::sync::Arc;
use std::time::Duration;

use passportier_core::config::{KeyMode, PassportierConfig, SessionConfig};
use passportier_core::{unix_now, UserId};
use passportier_crypto::{generate_salt, Codec, KeyMaterial};
use secrecy::{ExposeSecret, SecretString};

use crate::credentials::{blocking, Credential, CredentialStore, RevealedCredential};
use crate::error::{VaultError, VaultResult};
use crate::repository::{
    self, CredentialRecord, CredentialRepository, ProfileRepository, UserProfile,
};
use crate::session::{self, SessionStore};

pub struct Vault {
    sessions: Arc<dyn SessionStore>,
    credentials: CredentialStore,
    profiles: Arc<dyn ProfileRepository>,
    codec: Arc<Codec>,
    config: SessionConfig,
}

impl Vault {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        credentials: Arc<dyn CredentialRepository>,
        profiles: Arc<dyn ProfileRepository>,
        codec: Codec,
        config: SessionConfig,
    ) -> Self {
        let codec = Arc::new(codec);
        Self {
            sessions,
            credentials: CredentialStore::new(credentials, codec.clone()),
            profiles,
            codec,
            config,
        }
    }

    /// Build the session backend and store named in `config`.
    ///
    /// `storage.path` is used as given; expand `~` before calling.
    pub async fn from_config(config: &PassportierConfig) -> VaultResult<Self> {
        let sessions = session::connect(&config.session).await?;
        let repos = repository::open(&config.storage).await?;

        tracing::info!(
            session_backend = sessions.backend_name(),
            storage_backend = ?config.storage.backend,
            key_mode = ?config.session.key_mode,
            "vault engine ready"
        );

        Ok(Self::new(
            sessions,
            repos.credentials,
            repos.profiles,
            Codec::new(),
            config.session.clone(),
        ))
    }

    /// Open a session for `user_id`. `ttl` of `None` uses the user's stored
    /// preference; zero means the configured default. Returns the TTL applied.
    pub async fn unlock(
        &self,
        user_id: UserId,
        passphrase: &SecretString,
        ttl: Option<Duration>,
    ) -> VaultResult<Duration> {
        if passphrase.expose_secret().is_empty() {
            return Err(VaultError::InvalidInput("passphrase is empty".into()));
        }

        let profile = self.profile_for(user_id).await?;
        let ttl = self
            .config
            .effective_ttl(ttl.unwrap_or_else(|| profile.session_ttl()));

        let material = match self.config.key_mode {
            KeyMode::DerivedKey => {
                let codec = self.codec.clone();
                let passphrase = KeyMaterial::from_passphrase(passphrase);
                let salt = profile.salt;
                let key =
                    blocking(move || Ok(codec.derive_key(passphrase.expose_bytes(), &salt)?))
                        .await?;
                KeyMaterial::from_key(key)
            }
            KeyMode::Passphrase => KeyMaterial::from_passphrase(passphrase),
        };

        self.sessions.unlock(user_id, material, ttl).await?;
        tracing::info!(user_id, ttl_secs = ttl.as_secs(), "vault unlocked");
        Ok(ttl)
    }

    /// End the session. Returns whether one was active.
    pub async fn lock(&self, user_id: UserId) -> VaultResult<bool> {
        let had_session = self.sessions.lock(user_id).await?;
        tracing::info!(user_id, had_session, "vault locked");
        Ok(had_session)
    }

    /// Seal and store `plaintext` under `service_name`, replacing any record
    /// with exactly that name.
    pub async fn save(
        &self,
        user_id: UserId,
        service_name: &str,
        plaintext: &SecretString,
    ) -> VaultResult<()> {
        let material = self.sessions.peek(user_id).await?;
        self.credentials
            .upsert(user_id, service_name, plaintext, material)
            .await
    }

    /// Open the first record whose name contains `query`, ignoring case.
    pub async fn get(&self, user_id: UserId, query: &str) -> VaultResult<Credential> {
        let material = self.sessions.peek(user_id).await?;
        self.credentials.retrieve(user_id, query, material).await
    }

    /// Sealed records, sorted by name. Needs no session.
    pub async fn list(&self, user_id: UserId) -> VaultResult<Vec<CredentialRecord>> {
        self.credentials.list(user_id).await
    }

    /// Open every record. One bad record shows up in its own row and does
    /// not fail the call.
    pub async fn reveal_all(&self, user_id: UserId) -> VaultResult<Vec<RevealedCredential>> {
        let material = self.sessions.peek(user_id).await?;
        let records = self.credentials.list(user_id).await?;
        Ok(self.credentials.reveal(records, material).await)
    }

    /// Exact-name delete. Returns whether a record existed; absent is not an error.
    pub async fn delete(&self, user_id: UserId, service_name: &str) -> VaultResult<bool> {
        let removed = self.credentials.delete(user_id, service_name).await?;
        tracing::debug!(user_id, removed, "credential delete");
        Ok(removed)
    }

    pub async fn count(&self, user_id: UserId) -> VaultResult<usize> {
        self.credentials.count(user_id).await
    }

    /// Store the auto-lock preference used by later unlocks. The live session,
    /// if any, keeps its TTL. Returns the stored value after clamping.
    pub async fn set_session_ttl(&self, user_id: UserId, ttl: Duration) -> VaultResult<Duration> {
        let ttl = self.config.effective_ttl(ttl);
        self.profile_for(user_id).await?;
        self.profiles.set_session_ttl(user_id, ttl.as_secs()).await?;
        tracing::info!(user_id, ttl_secs = ttl.as_secs(), "auto-lock preference updated");
        Ok(ttl)
    }

    pub async fn is_unlocked(&self, user_id: UserId) -> VaultResult<bool> {
        match self.sessions.peek(user_id).await {
            Ok(_) => Ok(true),
            Err(VaultError::SessionNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn session_backend(&self) -> &'static str {
        self.sessions.backend_name()
    }

    /// The stored profile, created with a fresh salt on first use. Concurrent
    /// first calls converge on whichever profile the store kept.
    async fn profile_for(&self, user_id: UserId) -> VaultResult<UserProfile> {
        if let Some(profile) = self.profiles.get_profile(user_id).await? {
            return Ok(profile);
        }
        let profile = self
            .profiles
            .create_profile_if_absent(UserProfile {
                user_id,
                salt: generate_salt(),
                session_ttl_secs: self.config.default_ttl_secs,
                created_at: unix_now(),
            })
            .await?;
        tracing::debug!(user_id, "user profile ready");
        Ok(profile)
    }
}
