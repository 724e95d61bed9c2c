//! passportier-vault: the zero-knowledge vault engine
//!
//! ```text
//! caller (bot / API) ──► Vault (engine.rs)
//!                          ├── SessionStore ──► SessionVault (in-process, timers)
//!                          │                └─► RedisSessionStore (feature "redis")
//!                          ├── CredentialStore ──► Codec (seal/open) ──► Argon2id
//!                          │                  └─► CredentialRepository
//!                          └── ProfileRepository (per-user salt + auto-lock TTL)
//! ```
//!
//! Persistence backends (`repository::MemoryStore`, `repository::JsonFileStore`)
//! implement both repository traits with a single-lock insert-or-replace.

pub mod credentials;
pub mod engine;
pub mod error;
pub mod repository;
pub mod session;

pub use credentials::{Credential, CredentialStore, RevealedCredential};
pub use engine::Vault;
pub use error::{VaultError, VaultResult};
pub use repository::{CredentialRecord, CredentialRepository, ProfileRepository, UserProfile};
pub use session::{SessionStore, SessionVault};

#[cfg(feature = "redis")]
pub use session::RedisSessionStore;
