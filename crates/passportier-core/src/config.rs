use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CoreError, CoreResult};

/// Upper bound accepted for `session.max_ttl_secs` (30 days).
pub const TTL_CEILING_SECS: u64 = 30 * 86400;

/// Top-level configuration (loaded from passportier.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PassportierConfig {
    pub log: LogConfig,
    pub session: SessionConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Where unlocked sessions live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionBackendKind {
    /// In-process map with per-session eviction timers
    Memory,
    /// Networked Redis/Valkey store with native key TTLs
    Redis,
}

/// What a session holds once unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyMode {
    /// Derive the 32-byte key once at unlock (per-user salt) and keep only the key
    DerivedKey,
    /// Keep the raw passphrase and run the KDF on every encrypt/decrypt
    Passphrase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Session backend: "memory" or "redis"
    pub backend: SessionBackendKind,
    /// Redis connection URL (redis backend only)
    pub redis_url: String,
    /// Key prefix for session entries in Redis
    pub key_prefix: String,
    /// Session key material: "derived_key" or "passphrase"
    pub key_mode: KeyMode,
    /// Auto-lock duration used when the user has no preference (default: 1800)
    pub default_ttl_secs: u64,
    /// Upper bound for any requested auto-lock duration (default: 86400)
    pub max_ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    /// Non-durable, process-local
    Memory,
    /// Single JSON file, flushed atomically on every write
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend: "memory" or "json"
    pub backend: StorageBackendKind,
    /// JSON store path (default: ~/.local/share/passportier/vault.json)
    pub path: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackendKind::Memory,
            redis_url: "redis://localhost:6379".into(),
            key_prefix: "session:".into(),
            key_mode: KeyMode::DerivedKey,
            default_ttl_secs: 1800,
            max_ttl_secs: 86400,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Json,
            path: PathBuf::from("~/.local/share/passportier/vault.json"),
        }
    }
}

impl SessionConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Resolve a requested auto-lock duration: zero falls back to the default,
    /// anything above `max_ttl_secs` is clamped.
    pub fn effective_ttl(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            return self.default_ttl();
        }
        requested.min(Duration::from_secs(self.max_ttl_secs))
    }
}

impl PassportierConfig {
    /// Read, parse and validate a TOML file.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| CoreError::Config(format!("parsing: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.session.default_ttl_secs == 0 {
            return Err(CoreError::Config(
                "session.default_ttl_secs must be greater than zero".into(),
            ));
        }
        if self.session.max_ttl_secs < self.session.default_ttl_secs {
            return Err(CoreError::Config(format!(
                "session.max_ttl_secs ({}) is below session.default_ttl_secs ({})",
                self.session.max_ttl_secs, self.session.default_ttl_secs
            )));
        }
        if self.session.max_ttl_secs > TTL_CEILING_SECS {
            return Err(CoreError::Config(format!(
                "session.max_ttl_secs ({}) exceeds the {TTL_CEILING_SECS}s ceiling",
                self.session.max_ttl_secs
            )));
        }
        match self.log.format.as_str() {
            "json" | "text" => {}
            other => {
                return Err(CoreError::Config(format!(
                    "log.format must be \"json\" or \"text\", got {other:?}"
                )))
            }
        }
        if self.session.backend == SessionBackendKind::Redis
            && !self.session.redis_url.starts_with("redis")
        {
            tracing::warn!(
                url = %self.session.redis_url,
                "session.redis_url does not look like a redis:// or rediss:// URL"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = PassportierConfig::from_toml_str("").unwrap();
        assert_eq!(config.session.backend, SessionBackendKind::Memory);
        assert_eq!(config.session.key_mode, KeyMode::DerivedKey);
        assert_eq!(config.session.default_ttl_secs, 1800);
        assert_eq!(config.storage.backend, StorageBackendKind::Json);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn parses_all_sections() {
        let config = PassportierConfig::from_toml_str(
            r#"
            [log]
            level = "debug"
            format = "json"

            [session]
            backend = "redis"
            redis_url = "redis://cache:6379/2"
            key_mode = "passphrase"
            default_ttl_secs = 300

            [storage]
            backend = "memory"
            "#,
        )
        .unwrap();

        assert_eq!(config.log.format, "json");
        assert_eq!(config.session.backend, SessionBackendKind::Redis);
        assert_eq!(config.session.redis_url, "redis://cache:6379/2");
        assert_eq!(config.session.key_mode, KeyMode::Passphrase);
        assert_eq!(config.session.default_ttl_secs, 300);
        assert_eq!(config.session.key_prefix, "session:");
        assert_eq!(config.storage.backend, StorageBackendKind::Memory);
    }

    #[test]
    fn rejects_zero_default_ttl() {
        let err = PassportierConfig::from_toml_str("[session]\ndefault_ttl_secs = 0").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn rejects_max_below_default() {
        let result = PassportierConfig::from_toml_str(
            "[session]\ndefault_ttl_secs = 600\nmax_ttl_secs = 60",
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_unbounded_max_ttl() {
        let err = PassportierConfig::from_toml_str(&format!(
            "[session]\nmax_ttl_secs = {}",
            i64::MAX
        ))
        .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));

        let at_ceiling = format!("[session]\nmax_ttl_secs = {TTL_CEILING_SECS}");
        assert!(PassportierConfig::from_toml_str(&at_ceiling).is_ok());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session]\ndefault_ttl_secs = 120\n").unwrap();

        let config = PassportierConfig::from_file(&path).unwrap();
        assert_eq!(config.session.default_ttl_secs, 120);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PassportierConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, CoreError::Io(_)));
    }

    #[test]
    fn rejects_unknown_log_format() {
        assert!(PassportierConfig::from_toml_str("[log]\nformat = \"xml\"").is_err());
    }

    #[test]
    fn effective_ttl_zero_means_default() {
        let session = SessionConfig::default();
        assert_eq!(
            session.effective_ttl(Duration::ZERO),
            Duration::from_secs(1800)
        );
    }

    #[test]
    fn effective_ttl_is_clamped() {
        let session = SessionConfig {
            max_ttl_secs: 3600,
            ..Default::default()
        };
        assert_eq!(
            session.effective_ttl(Duration::from_secs(7200)),
            Duration::from_secs(3600)
        );
        assert_eq!(
            session.effective_ttl(Duration::from_secs(300)),
            Duration::from_secs(300)
        );
    }
}
