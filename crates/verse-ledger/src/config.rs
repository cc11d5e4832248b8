//! Ledger configuration loaded from TOML.
//!
//! ```toml
//! [store]
//! backend = "sqlite"        # "sqlite" | "flatlog" | "memory"
//! path = "verse-ledger.db"
//! busy_timeout_ms = 5000
//!
//! [chain]
//! max_conflict_retries = 3
//! secret_hex = "..."        # VERSE_LEDGER_SECRET takes precedence
//!
//! [[witnesses]]
//! id = "witness:notary"
//! private_key_hex = "..."
//! ```

use crate::error::ConfigError;
use crate::store::{FlatLogStore, LedgerStore, MemoryStore, SqliteStore, StoreKind};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use verse_hash::{ChainLinker, SigningSecret, WitnessKey};

/// Environment variable holding the hex signing secret.
pub const SECRET_ENV: &str = "VERSE_LEDGER_SECRET";

pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub store: StoreConfig,
    pub chain: ChainConfig,
    pub witnesses: Vec<WitnessConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: StoreKind,
    /// Database or log file; unused by the memory backend.
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreKind::Memory,
            path: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChainConfig {
    /// Re-reads of the tip after a `ChainConflict` before giving up.
    pub max_conflict_retries: u32,
    pub secret_hex: Option<String>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
            secret_hex: None,
        }
    }
}

impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("max_conflict_retries", &self.max_conflict_retries)
            .field("secret_hex", &self.secret_hex.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WitnessConfig {
    pub id: String,
    pub private_key_hex: String,
}

impl fmt::Debug for WitnessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WitnessConfig")
            .field("id", &self.id)
            .field("private_key_hex", &"<redacted>")
            .finish()
    }
}

impl LedgerConfig {
    /// Load and validate a config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.backend != StoreKind::Memory && self.store.path.is_none() {
            return Err(ConfigError::MissingStorePath {
                backend: match self.store.backend {
                    StoreKind::Structured => "sqlite",
                    _ => "flatlog",
                },
            });
        }
        Ok(())
    }

    /// Signing secret from the environment, falling back to `chain.secret_hex`.
    pub fn signing_secret(&self) -> Result<SigningSecret, ConfigError> {
        self.resolve_secret(std::env::var(SECRET_ENV).ok())
    }

    fn resolve_secret(&self, from_env: Option<String>) -> Result<SigningSecret, ConfigError> {
        let hex = from_env
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.chain.secret_hex.clone())
            .ok_or(ConfigError::MissingSecret { env: SECRET_ENV })?;

        SigningSecret::from_hex(&hex).map_err(|source| ConfigError::Key {
            what: "signing secret".to_string(),
            source,
        })
    }

    pub fn witness_keys(&self) -> Result<Vec<WitnessKey>, ConfigError> {
        self.witnesses
            .iter()
            .map(|w| {
                WitnessKey::from_hex(w.id.clone(), &w.private_key_hex).map_err(|source| {
                    ConfigError::Key {
                        what: format!("key for witness {}", w.id),
                        source,
                    }
                })
            })
            .collect()
    }

    /// Linker carrying the signing secret and every configured witness.
    pub fn linker(&self) -> Result<ChainLinker, ConfigError> {
        Ok(ChainLinker::new(self.signing_secret()?).with_witnesses(self.witness_keys()?))
    }

    /// Open the configured backend.
    pub fn open_store(&self) -> Result<Box<dyn LedgerStore>, ConfigError> {
        self.validate()?;
        let store: Box<dyn LedgerStore> = match (self.store.backend, &self.store.path) {
            (StoreKind::Structured, Some(path)) => Box::new(SqliteStore::open(
                path,
                Duration::from_millis(self.store.busy_timeout_ms),
            )?),
            (StoreKind::FlatLog, Some(path)) => Box::new(FlatLogStore::open(path)?),
            _ => Box::new(MemoryStore::new()),
        };
        info!(backend = %store.kind(), "opened ledger store");
        Ok(store)
    }
}
