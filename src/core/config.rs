use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::blockchain::network::NetworkConfig;
use crate::core::errors::BridgeError;

/// Page provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Client-side request timeout (seconds)
    #[serde(default = "ProviderConfig::default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl ProviderConfig {
    fn default_request_timeout() -> u64 { 30 }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self { request_timeout_secs: Self::default_request_timeout() }
    }
}

/// Background coordinator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Age after which an unanswered request is swept (seconds)
    #[serde(default = "CoordinatorConfig::default_pending_ttl")]
    pub pending_ttl_secs: u64,

    /// Sweep period (seconds)
    #[serde(default = "CoordinatorConfig::default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Confirmations allowed to wait behind the presented one
    #[serde(default = "CoordinatorConfig::default_max_queued")]
    pub max_queued_confirmations: usize,
}

impl CoordinatorConfig {
    fn default_pending_ttl() -> u64 { 300 }
    fn default_sweep_interval() -> u64 { 30 }
    fn default_max_queued() -> usize { 16 }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: Self::default_pending_ttl(),
            sweep_interval_secs: Self::default_sweep_interval(),
            max_queued_confirmations: Self::default_max_queued(),
        }
    }
}

/// Confirmation UI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    /// Persisted confirmations older than this are discarded unseen (seconds)
    #[serde(default = "ConfirmationConfig::default_ttl")]
    pub ttl_secs: u64,
}

impl ConfirmationConfig {
    fn default_ttl() -> u64 { 300 }

    pub fn ttl(&self) -> chrono::Duration {
        ttl_from_secs(self.ttl_secs).unwrap_or_else(|| chrono::Duration::seconds(300))
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self { ttl_secs: Self::default_ttl() }
    }
}

/// Wallet session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unlocked session lifetime (seconds)
    #[serde(default = "SessionConfig::default_ttl")]
    pub ttl_secs: u64,
}

impl SessionConfig {
    fn default_ttl() -> u64 { 300 }

    pub fn ttl(&self) -> chrono::Duration {
        ttl_from_secs(self.ttl_secs).unwrap_or_else(|| chrono::Duration::seconds(300))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_secs: Self::default_ttl() }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_database_url")]
    pub database_url: String,
}

impl StorageConfig {
    fn default_database_url() -> String {
        "sqlite://./data/luckyou.db?mode=rwc".to_string()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database_url: Self::default_database_url() }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Built-in networks, in display order. The first entry is the fallback
    /// when the selected network disappears.
    #[serde(default = "NetworkConfig::builtin_defaults")]
    pub networks: Vec<NetworkConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            coordinator: CoordinatorConfig::default(),
            confirmation: ConfirmationConfig::default(),
            session: SessionConfig::default(),
            storage: StorageConfig::default(),
            networks: NetworkConfig::builtin_defaults(),
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, BridgeError> {
        let config: BridgeConfig =
            toml::from_str(raw).map_err(|e| BridgeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`, falling back to defaults when the file does not exist,
    /// then applies environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let path = path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            Err(e) => return Err(BridgeError::Config(format!("{}: {}", path.display(), e))),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), BridgeError> {
        if let Ok(url) = std::env::var("LUCKYOU_DATABASE_URL") {
            self.storage.database_url = url;
        }
        if let Some(secs) = env_u64("LUCKYOU_REQUEST_TIMEOUT_SECS")? {
            self.provider.request_timeout_secs = secs;
        }
        if let Some(secs) = env_u64("LUCKYOU_PENDING_TTL_SECS")? {
            self.coordinator.pending_ttl_secs = secs;
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), BridgeError> {
        if self.networks.is_empty() {
            return Err(BridgeError::Config("at least one built-in network is required".into()));
        }
        if self.provider.request_timeout_secs == 0 {
            return Err(BridgeError::Config("provider.request_timeout_secs must be > 0".into()));
        }
        for (section, secs) in [
            ("confirmation.ttl_secs", self.confirmation.ttl_secs),
            ("session.ttl_secs", self.session.ttl_secs),
        ] {
            if secs == 0 || ttl_from_secs(secs).is_none() {
                return Err(BridgeError::Config(format!("{section} out of range: {secs}")));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for network in &self.networks {
            if !seen.insert(network.chain_id) {
                return Err(BridgeError::Config(format!(
                    "duplicate built-in chain id {}",
                    network.chain_id
                )));
            }
        }
        Ok(())
    }
}

/// `None` when `secs` does not fit a signed duration.
fn ttl_from_secs(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

fn env_u64(key: &str) -> Result<Option<u64>, BridgeError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| BridgeError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(None),
    }
}
