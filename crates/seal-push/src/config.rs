//! Service configuration.
//!
//! Defaults, then an optional TOML file named by `SEAL_PUSH_CONFIG`, then
//! environment overrides.

use crate::admission::PowPolicy;
use crate::delivery::DeliveryConfig;
use crate::error::{BridgeError, Result};
use crate::ledger::{DEFAULT_PURGE_INTERVAL, DEFAULT_RETENTION};
use crate::store::DatabaseConfig;
use nostr_client::{Jitter, LinkConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const CONFIG_PATH_ENV: &str = "SEAL_PUSH_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relays used when a subscriber names none
    pub defaults: Vec<String>,
    pub connect_timeout_secs: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_secs: u64,
    pub jitter: Jitter,
    /// Seconds between liveness pings on an open link
    pub ping_interval_secs: u64,
    /// Seconds past a ping before a silent link is reconnected
    pub pong_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            defaults: vec!["wss://relay.damus.io".to_string()],
            connect_timeout_secs: 10,
            reconnect_base_ms: 1000,
            reconnect_max_secs: 60,
            jitter: Jitter::Equal,
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub pow_minimum: u32,
    pub pow_trusted: u32,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let policy = PowPolicy::default();
        Self {
            pow_minimum: policy.minimum,
            pow_trusted: policy.trusted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub retention_secs: u64,
    pub purge_interval_secs: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention_secs: DEFAULT_RETENTION.as_secs(),
            purge_interval_secs: DEFAULT_PURGE_INTERVAL.as_secs(),
        }
    }
}

/// Bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub database: DatabaseConfig,
    pub relays: RelayConfig,
    pub admission: AdmissionConfig,
    pub ledger: LedgerConfig,
    pub delivery: DeliveryConfig,
    pub shutdown_grace_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            relays: RelayConfig::default(),
            admission: AdmissionConfig::default(),
            ledger: LedgerConfig::default(),
            delivery: DeliveryConfig::default(),
            shutdown_grace_secs: 5,
        }
    }
}

impl BridgeConfig {
    /// Load from `SEAL_PUSH_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&text)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// Apply the environment overrides, reading variables through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(path) = lookup("DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(server) = lookup("NTFY_SERVER") {
            self.delivery.server = server;
        }
        if let Some(relays) = lookup("DEFAULT_RELAYS") {
            self.relays.defaults = relays
                .split(',')
                .map(str::trim)
                .filter(|relay| !relay.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(value) = lookup("SEAL_PUSH_POW_MINIMUM") {
            self.admission.pow_minimum = parse_bits("SEAL_PUSH_POW_MINIMUM", &value)?;
        }
        if let Some(value) = lookup("SEAL_PUSH_POW_TRUSTED") {
            self.admission.pow_trusted = parse_bits("SEAL_PUSH_POW_TRUSTED", &value)?;
        }
        debug!("Configuration after environment: {:?}", self);
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.admission.pow_trusted < self.admission.pow_minimum {
            return Err(BridgeError::Config(format!(
                "pow_trusted ({}) is below pow_minimum ({})",
                self.admission.pow_trusted, self.admission.pow_minimum
            )));
        }
        let relays = &self.relays;
        for (name, value) in [
            ("connect_timeout_secs", relays.connect_timeout_secs),
            ("reconnect_base_ms", relays.reconnect_base_ms),
            ("ping_interval_secs", relays.ping_interval_secs),
            ("pong_timeout_secs", relays.pong_timeout_secs),
        ] {
            if value == 0 {
                return Err(BridgeError::Config(format!("{} must be positive", name)));
            }
        }
        if self.ledger.purge_interval_secs == 0 {
            return Err(BridgeError::Config(
                "purge_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            connect_timeout: Duration::from_secs(self.relays.connect_timeout_secs),
            reconnect_base_delay: Duration::from_millis(self.relays.reconnect_base_ms),
            reconnect_max_delay: Duration::from_secs(self.relays.reconnect_max_secs),
            jitter: self.relays.jitter,
            ping_interval: Duration::from_secs(self.relays.ping_interval_secs),
            pong_timeout: Duration::from_secs(self.relays.pong_timeout_secs),
        }
    }

    pub fn pow_policy(&self) -> PowPolicy {
        PowPolicy {
            minimum: self.admission.pow_minimum,
            trusted: self.admission.pow_trusted,
        }
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.ledger.retention_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.ledger.purge_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

fn parse_bits(name: &str, value: &str) -> Result<u32> {
    let bits: u32 = value
        .trim()
        .parse()
        .map_err(|_| BridgeError::Config(format!("{} must be a number, got {:?}", name, value)))?;
    if bits > 256 {
        return Err(BridgeError::Config(format!("{} must be at most 256", name)));
    }
    Ok(bits)
}
