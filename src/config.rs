//! # Application Configuration
//!
//! Loads the operator's defaults from a TOML file in the platform config
//! directory. Every field has a default so a partial (or missing) file still
//! yields a usable configuration.
//!
//! ```toml
//! [broker]
//! host = "test.mosquitto.org"
//! port = 1883
//!
//! [subscriber]
//! keep_alive_secs = 60
//! default_filter = "test/#"
//! subscribe_qos = 2
//! channel_capacity = 100
//!
//! [publisher]
//! keep_alive_secs = 60
//! connect_timeout_secs = 10
//! ack_timeout_secs = 30
//!
//! [probe]
//! timeout_secs = 5
//! ```

use std::path::{Path, PathBuf};

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::mqtt::config::{
    BrokerAddress, ProbeSettings, PublisherSettings, SubscriberSettings, DEFAULT_BROKER_HOST,
    DEFAULT_BROKER_PORT,
};

const CONFIG_DIR: &str = "mqtt-topic-manager";
const CONFIG_FILE: &str = "config.toml";

/// Broker section as written by the operator; validated into a [`BrokerAddress`]
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BrokerSection {
    pub host: String,
    pub port: u32,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: u32::from(DEFAULT_BROKER_PORT),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerSection,
    pub subscriber: SubscriberSettings,
    pub publisher: PublisherSettings,
    pub probe: ProbeSettings,
}

impl AppConfig {
    /// `<config dir>/mqtt-topic-manager/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let mut path =
            dirs::config_dir().ok_or_else(|| eyre!("No config directory on this platform"))?;
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        Ok(path)
    }

    pub fn broker(&self) -> Result<BrokerAddress> {
        BrokerAddress::new(self.broker.host.clone(), self.broker.port)
            .map_err(|e| eyre!("Invalid broker in configuration: {}", e))
    }

    /// Writes the default configuration if nothing exists at `path` yet
    pub async fn ensure_default(path: &Path) -> Result<()> {
        if tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }

        AppConfig::default().save(path).await?;
        info!("Created default configuration at {}", path.display());
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config: AppConfig = toml::from_str(&content)
            .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

        config.broker()?;
        debug!("Loaded configuration from {}: {:?}", path.display(), config);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize configuration: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file {}: {}", path.display(), e))
    }
}
