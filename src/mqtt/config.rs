use std::fmt;
use std::time::Duration;

use rumqttc::QoS;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_BROKER_HOST: &str = "test.mosquitto.org";
pub const DEFAULT_BROKER_PORT: u16 = 1883;
pub const DEFAULT_SUBSCRIBE_FILTER: &str = "test/#";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Broker host cannot be empty")]
    EmptyHost,

    #[error("Broker port must be between 1 and 65535, got {0}")]
    InvalidPort(u32),

    #[error("QoS must be 0, 1 or 2, got {0}")]
    InvalidQos(u8),
}

/// Where a broker lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerAddress {
    host: String,
    port: u16,
}

impl BrokerAddress {
    pub fn new(host: impl Into<String>, port: u32) -> Result<Self, ConfigError> {
        let host = host.into().trim().to_string();
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .ok_or(ConfigError::InvalidPort(port))?;
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for BrokerAddress {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
        }
    }
}

impl fmt::Display for BrokerAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Maps a numeric QoS level onto the protocol type
pub fn qos_from_level(level: u8) -> Result<QoS, ConfigError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(ConfigError::InvalidQos(other)),
    }
}

pub fn qos_level(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}

/// Settings for the long-lived subscriber connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberSettings {
    pub keep_alive_secs: u64,
    /// Filter suggested to the operator when nothing is subscribed yet
    pub default_filter: String,
    /// Maximum QoS requested for the subscription. Deliveries arrive at
    /// min(publish QoS, this value).
    pub subscribe_qos: u8,
    /// Capacity of the request and session event channels
    pub channel_capacity: usize,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            keep_alive_secs: 60,
            default_filter: DEFAULT_SUBSCRIBE_FILTER.to_string(),
            subscribe_qos: 2,
            channel_capacity: 100,
        }
    }
}

impl SubscriberSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }
}

/// Settings for the short-lived publish connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub ack_timeout_secs: u64,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
            ack_timeout_secs: 30,
        }
    }
}

impl PublisherSettings {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub timeout_secs: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

impl ProbeSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
