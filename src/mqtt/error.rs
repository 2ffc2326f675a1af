//! Error types for the MQTT core
//!
//! Probe and publisher hand these back to their caller. The subscriber runtime
//! never returns callback-time errors; it renders them into its `last_error`
//! field for the next poll. Teardown errors are only ever logged.

use std::time::Duration;

use thiserror::Error;

use super::config::ConfigError;
use super::topic::TopicError;

/// Failure to establish a broker connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// Transport level failure (DNS, refused socket, reset)
    #[error("{0}")]
    Unreachable(String),

    /// The broker answered the CONNECT with a non-success return code
    #[error("refused by broker: {0}")]
    Refused(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Connection failed: {0}")]
    Connect(#[from] ConnectError),

    #[error("Publish rejected: {0}")]
    Rejected(String),

    #[error("Connection lost before acknowledgment: {0}")]
    Transport(String),

    #[error("No acknowledgment within {0:?}")]
    AckTimeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscribeError {
    #[error("Invalid topic filter: {0}")]
    InvalidFilter(#[from] TopicError),

    #[error("Subscribe request failed: {0}")]
    Request(String),

    #[error("Subscribe failed: broker rejected '{0}'")]
    Refused(String),
}

/// Raised while closing a connection; callers never see it
#[derive(Debug, Error)]
pub enum TeardownError {
    #[error("Disconnect request failed: {0}")]
    Disconnect(String),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Failure of an operator request that combines input validation with a publish
#[derive(Debug, Error)]
pub enum MqttError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_keeps_inner_messages() {
        let config: MqttError = ConfigError::InvalidQos(3).into();
        assert_eq!(config.to_string(), "QoS must be 0, 1 or 2, got 3");

        let publish: MqttError = PublishError::from(TopicError::Empty).into();
        assert_eq!(publish.to_string(), "Invalid topic: Topic cannot be empty");
    }
}
