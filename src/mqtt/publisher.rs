//! One-shot publisher
//!
//! Every call opens its own connection, publishes one message, waits for the
//! acknowledgment the QoS level asks for and disconnects again. Nothing is
//! shared with the subscriber or with other publish calls.
//!
//! ```text
//! connect ──► CONNACK ──► PUBLISH ──► PUBACK (QoS 1) ──► DISCONNECT
//!                                 └─► PUBREC/PUBREL/PUBCOMP (QoS 2)
//!                                 └─► written to socket (QoS 0)
//! ```

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Outgoing, Packet, QoS};
use tracing::{debug, info, warn};

use super::config::{BrokerAddress, PublisherSettings};
use super::connection::{self, Role};
use super::error::PublishError;
use super::topic::validate_topic_name;

const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishRequest {
    /// QoS 0, not retained
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

/// How the operator typed the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadFormat {
    #[default]
    PlainText,
    Json,
}

impl PayloadFormat {
    /// Turns operator input into payload bytes, rejecting malformed JSON
    pub fn encode(self, text: &str) -> Result<Vec<u8>, PublishError> {
        if self == PayloadFormat::Json {
            serde_json::from_str::<serde_json::Value>(text)
                .map_err(|e| PublishError::InvalidPayload(format!("Invalid JSON: {}", e)))?;
        }
        Ok(text.as_bytes().to_vec())
    }
}

/// Publishes one message and blocks until it is delivered as far as its QoS
/// level promises
///
/// # Errors
///
/// * [`PublishError::InvalidTopic`] - empty topic or wildcards, checked before connecting
/// * [`PublishError::Connect`] - broker unreachable or CONNECT refused
/// * [`PublishError::Rejected`] - the client refused to queue the publish
/// * [`PublishError::Transport`] - connection dropped while waiting for the ack
/// * [`PublishError::AckTimeout`] - no ack within `settings.ack_timeout_secs`
pub async fn publish(
    broker: &BrokerAddress,
    request: &PublishRequest,
    settings: &PublisherSettings,
) -> Result<(), PublishError> {
    validate_topic_name(&request.topic)?;

    debug!(
        "Publishing to {} on {} (qos {:?}, retain {})",
        request.topic, broker, request.qos, request.retain
    );

    let options = connection::session_options(Role::Publisher, broker, settings.keep_alive());
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    connection::await_connack(&mut eventloop, settings.connect_timeout()).await?;

    let delivered = deliver(&client, &mut eventloop, request, settings.ack_timeout()).await;

    // Polling a dropped event loop reconnects and resends the pending publish
    let connected = !matches!(delivered, Err(PublishError::Transport(_)));
    if connected {
        if let Err(e) = connection::disconnect(&client, &mut eventloop, DISCONNECT_GRACE).await {
            debug!("Publisher disconnect from {} was not clean: {}", broker, e);
        }
    }

    match &delivered {
        Ok(()) => info!("Published to {} on {}", request.topic, broker),
        Err(e) => warn!("Publish to {} on {} failed: {}", request.topic, broker, e),
    }
    delivered
}

async fn deliver(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    request: &PublishRequest,
    ack_timeout: Duration,
) -> Result<(), PublishError> {
    client
        .publish(
            request.topic.clone(),
            request.qos,
            request.retain,
            request.payload.clone(),
        )
        .await
        .map_err(|e| PublishError::Rejected(e.to_string()))?;

    let wait = async {
        let mut pkid = None;
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Publish(id))) => {
                    if request.qos == QoS::AtMostOnce {
                        return Ok(());
                    }
                    pkid = Some(id);
                }
                Ok(Event::Incoming(Packet::PubAck(ack)))
                    if request.qos == QoS::AtLeastOnce && pkid == Some(ack.pkid) =>
                {
                    return Ok(());
                }
                Ok(Event::Incoming(Packet::PubComp(comp)))
                    if request.qos == QoS::ExactlyOnce && pkid == Some(comp.pkid) =>
                {
                    return Ok(());
                }
                Ok(event) => debug!("Publisher event: {:?}", event),
                Err(e) => return Err(PublishError::Transport(e.to_string())),
            }
        }
    };

    tokio::time::timeout(ack_timeout, wait)
        .await
        .map_err(|_| PublishError::AckTimeout(ack_timeout))?
}
