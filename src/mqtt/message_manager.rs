use chrono::{DateTime, Local};
use rumqttc::Publish;
use serde::Serialize;
use std::fmt;

use super::config::qos_level;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const PREVIEW_CHARS: usize = 40;

/// One message delivered to the subscriber
///
/// Created by the subscriber's receive path and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MQTTMessage {
    topic: String,
    payload: String,
    qos: u8,
    retain: bool,
    received_at: DateTime<Local>,
}

impl MQTTMessage {
    /// Builds a record from an incoming PUBLISH, stamped with the current time
    ///
    /// Invalid UTF-8 in the payload is replaced rather than rejected.
    pub fn from_publish(publish: &Publish) -> Self {
        Self::received(
            publish.topic.clone(),
            &publish.payload,
            qos_level(publish.qos),
            publish.retain,
        )
    }

    pub fn received(topic: String, payload: &[u8], qos: u8, retain: bool) -> Self {
        MQTTMessage {
            topic,
            payload: String::from_utf8_lossy(payload).into_owned(),
            qos,
            retain,
            received_at: Local::now(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn qos(&self) -> u8 {
        self.qos
    }

    pub fn retain(&self) -> bool {
        self.retain
    }

    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }

    pub fn timestamp(&self) -> String {
        self.received_at.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn render(&self) -> String {
        let retained = if self.retain { " [retained]" } else { "" };
        format!(
            "{} | {} | QoS {}{}\n{}",
            self.timestamp(),
            self.topic,
            self.qos,
            retained,
            self.payload
        )
    }
}

impl fmt::Display for MQTTMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut preview: String = self.payload.chars().take(PREVIEW_CHARS).collect();
        if self.payload.chars().count() > PREVIEW_CHARS {
            preview.push('…');
        }
        write!(f, "{} {} - {}", self.timestamp(), self.topic, preview)
    }
}
