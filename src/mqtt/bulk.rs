//! Batch publishing from a JSON array
//!
//! ```json
//! [
//!   {"topic": "sensors/temp", "payload": "{\"value\": 22.1}", "qos": 0, "retain": false},
//!   {"topic": "alerts/fire", "payload": "ALERT: smoke detected", "qos": 1, "retain": true}
//! ]
//! ```
//!
//! Items are published one after another, each on its own connection. A failing
//! item never aborts the batch.

use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use super::config::{qos_from_level, BrokerAddress, PublisherSettings};
use super::publisher::{publish, PublishRequest};

#[derive(Debug, Error)]
pub enum BulkError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Payload must be a JSON array")]
    NotAnArray,
}

/// One entry of a bulk document; missing fields fall back to defaults
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BulkItem {
    #[serde(deserialize_with = "null_as_empty")]
    pub topic: String,
    pub payload: Value,
    pub qos: u8,
    pub retain: bool,
}

impl Default for BulkItem {
    fn default() -> Self {
        Self {
            topic: String::new(),
            payload: Value::String(String::new()),
            qos: 0,
            retain: false,
        }
    }
}

impl BulkItem {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, qos: u8, retain: bool) -> Self {
        Self {
            topic: topic.into(),
            payload: Value::String(payload.into()),
            qos,
            retain,
        }
    }

    /// Strings are sent verbatim, anything else as its JSON text
    pub fn payload_text(&self) -> String {
        match &self.payload {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// One array element of a bulk document
#[derive(Debug, Clone, PartialEq)]
pub enum BulkEntry {
    Item(BulkItem),
    /// Element that is not a usable item; reported as a failure of its own
    Invalid { topic: String, reason: String },
}

impl BulkEntry {
    fn from_value(entry: Value) -> Self {
        let topic = entry
            .get("topic")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match serde_json::from_value(entry) {
            Ok(item) => BulkEntry::Item(item),
            Err(e) => BulkEntry::Invalid {
                topic,
                reason: format!("Invalid item: {}", e),
            },
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            BulkEntry::Item(item) => &item.topic,
            BulkEntry::Invalid { topic, .. } => topic,
        }
    }
}

impl From<BulkItem> for BulkEntry {
    fn from(item: BulkItem) -> Self {
        BulkEntry::Item(item)
    }
}

/// Splits a JSON array into entries
///
/// Only a document that is not a JSON array fails as a whole; a malformed
/// element becomes [`BulkEntry::Invalid`] and the rest of the batch survives.
pub fn parse_bulk(document: &str) -> Result<Vec<BulkEntry>, BulkError> {
    match serde_json::from_str::<Value>(document)? {
        Value::Array(entries) => Ok(entries.into_iter().map(BulkEntry::from_value).collect()),
        _ => Err(BulkError::NotAnArray),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Published,
    /// Empty topic, never sent
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    /// 1-based position in the batch
    pub position: usize,
    pub topic: String,
    pub outcome: ItemOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub items: Vec<ItemReport>,
}

impl BulkReport {
    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn succeeded(&self) -> usize {
        self.count(|outcome| *outcome == ItemOutcome::Published)
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| *outcome == ItemOutcome::Skipped)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, ItemOutcome::Failed(_)))
    }

    fn count(&self, predicate: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|item| predicate(&item.outcome)).count()
    }
}

impl fmt::Display for BulkReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.succeeded(), self.total())
    }
}

/// Publishes every item, collecting a per-item outcome
pub async fn publish_bulk(
    broker: &BrokerAddress,
    entries: &[BulkEntry],
    settings: &PublisherSettings,
) -> BulkReport {
    let mut report = BulkReport::default();

    for (index, entry) in entries.iter().enumerate() {
        let position = index + 1;
        let outcome = match entry {
            BulkEntry::Invalid { reason, .. } => {
                warn!("Bulk item {} is malformed: {}", position, reason);
                ItemOutcome::Failed(reason.clone())
            }
            BulkEntry::Item(item) if item.topic.is_empty() => {
                info!("Skipping bulk item {} without topic", position);
                ItemOutcome::Skipped
            }
            BulkEntry::Item(item) => match publish_item(broker, item, settings).await {
                Ok(()) => ItemOutcome::Published,
                Err(reason) => {
                    warn!("Bulk item {} ({}) failed: {}", position, item.topic, reason);
                    ItemOutcome::Failed(reason)
                }
            },
        };
        report.items.push(ItemReport {
            position,
            topic: entry.topic().to_string(),
            outcome,
        });
        info!("Published {}/{}", position, entries.len());
    }

    info!("Bulk publish finished: {} messages published", report);
    report
}

async fn publish_item(
    broker: &BrokerAddress,
    item: &BulkItem,
    settings: &PublisherSettings,
) -> Result<(), String> {
    let qos = qos_from_level(item.qos).map_err(|e| e.to_string())?;
    let request = PublishRequest::new(item.topic.clone(), item.payload_text())
        .with_qos(qos)
        .with_retain(item.retain);
    publish(broker, &request, settings)
        .await
        .map_err(|e| e.to_string())
}
