//! Read-only views over the subscriber runtime for the front end
//!
//! Nothing here mutates the runtime. The dashboard is built from a single
//! [`SubscriberRuntime::snapshot`], so state, topic and message count shown
//! together come from the same moment.

use std::fmt;

use crate::mqtt::{BrokerAddress, ConnectionState, MQTTMessage, SubscriberRuntime};

pub const RECENT_MESSAGES: usize = 5;
pub const MESSAGE_LIST_LIMIT: usize = 100;

/// What the dashboard shows at a glance
#[derive(Debug, Clone)]
pub struct DashboardSnapshot {
    pub state: ConnectionState,
    pub topic: String,
    pub last_error: Option<String>,
    /// Broker the operator currently has configured, not necessarily the one
    /// the subscriber is connected to
    pub broker: BrokerAddress,
    pub message_count: usize,
    /// Newest first
    pub recent: Vec<MQTTMessage>,
}

impl DashboardSnapshot {
    pub fn capture(runtime: &SubscriberRuntime, broker: &BrokerAddress) -> Self {
        let (status, messages) = runtime.snapshot();
        let recent = messages.iter().rev().take(RECENT_MESSAGES).cloned().collect();

        Self {
            state: status.connection_state,
            topic: status.topic,
            last_error: status.last_error,
            broker: broker.clone(),
            message_count: messages.len(),
            recent,
        }
    }

    pub fn hidden_messages(&self) -> usize {
        self.message_count.saturating_sub(self.recent.len())
    }
}

impl fmt::Display for DashboardSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = match self.state {
            ConnectionState::Active => "Active",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Inactive => "Inactive",
        };
        let topic = if self.topic.is_empty() { "None" } else { self.topic.as_str() };

        writeln!(f, "Subscriber: {}", state)?;
        writeln!(f, "Messages:   {}", self.message_count)?;
        writeln!(f, "Topic:      {}", topic)?;
        writeln!(f, "Broker:     {}", self.broker)?;
        if let Some(error) = &self.last_error {
            writeln!(f, "Error:      {}", error)?;
        }

        if self.recent.is_empty() {
            writeln!(f, "No messages yet.")?;
        } else {
            writeln!(f, "Recent messages:")?;
            for message in &self.recent {
                writeln!(f, "  {}", message)?;
            }
            if self.hidden_messages() > 0 {
                writeln!(
                    f,
                    "Showing last {} of {} messages.",
                    self.recent.len(),
                    self.message_count
                )?;
            }
        }
        Ok(())
    }
}

/// Newest-first message listing with an optional topic filter
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    /// Case-insensitive substring of the topic
    pub topic_contains: Option<String>,
    pub limit: Option<usize>,
}

impl MessageQuery {
    pub fn topic_contains(needle: impl Into<String>) -> Self {
        Self {
            topic_contains: Some(needle.into()),
            limit: None,
        }
    }

    pub fn select(&self, messages: &[MQTTMessage]) -> Vec<MQTTMessage> {
        let needle = self
            .topic_contains
            .as_deref()
            .filter(|needle| !needle.is_empty())
            .map(str::to_lowercase);
        let limit = self.limit.unwrap_or(MESSAGE_LIST_LIMIT);

        messages
            .iter()
            .rev()
            .filter(|message| match &needle {
                Some(needle) => message.topic().to_lowercase().contains(needle),
                None => true,
            })
            .take(limit)
            .cloned()
            .collect()
    }
}
