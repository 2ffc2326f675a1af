use std::collections::VecDeque;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::command::{Command, HELP};
use crate::config::AppConfig;
use crate::dashboard::{DashboardSnapshot, MessageQuery, MESSAGE_LIST_LIMIT};
use crate::mqtt::bulk::ItemOutcome;
use crate::mqtt::config::qos_from_level;
use crate::mqtt::{
    parse_bulk, probe, publish, publish_bulk, BrokerAddress, MqttError, PublishError,
    PublishRequest, SubscriberRuntime,
};

const HISTORY_LIMIT: usize = 20;
const HISTORY_PREVIEW_CHARS: usize = 80;
const START_SETTLE_TIME: Duration = Duration::from_millis(300);
const PROMPT: &str = "mqtt> ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRecord {
    pub topic: String,
    pub payload_preview: String,
    pub qos: u8,
    pub retain: bool,
}

/// What the caller should do after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue(String),
    Quit,
}

/// Line-oriented front end over the MQTT core
///
/// Holds only presentation state (selected broker, publish history); all MQTT
/// state lives in the borrowed [`SubscriberRuntime`].
pub struct Console<'a> {
    runtime: &'a SubscriberRuntime,
    config: AppConfig,
    broker: BrokerAddress,
    /// Newest first
    history: VecDeque<PublishRecord>,
}

impl<'a> Console<'a> {
    pub fn new(runtime: &'a SubscriberRuntime, config: AppConfig) -> Result<Self> {
        let broker = config.broker()?;
        Ok(Self {
            runtime,
            config,
            broker,
            history: VecDeque::with_capacity(HISTORY_LIMIT),
        })
    }

    pub fn broker(&self) -> &BrokerAddress {
        &self.broker
    }

    pub fn history(&self) -> impl Iterator<Item = &PublishRecord> {
        self.history.iter()
    }

    /// Reads commands from `input` until `quit` or end of input
    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        output.write_all(PROMPT.as_bytes()).await?;
        output.flush().await?;

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                output.write_all(PROMPT.as_bytes()).await?;
                output.flush().await?;
                continue;
            }

            let reply = match line.parse::<Command>() {
                Ok(command) => match self.execute(command).await {
                    Flow::Continue(reply) => reply,
                    Flow::Quit => break,
                },
                Err(e) => e.to_string(),
            };

            output.write_all(reply.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.write_all(PROMPT.as_bytes()).await?;
            output.flush().await?;
        }

        Ok(())
    }

    pub async fn execute(&mut self, command: Command) -> Flow {
        debug!("Executing {:?}", command);
        let reply = match command {
            Command::Broker { host, port } => match BrokerAddress::new(host, port) {
                Ok(broker) => {
                    info!("Broker set to {}", broker);
                    self.broker = broker;
                    format!("Broker set to {}", self.broker)
                }
                Err(e) => e.to_string(),
            },
            Command::Probe => probe(&self.broker, &self.config.probe).await.message,
            Command::Publish {
                topic,
                qos,
                retain,
                format,
                payload,
            } => {
                let topic = topic.trim().to_string();
                match self.publish_one(&topic, qos, retain, format.encode(&payload)).await {
                    Ok(()) => {
                        self.remember(&topic, &payload, qos, retain);
                        format!("Published to {}", topic)
                    }
                    Err(e) => format!("Publish failed: {}", e),
                }
            }
            Command::Bulk { path } => match tokio::fs::read_to_string(&path).await {
                Ok(document) => self.bulk(&document).await,
                Err(e) => format!("Failed to read {}: {}", path.display(), e),
            },
            Command::Subscribe { filter } => {
                let filter = filter
                    .unwrap_or_else(|| self.runtime.settings().default_filter.clone());
                self.subscribe(filter.trim()).await
            }
            Command::Unsubscribe => {
                self.runtime.stop().await;
                "Stopped listening.".to_string()
            }
            Command::Status => DashboardSnapshot::capture(self.runtime, &self.broker).to_string(),
            Command::Messages { topic_contains } => self.list_messages(topic_contains),
            Command::Clear => {
                self.runtime.clear_messages();
                "Messages cleared.".to_string()
            }
            Command::History => self.render_history(),
            Command::Help => HELP.to_string(),
            Command::Quit => return Flow::Quit,
        };
        Flow::Continue(reply)
    }

    async fn publish_one(
        &self,
        topic: &str,
        qos: u8,
        retain: bool,
        payload: Result<Vec<u8>, PublishError>,
    ) -> Result<(), MqttError> {
        let request = PublishRequest::new(topic, payload?)
            .with_qos(qos_from_level(qos)?)
            .with_retain(retain);
        publish(&self.broker, &request, &self.config.publisher).await?;
        Ok(())
    }

    async fn bulk(&self, document: &str) -> String {
        let items = match parse_bulk(document) {
            Ok(items) => items,
            Err(e) => return e.to_string(),
        };

        let report = publish_bulk(&self.broker, &items, &self.config.publisher).await;
        let mut lines: Vec<String> = report
            .items
            .iter()
            .filter_map(|item| match &item.outcome {
                ItemOutcome::Failed(reason) => Some(format!(
                    "Item {} ({}): {}",
                    item.position, item.topic, reason
                )),
                _ => None,
            })
            .collect();
        lines.push(format!("Done: {} messages published.", report));
        lines.join("\n")
    }

    async fn subscribe(&self, filter: &str) -> String {
        if let Err(e) = self.runtime.start(&self.broker, filter).await {
            return e.to_string();
        }

        tokio::time::sleep(START_SETTLE_TIME).await;
        let status = self.runtime.status();
        if status.is_active() {
            format!("Listening on {} at {}", status.topic, self.broker)
        } else if let Some(error) = status.last_error {
            error
        } else {
            format!("Connecting to {} for {}...", self.broker, filter)
        }
    }

    fn list_messages(&self, topic_contains: Option<String>) -> String {
        let messages = self.runtime.messages();
        if messages.is_empty() {
            return if self.runtime.is_active() {
                "Listening... No messages received yet.".to_string()
            } else {
                "Start the subscriber to begin collecting messages.".to_string()
            };
        }

        let query = MessageQuery {
            topic_contains: topic_contains.clone(),
            limit: Some(MESSAGE_LIST_LIMIT),
        };
        let selected = query.select(&messages);
        if selected.is_empty() {
            return format!(
                "No messages matching {}",
                topic_contains.unwrap_or_default()
            );
        }

        let mut lines = vec![format!("{} message(s), newest first", messages.len())];
        lines.extend(selected.iter().map(|message| message.render()));
        if selected.len() == MESSAGE_LIST_LIMIT && messages.len() > MESSAGE_LIST_LIMIT {
            lines.push(format!(
                "Showing first {} of {} messages. Use a filter to narrow down.",
                MESSAGE_LIST_LIMIT,
                messages.len()
            ));
        }
        lines.join("\n")
    }

    fn remember(&mut self, topic: &str, payload: &str, qos: u8, retain: bool) {
        self.history.push_front(PublishRecord {
            topic: topic.to_string(),
            payload_preview: payload.chars().take(HISTORY_PREVIEW_CHARS).collect(),
            qos,
            retain,
        });
        self.history.truncate(HISTORY_LIMIT);
    }

    fn render_history(&self) -> String {
        if self.history.is_empty() {
            return "No messages published yet in this session.".to_string();
        }
        self.history
            .iter()
            .map(|record| {
                let pin = if record.retain { " [retained]" } else { "" };
                format!(
                    "{}{} | QoS {}\n  {}",
                    record.topic, pin, record.qos, record.payload_preview
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Reads and runs commands from stdin until `quit`
pub async fn run_stdio(console: &mut Console<'_>) -> Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    console
        .run(stdin, stdout)
        .await
        .map_err(|e| eyre!("Console stopped: {}", e))
}
