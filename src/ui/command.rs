//! Console command grammar
//!
//! ```text
//! broker <host> <port>
//! probe
//! pub <topic> <qos> <retain> <payload...>
//! pubjson <topic> <qos> <retain> <json...>
//! bulk <file.json>
//! sub [filter]
//! unsub
//! status
//! msgs [topic substring]
//! clear
//! history
//! help
//! quit
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::mqtt::PayloadFormat;

pub const HELP: &str = "\
Commands:
  broker <host> <port>                   set the broker used by all commands
  probe                                  test the broker connection
  pub <topic> <qos> <retain> <payload>   publish plain text (retain: true/false)
  pubjson <topic> <qos> <retain> <json>  publish a validated JSON payload
  bulk <file.json>                       publish every item of a JSON array
  sub [filter]                           start listening (wildcards + and # allowed)
  unsub                                  stop listening
  status                                 dashboard overview
  msgs [text]                            received messages, newest first
  clear                                  clear received messages
  history                                messages published in this session
  help                                   this text
  quit                                   exit";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command '{0}', type 'help' for a list")]
    Unknown(String),

    #[error("Missing argument <{0}>")]
    MissingArgument(&'static str),

    #[error("Invalid {name}: '{value}'")]
    InvalidArgument { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Broker { host: String, port: u32 },
    Probe,
    Publish {
        topic: String,
        qos: u8,
        retain: bool,
        format: PayloadFormat,
        payload: String,
    },
    Bulk { path: PathBuf },
    Subscribe { filter: Option<String> },
    Unsubscribe,
    Status,
    Messages { topic_contains: Option<String> },
    Clear,
    History,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (name, rest) = split_word(line);

        match name.to_lowercase().as_str() {
            "" => Err(CommandError::Empty),
            "broker" => {
                let (host, rest) = split_word(rest);
                let (port, _) = split_word(rest);
                Ok(Command::Broker {
                    host: required("host", host)?.to_string(),
                    port: parse_arg("port", required("port", port)?)?,
                })
            }
            "probe" => Ok(Command::Probe),
            "pub" => parse_publish(rest, PayloadFormat::PlainText),
            "pubjson" => parse_publish(rest, PayloadFormat::Json),
            "bulk" => Ok(Command::Bulk {
                path: PathBuf::from(required("file", rest)?),
            }),
            "sub" => Ok(Command::Subscribe {
                filter: optional(rest),
            }),
            "unsub" => Ok(Command::Unsubscribe),
            "status" => Ok(Command::Status),
            "msgs" => Ok(Command::Messages {
                topic_contains: optional(rest),
            }),
            "clear" => Ok(Command::Clear),
            "history" => Ok(Command::History),
            "help" => Ok(Command::Help),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn parse_publish(args: &str, format: PayloadFormat) -> Result<Command, CommandError> {
    let (topic, rest) = split_word(args);
    let (qos, rest) = split_word(rest);
    let (retain, payload) = split_word(rest);

    Ok(Command::Publish {
        topic: required("topic", topic)?.to_string(),
        qos: parse_arg("qos", required("qos", qos)?)?,
        retain: parse_arg("retain", required("retain", retain)?)?,
        format,
        payload: payload.to_string(),
    })
}

/// Splits off the first whitespace-delimited word; the remainder keeps its
/// inner spacing so payloads survive unchanged
fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.find(char::is_whitespace) {
        Some(end) => (&input[..end], input[end..].trim_start()),
        None => (input, ""),
    }
}

fn required<'a>(name: &'static str, value: &'a str) -> Result<&'a str, CommandError> {
    if value.is_empty() {
        Err(CommandError::MissingArgument(name))
    } else {
        Ok(value)
    }
}

fn optional(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_arg<T: FromStr>(name: &'static str, value: &str) -> Result<T, CommandError> {
    value.parse().map_err(|_| CommandError::InvalidArgument {
        name,
        value: value.to_string(),
    })
}
