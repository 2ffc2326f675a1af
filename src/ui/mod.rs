//! # Console User Interface
//!
//! Thin presentation layer over the MQTT core. It keeps only view state (the
//! broker the operator picked, a short publish history) and reads everything
//! else from the shared [`crate::mqtt::SubscriberRuntime`] on every command, so
//! leaving and re-entering a view never loses the subscription.
//!
//! ## Views
//!
//! - **Dashboard** (`status`): subscriber state, message count, topic, broker and
//!   the five most recent messages
//! - **Publisher** (`pub`, `pubjson`, `bulk`, `history`): single and batch publishing
//! - **Subscriber** (`sub`, `unsub`, `msgs`, `clear`): background listening
//! - **Broker settings** (`broker`, `probe`): endpoint selection and reachability

pub mod command;
pub mod console;

pub use command::{Command, CommandError};
pub use console::{run_stdio, Console, Flow};
