//! MQTT topic manager: inspect and exercise an MQTT broker by publishing
//! messages, subscribing to topic filters and watching traffic arrive.
//!
//! ```text
//! main ──► Console (ui) ──► mqtt::{probe, publish, publish_bulk}
//!   │                   └─► &SubscriberRuntime ◄── session tasks (background)
//!   └──── owns SubscriberRuntime for the whole process
//! ```

pub mod config;
pub mod dashboard;
pub mod mqtt;
pub mod ui;
